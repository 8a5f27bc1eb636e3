use rand::SeedableRng;
use rand::rngs::StdRng;

use super::functions::{random_fixed, random_int, random_varying};
use super::*;

fn expand(template: &str) -> Result<String, ExpandError> {
    Expander::seeded(42).expand(template)
}

fn kind(template: &str) -> ErrorKind {
    expand(template).expect_err("expected expansion failure").kind
}

// --- plain text ---

#[test]
fn text_without_actions_is_copied() {
    assert_eq!(expand("count(3)").unwrap(), "count(3)");
}

#[test]
fn result_is_trimmed() {
    assert_eq!(expand("\n  select 1  \n").unwrap(), "select 1");
}

// --- generators and control flow ---

#[test]
fn range_with_head_joins_elements() {
    let out = expand("{{range $i := count 3}}{{$i}}{{if head $i}},{{end}}{{end}}").unwrap();
    assert_eq!(out, "0,1,2");
}

#[test]
fn last_with_explicit_sequence() {
    let out =
        expand("{{range $i := count 3}}{{if last $i (count 3)}}L{{else}}{{$i}}{{end}}{{end}}")
            .unwrap();
    assert_eq!(out, "01L");
}

#[test]
fn first_and_tail() {
    let out =
        expand("{{range $i := count 3}}{{if first $i}}[{{end}}{{$i}}{{if tail $i}}+{{end}}{{end}}")
            .unwrap();
    assert_eq!(out, "[01+2+");
}

#[test]
fn head_and_last_use_innermost_loop() {
    let out = expand(
        "{{range $i := count 2}}{{range $j := count 3}}{{if last $j}}|{{end}}{{end}}{{end}}",
    )
    .unwrap();
    assert_eq!(out, "||");
}

#[test]
fn range_index_and_element() {
    let out = expand("{{range $i, $e := count 2}}{{$i}}={{$e}};{{end}}").unwrap();
    assert_eq!(out, "0=0;1=1;");
}

#[test]
fn dot_is_current_element() {
    assert_eq!(expand("{{range count 3}}{{.}}{{end}}").unwrap(), "012");
}

#[test]
fn range_else_runs_for_empty_sequence() {
    assert_eq!(
        expand("{{range count 0}}x{{else}}none{{end}}").unwrap(),
        "none"
    );
}

#[test]
fn else_if_chain() {
    assert_eq!(
        expand("{{if first 1}}a{{else if tail 1}}b{{else}}c{{end}}").unwrap(),
        "b"
    );
}

#[test]
fn call_style_arguments() {
    assert_eq!(expand("{{int(4, 4)}}").unwrap(), "4");
    assert_eq!(expand("x{{char(0)}}").unwrap(), "x");
    assert_eq!(expand("{{first(int(0, 0))}}").unwrap(), "true");
}

#[test]
fn pipe_passes_value_as_last_argument() {
    assert_eq!(expand("{{3 | first}}").unwrap(), "false");
    assert_eq!(expand("{{0 | first}}").unwrap(), "true");
}

#[test]
fn declared_variable_is_reused() {
    assert_eq!(expand("{{$n := 7}}{{$n}}-{{$n}}").unwrap(), "7-7");
}

#[test]
fn variables_are_scoped_to_blocks() {
    assert_eq!(
        kind("{{range count 1}}{{$x := 1}}{{end}}{{$x}}"),
        ErrorKind::UndefinedVariable("x".to_string())
    );
}

#[test]
fn sequence_prints_its_indices() {
    assert_eq!(expand("{{count 3}}").unwrap(), "[0 1 2]");
}

#[test]
fn trim_markers_and_comments() {
    assert_eq!(expand("a {{- 1 -}} b").unwrap(), "a1b");
    assert_eq!(expand("a{{/* hi */}}b").unwrap(), "ab");
    assert_eq!(expand("a {{- /* hi */ -}} b").unwrap(), "ab");
}

#[test]
fn string_literals_unescape() {
    assert_eq!(expand(r#"{{"it\"s"}}"#).unwrap(), "it\"s");
}

#[test]
fn non_random_templates_do_not_depend_on_seed() {
    let template = "insert into t values {{range $i := count 4}}({{$i}}){{if head $i}}, {{end}}{{end}}";
    let a = Expander::seeded(1).expand(template).unwrap();
    let b = Expander::seeded(2).expand(template).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, "insert into t values (0), (1), (2), (3)");
}

#[test]
fn same_seed_reproduces_random_output() {
    let template = "{{char 12}}-{{int 0 1000000}}-{{varchar 20}}";
    let a = Expander::seeded(9).expand(template).unwrap();
    let b = Expander::seeded(9).expand(template).unwrap();
    assert_eq!(a, b);
}

#[test]
fn expand_query_handles_markers() {
    let mut expander = Expander::seeded(3);
    assert_eq!(expander.expand_query("!!select {{1}}").unwrap(), "select 1");
    assert_eq!(expander.expand_query("!select {{1}}").unwrap(), "select 1");
    assert_eq!(expander.expand_query("select {{1}}").unwrap(), "select {{1}}");
    assert!(!is_template("!"));
    assert!(records_expansion("!!select 1"));
    assert!(!records_expansion("!select 1"));
}

// --- failures ---

#[test]
fn unknown_function_fails() {
    assert_eq!(
        kind("select {{nope 1}}"),
        ErrorKind::UnknownFunction("nope".to_string())
    );
    assert_eq!(
        kind("select {{nope(1)}}"),
        ErrorKind::UnknownFunction("nope".to_string())
    );
}

#[test]
fn function_names_are_case_sensitive() {
    assert_eq!(
        kind("{{Count 3}}"),
        ErrorKind::UnknownFunction("Count".to_string())
    );
}

#[test]
fn syntax_errors_are_reported() {
    assert!(matches!(kind("{{range count 2}}x"), ErrorKind::Syntax(_)));
    assert!(matches!(kind("{{end}}"), ErrorKind::Syntax(_)));
    assert!(matches!(kind("{{int 1"), ErrorKind::Syntax(_)));
    assert!(matches!(kind(r#"{{"abc}}"#), ErrorKind::Syntax(_)));
    assert!(matches!(kind("{{}}"), ErrorKind::Syntax(_)));
    assert!(matches!(kind("{{1 | 2}}"), ErrorKind::Syntax(_)));
}

#[test]
fn deeply_nested_expressions_fail_cleanly() {
    let nest = |depth: usize| format!("{{{{{}1{}}}}}", "(".repeat(depth), ")".repeat(depth));
    assert_eq!(expand(&nest(50)).unwrap(), "1");
    assert_eq!(
        kind(&nest(5000)),
        ErrorKind::Syntax("expression nested too deeply".to_string())
    );
}

#[test]
fn deeply_nested_blocks_fail_cleanly() {
    let nest = |depth: usize| format!("{}x{}", "{{if true}}".repeat(depth), "{{end}}".repeat(depth));
    assert_eq!(expand(&nest(20)).unwrap(), "x");
    assert_eq!(
        kind(&nest(5000)),
        ErrorKind::Syntax("blocks nested too deeply".to_string())
    );
}

#[test]
fn error_position_points_at_action() {
    let err = expand("select {{nope}}").unwrap_err();
    assert_eq!(err.at, 9);
    assert_eq!(err.to_string(), "template:9: function \"nope\" not defined");
}

#[test]
fn arity_and_type_checks() {
    assert!(matches!(kind("{{int 1}}"), ErrorKind::Arity { function: "int", .. }));
    assert!(matches!(
        kind(r#"{{char "x"}}"#),
        ErrorKind::Type {
            function: "char",
            expected: "int",
            got: "string"
        }
    ));
    assert!(matches!(
        kind("{{range $i := count 2}}{{last $i 3}}{{end}}"),
        ErrorKind::Type { function: "last", .. }
    ));
}

#[test]
fn head_without_iteration_context_fails() {
    assert_eq!(kind("{{head 0}}"), ErrorKind::NoIterationContext("head"));
}

#[test]
fn oversized_generators_fail() {
    assert!(matches!(kind("{{char 2000000}}"), ErrorKind::Limit { .. }));
    assert!(matches!(kind("{{range count 2000000}}{{end}}"), ErrorKind::Limit { .. }));
}

// --- random helpers ---

#[test]
fn char_has_exact_length() {
    let mut rng = StdRng::seed_from_u64(5);
    for n in [1, 5, 32, 100] {
        let s = random_fixed(&mut rng, n);
        assert_eq!(s.len(), usize::try_from(n).unwrap());
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
    assert_eq!(random_fixed(&mut rng, 0), "");
    assert_eq!(random_fixed(&mut rng, -3), "");
}

#[test]
fn int_stays_in_half_open_range() {
    let mut rng = StdRng::seed_from_u64(6);
    for _ in 0..500 {
        let n = random_int(&mut rng, 3, 7);
        assert!((3..7).contains(&n), "{n} out of range");
    }
    assert_eq!(random_int(&mut rng, 5, 5), 5);
    assert_eq!(random_int(&mut rng, 5, 1), 5);
    assert_eq!(expand("{{int 5 2}}").unwrap(), "5");
}

#[test]
fn varchar_length_in_range() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let len = random_varying(&mut rng, 10).len();
        assert!((5..10).contains(&len), "{len} out of range");
    }
    assert_eq!(random_varying(&mut rng, 1), "");
    assert_eq!(random_varying(&mut rng, 0), "");
}

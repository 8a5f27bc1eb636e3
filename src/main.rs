mod history_cmd;
mod output;
mod query_cmd;

use std::io::IsTerminal as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use sqldiff::config::{Config, Overrides};
use sqldiff::executor::Highlight;
use sqldiff::logging;

use query_cmd::Session;

#[derive(Parser)]
#[command(
    name = "sqldiff",
    version,
    about = "Differential SQL testing: run each query on a reference and a candidate database and highlight where the results diverge"
)]
struct Cli {
    /// Config file (default: config.toml in the sqldiff user directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reference database path
    #[arg(long, global = true)]
    reference: Option<String>,

    /// Candidate database path
    #[arg(long, global = true)]
    candidate: Option<String>,

    /// Append a plain-text diff of every query to this file
    #[arg(long, global = true)]
    diff_log: Option<PathBuf>,

    /// When to colour divergent characters
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Seed template generators for reproducible expansions
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log more (-v info, -vv debug); SQLDIFF_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn highlight(self) -> Highlight {
        match self {
            Self::Always => Highlight::Ansi,
            Self::Never => Highlight::Plain,
            Self::Auto if std::io::stdout().is_terminal() => Highlight::Ansi,
            Self::Auto => Highlight::Plain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query on both databases and show both results
    Query {
        /// The query; words are joined with spaces. Prefix with ! for a template
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        sql: Vec<String>,
    },
    /// Run a script of ;-terminated statements, stopping at the first divergence
    Diff {
        /// Script file, or - for stdin
        file: String,
        /// Report every divergence instead of stopping at the first
        #[arg(long)]
        keep_going: bool,
    },
    /// Print the expansion of a query template without running it
    Expand {
        /// Template text; a leading ! is optional
        template: String,
    },
    /// Read statements from stdin and compare each one
    Shell,
    /// Manage query history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List recent queries, most recent first
    List {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queries matching a regular expression
    Search {
        /// Regular expression
        pattern: String,
    },
    /// Delete the entry at INDEX (as shown by list)
    Delete { index: usize },
    /// Delete all history entries
    Clear,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(Overrides {
        reference: cli.reference.clone(),
        candidate: cli.candidate.clone(),
        diff_log: cli.diff_log.clone(),
    });
    Ok(config)
}

fn or_exit(r: anyhow::Result<i32>) -> i32 {
    r.unwrap_or_else(|e| {
        eprintln!("[sqldiff] error: {e:#}");
        1
    })
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    if let Commands::Expand { template } = &cli.command {
        return query_cmd::cmd_expand(template, cli.seed);
    }

    let config = load_config(cli)?;
    tracing::debug!(
        reference = %config.reference.path,
        candidate = %config.candidate.path,
        "configuration loaded"
    );
    let session = Session {
        config: &config,
        highlight: cli.color.highlight(),
        seed: cli.seed,
    };
    match &cli.command {
        Commands::Query { sql } => query_cmd::cmd_query(sql, &session),
        Commands::Diff { file, keep_going } => query_cmd::cmd_diff(file, *keep_going, &session),
        Commands::Shell => query_cmd::cmd_shell(&session),
        Commands::History { action } => match action {
            HistoryAction::List { limit, json } => {
                history_cmd::cmd_history_list(&config, *limit, *json)
            }
            HistoryAction::Search { pattern } => history_cmd::cmd_history_search(&config, pattern),
            HistoryAction::Delete { index } => history_cmd::cmd_history_delete(&config, *index),
            HistoryAction::Clear => history_cmd::cmd_history_clear(&config),
        },
        Commands::Expand { .. } => Ok(0),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let exit_code = or_exit(run(&cli));
    std::process::exit(exit_code);
}

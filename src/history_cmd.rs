use anyhow::Context as _;
use regex::Regex;

use sqldiff::config::Config;
use sqldiff::history::HistoryStore;

use crate::output;

fn open_store(config: &Config) -> anyhow::Result<HistoryStore> {
    let path = config
        .history
        .resolved_path()
        .context("cannot determine history path")?;
    Ok(HistoryStore::new(path, config.history.retention))
}

pub fn cmd_history_list(config: &Config, limit: usize, json: bool) -> anyhow::Result<i32> {
    let log = open_store(config)?.load()?;
    let entries = &log.items()[..limit.min(log.len())];

    if json {
        output::print_json(entries);
        return Ok(0);
    }
    if entries.is_empty() {
        eprintln!("[sqldiff] no history entries found");
        return Ok(0);
    }
    for (index, entry) in entries.iter().enumerate() {
        println!(
            "{index:>4}  {}  {}",
            entry.last_used,
            output::one_line(&entry.text)
        );
    }
    Ok(0)
}

pub fn cmd_history_search(config: &Config, pattern: &str) -> anyhow::Result<i32> {
    let re = Regex::new(pattern).with_context(|| format!("invalid pattern {pattern:?}"))?;
    let log = open_store(config)?.load()?;
    let hits = log.search(&re);
    if hits.is_empty() {
        eprintln!("[sqldiff] no history entries match {pattern:?}");
        return Ok(1);
    }
    for (index, entry) in hits {
        println!("{index:>4}  {}", output::one_line(&entry.text));
    }
    Ok(0)
}

pub fn cmd_history_delete(config: &Config, index: usize) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let mut log = store.load()?;
    if !log.delete(index) {
        eprintln!("[sqldiff] no history entry at index {index}");
        return Ok(1);
    }
    store.save(&mut log)?;
    eprintln!("[sqldiff] deleted history entry {index}");
    Ok(0)
}

pub fn cmd_history_clear(config: &Config) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let mut log = store.load()?;
    let removed = log.len();
    log.clear();
    store.save(&mut log)?;
    eprintln!("[sqldiff] history cleared ({removed} entries)");
    Ok(0)
}

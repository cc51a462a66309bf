//! REPL – Read-Eval-Print Loop for the Mnemos interactive shell.
//!
//! Supported slash-commands:
//!   /help                                  – show this list
//!   /agent <id>                            – act as another agent
//!   /remember <type> <text> [#tag] [^0.8]  – store a memory
//!   /search <query> [limit=N] [kind=K]     – ranked recall for the current agent
//!   /share <to-agent> <topic>              – copy knowledge to another agent
//!   /pattern <name> <id> <id> ...          – learn a pattern over memories
//!   /consolidate                           – run a consolidation pass now
//!   /graph                                 – knowledge graph summary
//!   /paths <from> <to> [hops]              – paths between two memories
//!   /stats                                 – memory statistics
//!   /save                                  – write the SQLite snapshot
//!   /load [agent]                          – read the snapshot, optionally one agent's
//!   /quit | /exit                          – save and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mnemos_memory::engine::DEFAULT_MAX_HOPS;
use mnemos_memory::{KnowledgeGraph, MemoryKind, SearchFilters, SearchQuery, SnapshotStore};
use mnemos_runtime::SharedEngine;
use mnemos_types::{EntryType, MemoryEntry, MnemosError};

use crate::config;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_IMPORTANCE: f32 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Agent(String),
    Remember {
        entry_type: EntryType,
        text: String,
        tags: Vec<String>,
        importance: f32,
    },
    Search {
        query: String,
        limit: usize,
        kind: Option<MemoryKind>,
    },
    Share {
        to: String,
        topic: String,
    },
    Pattern {
        name: String,
        ids: Vec<String>,
    },
    Consolidate,
    Graph,
    Paths {
        from: String,
        to: String,
        max_hops: usize,
    },
    Stats,
    Save,
    /// Restore the snapshot, optionally only one agent's memories.
    Load(Option<String>),
}

/// Parse one input line into a [`Command`].
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().ok_or_else(|| "empty command".to_string())?;
    let args: Vec<&str> = words.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/consolidate" => Ok(Command::Consolidate),
        "/graph" => Ok(Command::Graph),
        "/stats" => Ok(Command::Stats),
        "/save" => Ok(Command::Save),
        "/load" => match args.as_slice() {
            [] => Ok(Command::Load(None)),
            [agent] => Ok(Command::Load(Some(agent.to_string()))),
            _ => Err("usage: /load [agent]".into()),
        },
        "/agent" => match args.as_slice() {
            [id] => Ok(Command::Agent(id.to_string())),
            _ => Err("usage: /agent <id>".into()),
        },
        "/remember" => parse_remember(&args),
        "/search" => {
            let mut limit = DEFAULT_SEARCH_LIMIT;
            let mut kind = None;
            let mut terms = Vec::new();
            for arg in &args {
                if let Some(n) = arg.strip_prefix("limit=") {
                    limit = n.parse().map_err(|_| format!("invalid limit '{n}'"))?;
                } else if let Some(k) = arg.strip_prefix("kind=") {
                    kind = Some(k.parse::<MemoryKind>().map_err(|e: MnemosError| e.to_string())?);
                } else {
                    terms.push(*arg);
                }
            }
            if terms.is_empty() {
                return Err("usage: /search <query> [limit=N] [kind=K]".into());
            }
            Ok(Command::Search {
                query: terms.join(" "),
                limit,
                kind,
            })
        }
        "/share" => match args.as_slice() {
            [to, topic @ ..] if !topic.is_empty() => Ok(Command::Share {
                to: to.to_string(),
                topic: topic.join(" "),
            }),
            _ => Err("usage: /share <to-agent> <topic>".into()),
        },
        "/pattern" => match args.as_slice() {
            [name, ids @ ..] if !ids.is_empty() => Ok(Command::Pattern {
                name: name.to_string(),
                ids: ids.iter().map(|s| s.to_string()).collect(),
            }),
            _ => Err("usage: /pattern <name> <id> <id> ...".into()),
        },
        "/paths" => match args.as_slice() {
            [from, to] => Ok(Command::Paths {
                from: from.to_string(),
                to: to.to_string(),
                max_hops: DEFAULT_MAX_HOPS,
            }),
            [from, to, hops] => Ok(Command::Paths {
                from: from.to_string(),
                to: to.to_string(),
                max_hops: hops.parse().map_err(|_| format!("invalid hop count '{hops}'"))?,
            }),
            _ => Err("usage: /paths <from> <to> [hops]".into()),
        },
        other => Err(format!("Unknown command: '{other}'")),
    }
}

fn parse_remember(args: &[&str]) -> Result<Command, String> {
    let (kind, rest) = args
        .split_first()
        .ok_or_else(|| "usage: /remember <type> <text> [#tag] [^importance]".to_string())?;
    let entry_type: EntryType = kind.parse().map_err(|e: MnemosError| e.to_string())?;

    let mut tags = Vec::new();
    let mut importance = DEFAULT_IMPORTANCE;
    let mut words = Vec::new();
    for word in rest {
        if let Some(tag) = word.strip_prefix('#')
            && !tag.is_empty()
        {
            tags.push(tag.to_string());
        } else if let Some(value) = word.strip_prefix('^') {
            importance = value
                .parse::<f32>()
                .ok()
                .filter(|v| (0.0..=1.0).contains(v))
                .ok_or_else(|| format!("importance must be in [0, 1], got '{value}'"))?;
        } else {
            words.push(*word);
        }
    }
    if words.is_empty() {
        return Err("nothing to remember".into());
    }
    Ok(Command::Remember {
        entry_type,
        text: words.join(" "),
        tags,
        importance,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Shell state: the shared engine, the acting agent, and the snapshot file.
pub struct Session {
    engine: SharedEngine,
    agent: String,
    snapshot: PathBuf,
}

impl Session {
    pub fn new(engine: SharedEngine, agent: impl Into<String>, snapshot: PathBuf) -> Self {
        Self {
            engine,
            agent: agent.into(),
            snapshot,
        }
    }

    /// Run `cmd`.  Returns `false` when the shell should exit.
    pub fn execute(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Help => cmd_help(),
            Command::Quit => {
                self.cmd_save();
                println!("{}", "Goodbye.".green());
                return false;
            }
            Command::Agent(id) => {
                self.agent = id;
                println!("  Acting as {}", self.agent.bold());
            }
            Command::Remember {
                entry_type,
                text,
                tags,
                importance,
            } => self.cmd_remember(entry_type, text, tags, importance),
            Command::Search { query, limit, kind } => self.cmd_search(&query, limit, kind),
            Command::Share { to, topic } => self.cmd_share(&to, &topic),
            Command::Pattern { name, ids } => self.cmd_pattern(&name, &ids),
            Command::Consolidate => self.cmd_consolidate(),
            Command::Graph => self.cmd_graph(),
            Command::Paths { from, to, max_hops } => self.cmd_paths(&from, &to, max_hops),
            Command::Stats => self.cmd_stats(),
            Command::Save => self.cmd_save(),
            Command::Load(agent) => self.cmd_load(agent.as_deref()),
        }
        true
    }

    fn cmd_remember(&self, entry_type: EntryType, text: String, tags: Vec<String>, importance: f32) {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = MemoryEntry::new(id, entry_type, text, self.agent.as_str())
            .with_tags(tags)
            .with_relevance(importance);
        match self.engine.blocking_lock().store_memory(entry, &self.agent) {
            Ok(id) => println!("{} {}", "✓ Remembered".green(), id.dimmed()),
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }

    fn cmd_search(&self, query: &str, limit: usize, kind: Option<MemoryKind>) {
        let filters = SearchFilters {
            kind,
            ..SearchFilters::for_agent(self.agent.as_str())
        };
        let search = SearchQuery::text(query).with_filters(filters).with_limit(limit);
        let mut engine = self.engine.blocking_lock();
        let threshold = engine.config().search_threshold;
        match engine.search(search.with_threshold(threshold)) {
            Ok(hits) if hits.is_empty() => println!("  {}", "no matching memories".dimmed()),
            Ok(hits) => {
                for hit in hits {
                    println!(
                        "  {:.3}  {}  {}",
                        hit.similarity,
                        hit.entry.id.dimmed(),
                        hit.entry.content.render()
                    );
                }
            }
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }

    fn cmd_share(&self, to: &str, topic: &str) {
        match self
            .engine
            .blocking_lock()
            .share_knowledge(&self.agent, to, topic)
        {
            Ok(shared) => println!(
                "{} {} memories shared with {}",
                "✓".green(),
                shared.len(),
                to.bold()
            ),
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }

    fn cmd_pattern(&self, name: &str, ids: &[String]) {
        match self.engine.blocking_lock().learn_pattern(ids, name) {
            Ok(pattern) => println!(
                "{} pattern {} (importance {:.2})",
                "✓ Learned".green(),
                pattern.id.dimmed(),
                pattern.importance
            ),
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }

    fn cmd_consolidate(&self) {
        let report = self.engine.blocking_lock().consolidate_memories();
        println!("{}", "Consolidation".bold().underline());
        println!("  Status            : {:?}", report.status);
        println!("  Clusters formed   : {}", report.clusters_formed);
        println!("  Obsolete removed  : {}", report.obsolete_entries_removed);
        println!("  Communities       : {}", report.communities_detected);
        for pattern in &report.patterns_identified {
            println!("  • {}", pattern);
        }
        for insight in &report.insights {
            println!("  {} {}", "›".cyan(), insight);
        }
    }

    fn cmd_graph(&self) {
        let engine = self.engine.blocking_lock();
        let graph = engine.get_knowledge_graph();
        println!("{}", "Knowledge Graph".bold().underline());
        println!("  Nodes       : {}", graph.node_count());
        println!("  Edges       : {}", graph.edge_count());
        println!("  Communities : {}", graph.communities().len());
        for community in graph.communities() {
            println!(
                "    {} {} ({} members, coherence {:.2})",
                community.id.dimmed(),
                community.topic.bold(),
                community.members.len(),
                community.coherence
            );
        }
    }

    fn cmd_paths(&self, from: &str, to: &str, max_hops: usize) {
        let engine = self.engine.blocking_lock();
        let paths = engine.find_knowledge_paths(from, to, max_hops);
        if paths.is_empty() {
            println!("  {}", "no path".dimmed());
            return;
        }
        let graph = engine.get_knowledge_graph();
        for path in paths {
            println!("  {}", render_path(&graph, &path));
        }
    }

    fn cmd_stats(&self) {
        let stats = self.engine.blocking_lock().get_memory_stats();
        println!("{}", "Memory Statistics".bold().underline());
        println!("  Entries            : {}", stats.total_entries);
        println!("  Average importance : {:.2}", stats.average_importance);
        println!("  Graph              : {} nodes, {} edges", stats.graph_nodes, stats.graph_edges);
        println!("  Clusters           : {}", stats.clusters);
        println!("  Scheduler          : {:?}", stats.scheduler_state);
        if let Some(at) = stats.last_consolidation {
            println!("  Last consolidation : {}", at.to_rfc3339());
        }
        for (agent, count) in &stats.entries_by_agent {
            println!("    {:<20} {}", agent, count);
        }
        for (kind, count) in &stats.entries_by_type {
            println!("    {:<20} {}", kind.as_str(), count);
        }
        match snapshot_summary(&self.snapshot) {
            Ok(Some((count, newest))) => println!(
                "  Snapshot           : {} memories, newest {}",
                count,
                newest.as_deref().unwrap_or("-")
            ),
            Ok(None) => println!("  Snapshot           : {}", "none yet".dimmed()),
            Err(e) => println!("  Snapshot           : {}", e.red()),
        }
    }

    fn cmd_save(&self) {
        match save_snapshot(&self.engine, &self.snapshot) {
            Ok(n) => println!(
                "{} {} memories to {}",
                "✓ Saved".green(),
                n,
                self.snapshot.display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error saving snapshot".red(), e),
        }
    }

    fn cmd_load(&self, agent: Option<&str>) {
        match load_snapshot(&self.engine, &self.snapshot, agent) {
            Ok(n) => println!("{} {} new memories", "✓ Loaded".green(), n),
            Err(e) => println!("{}: {}", "Error loading snapshot".red(), e),
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &mut Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", format!("mnemos({})>", session.agent).bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Ok(cmd) => {
                if !session.execute(cmd) {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Err(e) => println!(
                "{} Type {} for available commands.",
                e.red(),
                "/help".bold()
            ),
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Mnemos Commands".bold().underline());
    println!("  {}  – act as another agent", "/agent <id>".bold().cyan());
    println!(
        "  {}  – store a memory (types: task, decision, insight, error, feedback)",
        "/remember <type> <text> [#tag] [^0.8]".bold().cyan()
    );
    println!("  {}  – ranked recall", "/search <query> [limit=N] [kind=K]".bold().cyan());
    println!("  {}  – copy knowledge to another agent", "/share <agent> <topic>".bold().cyan());
    println!("  {}  – learn a pattern", "/pattern <name> <id>...".bold().cyan());
    println!("  {}  – run a consolidation pass", "/consolidate".bold().cyan());
    println!("  {}  – knowledge graph summary", "/graph".bold().cyan());
    println!("  {}  – paths between memories", "/paths <from> <to> [hops]".bold().cyan());
    println!("  {}  – memory statistics", "/stats".bold().cyan());
    println!("  {}  – write / read the snapshot", "/save  /load [agent]".bold().cyan());
    println!("  {}  – save and exit", "/quit  /exit".bold().cyan());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Write every memory to the snapshot at `path`.  Returns how many were saved.
pub fn save_snapshot(engine: &SharedEngine, path: &Path) -> Result<usize, String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        config::ensure_private_dir(parent)?;
    }
    let entries = engine.blocking_lock().export_memories(None);
    let mut store = SnapshotStore::open(path).map_err(|e| e.to_string())?;
    store.save(&entries).map_err(|e| e.to_string())
}

/// Import the snapshot at `path`, or only `agent`'s part of it, skipping ids
/// already in memory.  A missing file imports nothing.
pub fn load_snapshot(engine: &SharedEngine, path: &Path, agent: Option<&str>) -> Result<usize, String> {
    if !path.exists() {
        return Ok(0);
    }
    let store = SnapshotStore::open(path).map_err(|e| e.to_string())?;
    let entries = match agent {
        Some(agent) => store.load_agent(agent),
        None => store.load_all(),
    }
    .map_err(|e| e.to_string())?;
    engine
        .blocking_lock()
        .import_memories(entries)
        .map_err(|e| e.to_string())
}

/// `a →(0.93) b →(0.81) c`, with each hop's edge weight.
fn render_path(graph: &KnowledgeGraph, path: &[String]) -> String {
    let mut out = path.first().cloned().unwrap_or_default();
    for hop in path.windows(2) {
        match graph.edge_between(&hop[0], &hop[1]) {
            Some(edge) => out.push_str(&format!(" →({:.2}) ", edge.weight)),
            None => out.push_str(" → "),
        }
        out.push_str(&hop[1]);
    }
    out
}

/// Entry count and newest creation time (RFC 3339) of the snapshot at
/// `path`, or `None` when there is no snapshot yet.
pub fn snapshot_summary(path: &Path) -> Result<Option<(usize, Option<String>)>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let store = SnapshotStore::open(path).map_err(|e| e.to_string())?;
    let count = store.count().map_err(|e| e.to_string())?;
    let newest = store.newest().map_err(|e| e.to_string())?;
    Ok(Some((count, newest.map(|at| at.to_rfc3339()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemos_memory::{MemoryConfig, MemoryEngine};
    use mnemos_runtime::shared;

    fn engine() -> SharedEngine {
        shared(MemoryEngine::new(MemoryConfig::default()).unwrap())
    }

    // ── parse ────────────────────────────────────────────────────────────────

    #[test]
    fn parse_remember_collects_tags_and_importance() {
        let cmd = parse("/remember insight retry flaky uploads #ci #uploads ^0.8").unwrap();
        assert_eq!(
            cmd,
            Command::Remember {
                entry_type: EntryType::Insight,
                text: "retry flaky uploads".into(),
                tags: vec!["ci".into(), "uploads".into()],
                importance: 0.8,
            }
        );
    }

    #[test]
    fn parse_remember_rejects_bad_input() {
        assert!(parse("/remember banana hello").is_err());
        assert!(parse("/remember task #only-tags").is_err());
        assert!(parse("/remember task hi ^1.5").is_err());
    }

    #[test]
    fn parse_search_with_limit() {
        assert_eq!(
            parse("/search flaky uploads limit=3 kind=decision").unwrap(),
            Command::Search {
                query: "flaky uploads".into(),
                limit: 3,
                kind: Some(MemoryKind::Decision),
            }
        );
        assert!(parse("/search x kind=memo").is_err());
        assert!(parse("/search limit=3").is_err());
        assert!(parse("/search x limit=many").is_err());
    }

    #[test]
    fn parse_share_pattern_and_paths() {
        assert_eq!(
            parse("/share agentB cats and dogs").unwrap(),
            Command::Share {
                to: "agentB".into(),
                topic: "cats and dogs".into()
            }
        );
        assert_eq!(
            parse("/pattern habits a b").unwrap(),
            Command::Pattern {
                name: "habits".into(),
                ids: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(
            parse("/paths a b").unwrap(),
            Command::Paths {
                from: "a".into(),
                to: "b".into(),
                max_hops: DEFAULT_MAX_HOPS
            }
        );
        assert!(parse("/share agentB").is_err());
        assert!(parse("/pattern lonely").is_err());
    }

    #[test]
    fn parse_unknown_command_is_error() {
        assert!(parse("/teleport").unwrap_err().contains("Unknown command"));
        assert_eq!(parse("/exit").unwrap(), Command::Quit);
    }

    // ── session ──────────────────────────────────────────────────────────────

    #[test]
    fn remember_then_search_uses_current_agent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let mut session = Session::new(engine.clone(), "alice", dir.path().join("m.db"));

        assert!(session.execute(parse("/remember task deploy the api #deploy").unwrap()));
        assert!(session.execute(parse("/agent bob").unwrap()));
        assert!(session.execute(parse("/remember task deploy the api").unwrap()));

        let stats = engine.blocking_lock().get_memory_stats();
        assert_eq!(stats.entries_by_agent["alice"], 1);
        assert_eq!(stats.entries_by_agent["bob"], 1);
    }

    #[test]
    fn quit_saves_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("m.db");
        let engine = engine();
        let mut session = Session::new(engine, "alice", path.clone());
        session.execute(parse("/remember decision use sqlite").unwrap());
        assert!(!session.execute(Command::Quit));
        assert!(path.exists());
    }

    // ── snapshot helpers ─────────────────────────────────────────────────────

    #[test]
    fn snapshot_roundtrip_through_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        let source = engine();
        source
            .blocking_lock()
            .store_memory(MemoryEntry::new("m1", EntryType::Task, "ship it", "a"), "a")
            .unwrap();
        assert_eq!(save_snapshot(&source, &path).unwrap(), 1);

        let target = engine();
        assert_eq!(load_snapshot(&target, &path, None).unwrap(), 1);
        assert_eq!(load_snapshot(&target, &path, None).unwrap(), 0);
        assert!(target.blocking_lock().get_entry("m1").is_ok());
    }

    #[test]
    fn load_can_restrict_to_one_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        let source = engine();
        {
            let mut e = source.blocking_lock();
            e.store_memory(MemoryEntry::new("a1", EntryType::Task, "ship it", "a"), "a").unwrap();
            e.store_memory(MemoryEntry::new("b1", EntryType::Task, "review it", "b"), "b").unwrap();
        }
        save_snapshot(&source, &path).unwrap();

        let target = engine();
        assert_eq!(load_snapshot(&target, &path, Some("b")).unwrap(), 1);
        assert!(target.blocking_lock().get_entry("a1").is_err());
        assert!(target.blocking_lock().get_entry("b1").is_ok());
    }

    #[test]
    fn snapshot_summary_reports_count_and_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        assert_eq!(snapshot_summary(&path).unwrap(), None);

        let source = engine();
        source
            .blocking_lock()
            .store_memory(MemoryEntry::new("m1", EntryType::Task, "ship it", "a"), "a")
            .unwrap();
        save_snapshot(&source, &path).unwrap();
        let (count, newest) = snapshot_summary(&path).unwrap().unwrap();
        assert_eq!(count, 1);
        assert!(newest.is_some());
    }

    #[test]
    fn paths_render_edge_weights() {
        let e = engine();
        {
            let mut e = e.blocking_lock();
            e.store_memory(MemoryEntry::new("x", EntryType::Task, "rotate ftp keys", "a"), "a").unwrap();
            e.store_memory(MemoryEntry::new("y", EntryType::Task, "rotate ftp keys", "a"), "a").unwrap();
        }
        let graph = e.blocking_lock().get_knowledge_graph();
        let line = render_path(&graph, &["x".to_string(), "y".to_string()]);
        assert_eq!(line, "x →(1.00) y");
        assert_eq!(render_path(&graph, &["x".to_string()]), "x");
    }

    #[test]
    fn parse_load_takes_optional_agent() {
        assert_eq!(parse("/load").unwrap(), Command::Load(None));
        assert_eq!(parse("/load ops").unwrap(), Command::Load(Some("ops".into())));
        assert!(parse("/load a b").is_err());
    }

    #[test]
    fn missing_snapshot_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_snapshot(&engine(), &dir.path().join("none.db"), None).unwrap(), 0);
    }
}

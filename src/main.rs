//! trace CLI - a distributed issue tracker with git-friendly JSONL logs.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use trace::{Collection, Config, EdgeKind, Filter, Issue, Status, Store, SyncEngine, Synced};

mod cli;

use cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trace")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("trace.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Absolute form of a collection directory.
fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(dir) {
        return Ok(canonical);
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(dir))
}

fn collection_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.dir {
        Some(dir) => absolute_dir(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

fn default_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "trace".to_string())
}

/// Find the collection for `dir`, registering it if a log is already there.
fn resolve_collection(store: &mut Store, dir: &Path) -> Result<Collection> {
    let id = dir.to_string_lossy().to_string();
    if let Some(collection) = store.get_collection(&id)? {
        return Ok(collection);
    }
    if dir.join(".trace").join("issues.jsonl").exists() {
        return store.register_collection(dir, &default_name(dir));
    }
    eyre::bail!("{} is not a trace collection; run `trc init` first", dir.display())
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Open => "open".green(),
        Status::InProgress => "in_progress".yellow(),
        Status::Blocked => "blocked".red(),
        Status::Closed => "closed".blue(),
    }
}

fn print_issue_line(issue: &Issue) {
    println!(
        "{} {} P{} {}",
        format_status(&issue.status),
        issue.id.cyan(),
        issue.priority,
        issue.title
    );
}

fn report_sync<T>(synced: &Synced<T>) {
    for import in &synced.imports {
        info!(
            "import {}: {} created, {} updated, {} skipped",
            import.collection_id, import.created, import.updated, import.skipped
        );
        for warning in &import.warnings {
            eprintln!("{} {}: {}", "warning:".yellow().bold(), import.collection_id, warning);
        }
    }
    for export in synced.exports.iter().filter(|e| e.skipped > 0) {
        eprintln!(
            "{} {}: {} issue(s) not exported, ids do not match the prefix (run `trc repair`)",
            "warning:".yellow().bold(),
            export.collection_id,
            export.skipped
        );
    }
}

fn print_tree(store: &Store, issue: &Issue, depth: usize) -> Result<()> {
    let marker = if store.is_blocked(&issue.id)? { " ⊘".red().to_string() } else { String::new() };
    println!(
        "{}{} {} P{} {}{}",
        "  ".repeat(depth),
        format_status(&issue.status),
        issue.id.cyan(),
        issue.priority,
        issue.title,
        marker
    );
    for child in store.children(&issue.id)? {
        print_tree(store, &child, depth + 1)?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let dir = collection_dir(&cli)?;
    let config = Config::load().context("Failed to load config")?;
    let mut store = Store::open(&config.db_path()).context("Failed to open store")?;
    let engine = SyncEngine::from_config(&config);

    if let Command::Init { name } = &cli.command {
        let name = name.clone().unwrap_or_else(|| default_name(&dir));
        let collection = store
            .register_collection(&dir, &name)
            .context("Failed to register collection")?;
        let synced = engine.sync(&mut store, &[collection.clone()], |_| Ok(()))?;
        report_sync(&synced);
        // An existing log may have supplied the prefix.
        let collection = store.require_collection(&collection.id)?;
        println!(
            "{} Initialized collection {} (prefix {}) in {}",
            "✓".green(),
            collection.name,
            collection.prefix.cyan(),
            collection.id
        );
        return Ok(());
    }

    if let Command::Sync = &cli.command {
        let collections = store.list_collections()?;
        let synced = engine.sync(&mut store, &collections, |_| Ok(()))?;
        report_sync(&synced);
        for import in &synced.imports {
            println!(
                "{} imported {}: {} created, {} updated, {} skipped",
                "←".blue(),
                import.collection_id,
                import.created,
                import.updated,
                import.skipped
            );
        }
        for export in synced.exports.iter().filter(|e| e.written) {
            println!("{} exported {} ({} issues)", "→".blue(), export.collection_id, export.records);
        }
        println!("{} {} collection(s) in sync", "✓".green(), synced.exports.len());
        return Ok(());
    }

    if let Command::Repair { dry_run } = &cli.command {
        let collections = store.list_collections()?;
        let synced = engine.sync(&mut store, &collections, |store| store.repair_prefixes(None, *dry_run))?;
        report_sync(&synced);
        let report = synced.value;
        println!("Examined: {} issues", report.examined);
        println!("Mismatched: {}", report.mismatched);
        if *dry_run {
            println!("Would repair: {}", report.repaired);
        } else {
            println!("{} Repaired: {}", "✓".green(), report.repaired);
        }
        for id in &report.orphaned {
            eprintln!("{} {} matches no registered collection", "warning:".yellow().bold(), id.cyan());
        }
        return Ok(());
    }

    let collection = resolve_collection(&mut store, &dir)?;
    let cid = collection.id.clone();
    let scoped = [collection.clone()];

    match cli.command {
        Command::Init { .. } | Command::Sync | Command::Repair { .. } => {}

        Command::Create {
            title,
            priority,
            description,
            parent,
        } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                store.create(&cid, &title, priority, description.as_deref(), parent.as_deref())
            })?;
            report_sync(&synced);
            let issue = synced.value;
            println!("{} Created: {} {}", "✓".green(), issue.id.cyan(), issue.title);
        }

        Command::List { status, all } => {
            let collections = if all { store.list_collections()? } else { scoped.to_vec() };
            let synced = engine.sync(&mut store, &collections, |store| {
                let mut filter = Filter::new();
                if !all {
                    filter = filter.collection(cid.as_str());
                }
                match status {
                    Some(status) => filter = filter.status(status),
                    None => filter = filter.not_closed(),
                }
                store.list(&filter)
            })?;
            report_sync(&synced);

            if synced.value.is_empty() {
                println!("{}", "No issues found".dimmed());
            } else {
                for issue in &synced.value {
                    print_issue_line(issue);
                    if let Some(desc) = &issue.description {
                        println!("    {}", desc.dimmed());
                    }
                }
            }
        }

        Command::Ready { all } => {
            let collections = if all { store.list_collections()? } else { scoped.to_vec() };
            let synced = engine.sync(&mut store, &collections, |store| {
                store.ready(if all { None } else { Some(cid.as_str()) })
            })?;
            report_sync(&synced);

            if synced.value.is_empty() {
                println!("{}", "No ready issues".dimmed());
            } else {
                println!("{} {} issue(s) ready to work on:", "→".blue(), synced.value.len());
                for issue in &synced.value {
                    println!("  {} P{} {}", issue.id.cyan(), issue.priority, issue.title);
                }
            }
        }

        Command::Blocked { all } => {
            let collections = if all { store.list_collections()? } else { scoped.to_vec() };
            let synced = engine.sync(&mut store, &collections, |store| {
                let issues = store.blocked(if all { None } else { Some(cid.as_str()) })?;
                let mut rows = Vec::new();
                for issue in issues {
                    let blockers = store.blockers(&issue.id)?;
                    rows.push((issue, blockers));
                }
                Ok(rows)
            })?;
            report_sync(&synced);

            if synced.value.is_empty() {
                println!("{}", "No blocked issues".dimmed());
            } else {
                println!("{} {} issue(s) blocked:", "⊘".red(), synced.value.len());
                for (issue, blockers) in &synced.value {
                    println!("  {} P{} {}", issue.id.cyan(), issue.priority, issue.title);
                    for blocker in blockers {
                        println!("      {} {} {}", "by".dimmed(), blocker.id.cyan(), blocker.title);
                    }
                }
            }
        }

        Command::Show { id } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                let issue = store.require(&id)?;
                let outgoing = store.outgoing_edges(&id)?;
                let incoming = store.incoming_edges(&id)?;
                let comments = store.comments(&id)?;
                let blocked = store.is_blocked(&id)?;
                Ok((issue, outgoing, incoming, comments, blocked))
            })?;
            report_sync(&synced);
            let (issue, outgoing, incoming, comments, blocked) = synced.value;

            println!("{}: {}", "ID".bold(), issue.id.cyan());
            println!("{}: {}", "Title".bold(), issue.title);
            println!("{}: {}", "Status".bold(), format_status(&issue.status));
            println!("{}: P{}", "Priority".bold(), issue.priority);
            println!("{}: {}", "Collection".bold(), issue.collection_id);
            if let Some(desc) = &issue.description {
                println!("{}: {}", "Description".bold(), desc);
            }
            println!("{}: {}", "Created".bold(), issue.created_at);
            println!("{}: {}", "Updated".bold(), issue.updated_at);
            if let Some(closed_at) = &issue.closed_at {
                println!("{}: {}", "Closed".bold(), closed_at);
            }
            if blocked {
                println!("{}: {}", "Blocked".bold(), "yes".red());
            }
            for edge in &outgoing {
                println!("  {} {} {}", "→".blue(), edge.kind, edge.to_id.cyan());
            }
            for edge in &incoming {
                println!("  {} {} {}", "←".blue(), edge.kind, edge.from_id.cyan());
            }
            if !comments.is_empty() {
                println!("{}:", "Comments".bold());
                for comment in &comments {
                    println!("  [{}] {}: {}", comment.created_at, comment.source.dimmed(), comment.content);
                }
            }
        }

        Command::Tree { id } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                let issue = store.require(&id)?;
                print_tree(store, &issue, 0)
            })?;
            report_sync(&synced);
        }

        Command::Update {
            id,
            title,
            description,
            priority,
        } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                store.update(&id, title.as_deref(), description.as_deref().map(Some), priority)
            })?;
            report_sync(&synced);
            println!("{} Updated: {} {}", "✓".green(), synced.value.id.cyan(), synced.value.title);
        }

        Command::Start { id } => {
            let synced = engine.sync(&mut store, &scoped, |store| store.set_status(&id, Status::InProgress))?;
            report_sync(&synced);
            println!("{} Started: {} {}", "→".blue(), synced.value.id.cyan(), synced.value.title);
        }

        Command::Reopen { id } => {
            let synced = engine.sync(&mut store, &scoped, |store| store.set_status(&id, Status::Open))?;
            report_sync(&synced);
            println!("{} Reopened: {} {}", "✓".green(), synced.value.id.cyan(), synced.value.title);
        }

        Command::Close { ids, force } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                let mut outcomes = Vec::new();
                for id in &ids {
                    outcomes.push(store.close(id, force)?);
                }
                Ok(outcomes)
            })?;
            report_sync(&synced);
            for outcome in &synced.value {
                for warning in &outcome.warnings {
                    eprintln!("{} {}", "warning:".yellow().bold(), warning);
                }
                println!("{} Closed: {} {}", "✓".green(), outcome.issue.id.cyan(), outcome.issue.title);
            }
        }

        Command::Block { blocked_id, blocker_id } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                store.add_edge(&blocked_id, &blocker_id, EdgeKind::Blocks)
            })?;
            report_sync(&synced);
            println!(
                "{} {} is now blocked by {}",
                "✓".green(),
                blocked_id.cyan(),
                blocker_id.cyan()
            );
        }

        Command::Relate { from_id, to_id } => {
            let synced = engine.sync(&mut store, &scoped, |store| {
                store.add_edge(&from_id, &to_id, EdgeKind::Related)
            })?;
            report_sync(&synced);
            println!("{} {} is related to {}", "✓".green(), from_id.cyan(), to_id.cyan());
        }

        Command::Reparent { id, parent, none } => {
            let parent = if none { None } else { parent };
            let synced = engine.sync(&mut store, &scoped, |store| store.reparent(&id, parent.as_deref()))?;
            report_sync(&synced);
            match synced.value {
                Some(edge) => println!("{} {} is now a child of {}", "✓".green(), id.cyan(), edge.to_id.cyan()),
                None => println!("{} {} is now top level", "✓".green(), id.cyan()),
            }
        }

        Command::Unlink { from_id, to_id, kind } => {
            let synced = engine.sync(&mut store, &scoped, |store| store.remove_edge(&from_id, &to_id, kind))?;
            report_sync(&synced);
            if synced.value {
                println!("{} Removed {} edge {} → {}", "✓".green(), kind, from_id.cyan(), to_id.cyan());
            } else {
                println!("{}", format!("No {} edge {} → {}", kind, from_id, to_id).dimmed());
            }
        }

        Command::Move {
            id,
            target,
            with_children,
        } => {
            let target_dir = absolute_dir(&target)?;
            let target = resolve_collection(&mut store, &target_dir)?;
            let synced = engine.sync(&mut store, &[collection.clone(), target.clone()], |store| {
                store.move_issue(&id, &target.id, with_children)
            })?;
            report_sync(&synced);
            for (old, new) in &synced.value.renamed {
                println!("{} Moved {} → {}", "✓".green(), old.cyan(), new.cyan());
            }
        }

        Command::Comment { id, text, source } => {
            let synced = engine.sync(&mut store, &scoped, |store| store.add_comment(&id, &text, &source))?;
            report_sync(&synced);
            println!("{} Comment added to {}", "✓".green(), synced.value.issue_id.cyan());
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

//! CLI subcommands for non-interactive mode (JSON output for scripts)

use anyhow::{bail, Context, Result};
use chatdesk::{
    config::Config,
    controller::{Controller, ReplyOutcome},
    exchange::HttpExchange,
    format::session_to_html,
    selector::parse_selector,
    session::{AskOutput, ListOutput, NumberedTurn, ShowOutput},
    store::{FileBackend, SessionStore},
};
use std::path::PathBuf;

fn open_store(config: &Config) -> Result<SessionStore> {
    let backend = FileBackend::new(&config.data_dir);
    SessionStore::load(Box::new(backend))
        .with_context(|| format!("Failed to load sessions from {}", config.data_dir.display()))
}

/// Resolve a full id or unique prefix to a stored session id
fn resolve_session(store: &SessionStore, id_or_prefix: &str) -> Result<String> {
    store
        .resolve_id(id_or_prefix)
        .ok_or_else(|| anyhow::anyhow!("Session not found: {}", id_or_prefix))
}

/// Run the ask subcommand: one exchange, printed as JSON
pub fn run_ask(
    config: &Config,
    runtime: &tokio::runtime::Runtime,
    query: &str,
    session: Option<String>,
    new: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Query is empty");
    }

    let store = open_store(config)?;
    let target = session
        .map(|s| resolve_session(&store, &s))
        .transpose()?;

    let mut controller = Controller::new(store, config.support_email.clone());
    // A fresh install already starts on an empty chat
    let active_is_empty = controller.active().is_some_and(|s| s.turns.is_empty());
    if new && !active_is_empty {
        controller.new_chat();
    } else if let Some(id) = target {
        controller.select_session(&id)?;
    }

    let exchange = HttpExchange::new(&config.base_url, config.timeout)
        .context("Failed to set up the answering service client")?;
    let outcome = runtime.block_on(controller.exchange_once(&exchange, query));

    if let Some(e) = controller.take_persist_error() {
        bail!("Failed to save sessions: {}", e);
    }

    let failed = match outcome {
        Some(ReplyOutcome::Applied { failed }) => failed,
        Some(ReplyOutcome::Stale) | None => bail!("No reply was recorded"),
    };

    let session = controller
        .active()
        .context("Active session disappeared")?;
    let reply = session
        .turns
        .last()
        .context("Session has no reply")?;

    let output = AskOutput {
        session_id: session.id.clone(),
        title: session.title.clone(),
        answer: reply.content.clone(),
        sources: reply.sources.clone(),
        escalation_link: reply.escalation_link.clone(),
        failed,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run the list subcommand
pub fn run_list(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;

    let output = ListOutput {
        sessions: store
            .sorted()
            .into_iter()
            .take(limit)
            .map(|s| s.to_summary())
            .collect(),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run the show subcommand with selector support
pub fn run_show(config: &Config, selector_str: &str) -> Result<()> {
    let selector =
        parse_selector(selector_str).map_err(|e| anyhow::anyhow!("Invalid selector: {}", e))?;

    let store = open_store(config)?;
    let id = resolve_session(&store, &selector.session_id)?;
    let session = store
        .get(&id)
        .with_context(|| format!("Session not found: {}", id))?;

    let range = selector.turns.resolve(session.turns.len())?;
    let turns = session.turns[range.clone()]
        .iter()
        .zip(range.start + 1..)
        .map(|(turn, index)| NumberedTurn {
            index,
            turn: turn.clone(),
        })
        .collect();

    let output = ShowOutput {
        session_id: session.id.clone(),
        title: session.title.clone(),
        updated_at: session.updated_at,
        total_turns: session.turns.len(),
        turns,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run the export subcommand: a standalone HTML transcript
pub fn run_export(config: &Config, id_or_prefix: &str, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    let id = resolve_session(&store, id_or_prefix)?;
    let session = store
        .get(&id)
        .with_context(|| format!("Session not found: {}", id))?;

    let html = session_to_html(session);
    match output {
        Some(path) => {
            std::fs::write(&path, html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} to {}", id, path.display());
        }
        None => print!("{}", html),
    }
    Ok(())
}

/// Run the health subcommand
pub fn run_health(config: &Config, runtime: &tokio::runtime::Runtime) -> Result<()> {
    let exchange = HttpExchange::new(&config.base_url, config.timeout)
        .context("Failed to set up the answering service client")?;
    let report = runtime
        .block_on(exchange.health())
        .with_context(|| format!("Answering service at {} is unreachable", exchange.base_url()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

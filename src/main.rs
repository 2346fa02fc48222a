use anyhow::{Context, Result};
use chatdesk::{
    app::{App, Status},
    config::{Config, DEFAULT_BASE_URL, DEFAULT_SUPPORT_EMAIL, DEFAULT_TIMEOUT_SECS},
    controller::Controller,
    exchange::HttpExchange,
    logging,
    store::{FileBackend, SessionStore},
    tui, ui,
};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers, MouseEventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

#[derive(Parser)]
#[command(name = "chatdesk")]
#[command(version, about = "Chat with the student-support assistant from your terminal")]
#[command(after_help = "Run without a subcommand to open the interactive chat.")]
struct Cli {
    /// Base URL of the answering service
    #[arg(long, global = true, env = "CHATDESK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Seconds to wait for a reply before giving up
    #[arg(long, global = true, env = "CHATDESK_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Address offered as the contact link when the service cannot answer
    #[arg(long, global = true, env = "CHATDESK_SUPPORT_EMAIL", default_value = DEFAULT_SUPPORT_EMAIL)]
    support_email: String,

    /// Directory holding saved conversations and the log file
    #[arg(long, global = true, env = "CHATDESK_HOME")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the reply as JSON
    Ask {
        /// The question
        #[arg(required = true)]
        query: Vec<String>,

        /// Continue this session (id or unique prefix) instead of the active one
        #[arg(long, conflicts_with = "new")]
        session: Option<String>,

        /// Start a new session for this question
        #[arg(long)]
        new: bool,
    },

    /// List saved conversations, most recent first
    List {
        /// Maximum number of sessions
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Print a conversation as JSON
    ///
    /// Selector formats:
    ///   abc123       Whole session
    ///   abc123:5     Turn 5
    ///   abc123:2-5   Turns 2 through 5
    ///   abc123:-3    Last 3 turns
    #[command(verbatim_doc_comment)]
    Show {
        /// Session id (or unique prefix) with optional turn selector
        selector: String,
    },

    /// Export a conversation as a standalone HTML page
    Export {
        /// Session id or unique prefix
        id: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the answering service is up
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::new(
        &cli.base_url,
        cli.timeout_secs,
        &cli.support_email,
        cli.data_dir,
    )?;
    logging::init(&config.log_path())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Some(Commands::Ask {
            query,
            session,
            new,
        }) => cli::run_ask(&config, &runtime, &query.join(" "), session, new),
        Some(Commands::List { limit }) => cli::run_list(&config, limit),
        Some(Commands::Show { selector }) => cli::run_show(&config, &selector),
        Some(Commands::Export { id, output }) => cli::run_export(&config, &id, output),
        Some(Commands::Health) => cli::run_health(&config, &runtime),
        None => run_tui(&config, &runtime),
    }
}

fn run_tui(config: &Config, runtime: &tokio::runtime::Runtime) -> Result<()> {
    let store = SessionStore::load(Box::new(FileBackend::new(&config.data_dir)))
        .with_context(|| format!("Failed to load sessions from {}", config.data_dir.display()))?;
    let controller = Controller::new(store, config.support_email.clone());
    let exchange = Arc::new(
        HttpExchange::new(&config.base_url, config.timeout)
            .context("Failed to set up the answering service client")?,
    );
    tracing::info!(base_url = %config.base_url, "starting interactive session");

    let mut app = App::new(controller, exchange, runtime.handle().clone());

    // Initialize terminal
    let mut terminal = tui::init()?;

    // Main event loop
    let result = run(&mut terminal, &mut app);

    // Restore terminal
    tui::restore()?;

    result
}

fn run(terminal: &mut tui::Tui, app: &mut App) -> Result<()> {
    loop {
        // Apply replies that arrived since the last frame
        app.poll_replies();

        // Render
        terminal.draw(|frame| ui::render(frame, app))?;

        if app.should_quit {
            break;
        }

        // Handle all pending events (drain queue to prevent mouse event flooding)
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                // On Windows, crossterm sends both Press and Release events.
                // Only handle Press to avoid double input.
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                    match key.code {
                        KeyCode::Char('c') if ctrl => app.should_quit = true,
                        KeyCode::Char('n') if ctrl => app.on_new_chat(),
                        KeyCode::Char('l') if ctrl => app.on_clear_request(),
                        KeyCode::Char('b') if ctrl => app.toggle_sidebar(),
                        KeyCode::Char('y') if ctrl => app.on_copy_link(),
                        KeyCode::Up if ctrl => app.on_select_relative(-1),
                        KeyCode::Down if ctrl => app.on_select_relative(1),
                        KeyCode::Esc => app.on_escape(),
                        KeyCode::Enter => app.on_enter(),
                        KeyCode::Up => app.scroll_up(1),
                        KeyCode::Down => app.scroll_down(1),
                        KeyCode::Left => app.on_left(),
                        KeyCode::Right => app.on_right(),
                        KeyCode::Home => app.on_home(),
                        KeyCode::End => app.on_end(),
                        KeyCode::Delete => app.on_delete(),
                        KeyCode::PageUp => app.scroll_up(15),
                        KeyCode::PageDown => app.scroll_down(15),
                        KeyCode::Backspace => app.on_backspace(),
                        KeyCode::Char(c) if !ctrl => app.on_char(c),
                        _ => {}
                    }
                }
                Event::Paste(text) => app.on_paste(&text),
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.scroll_up(3),
                    MouseEventKind::ScrollDown => app.scroll_down(3),
                    _ => {}
                },
                _ => {}
            }
        }

        if let Some(link) = app.should_copy.take() {
            app.status = Some(match copy_to_clipboard(&link) {
                Ok(()) => Status::Info(format!("Copied {}", link)),
                Err(e) => Status::Error(format!("Could not copy link: {}", e)),
            });
        }

        // Small sleep to prevent busy loop
        std::thread::sleep(Duration::from_millis(16));
    }

    Ok(())
}

/// Copy text to the system clipboard
fn copy_to_clipboard(text: &str) -> Result<()> {
    use arboard::Clipboard;
    let mut clipboard = Clipboard::new()?;
    clipboard.set_text(text)?;
    Ok(())
}

use chatdesk::{
    app::App,
    controller::{Controller, ReplyOutcome, APOLOGY_MESSAGE},
    exchange::{Exchange, ExchangeError, HttpExchange, UNEXPECTED_FORMAT_MESSAGE},
    format,
    session::Turn,
    store::{FileBackend, MemoryBackend, SessionStore},
    ui,
};
use insta::assert_snapshot;
use ratatui::{backend::TestBackend, Terminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUPPORT_EMAIL: &str = "help@uni.example";

async fn mock_answer(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn exchange_for(server: &MockServer) -> HttpExchange {
    HttpExchange::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

/// Client pointed at a port nothing listens on
fn offline_exchange() -> HttpExchange {
    HttpExchange::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap()
}

fn memory_controller() -> Controller {
    let store = SessionStore::load(Box::new(MemoryBackend::new())).unwrap();
    Controller::new(store, SUPPORT_EMAIL)
}

/// Poll until the pending reply has been applied, up to max_polls times
async fn wait_for_reply(app: &mut App, max_polls: usize) {
    for _ in 0..max_polls {
        app.poll_replies();
        if !app.controller().is_awaiting() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Check if buffer contains text
fn buffer_contains(terminal: &Terminal<TestBackend>, text: &str) -> bool {
    let buffer = terminal.backend().buffer();
    let width = buffer.area.width as usize;
    let symbols: Vec<&str> = buffer.content.iter().map(|cell| cell.symbol()).collect();
    // Search row by row so matches never straddle two lines
    symbols
        .chunks(width)
        .any(|row| row.concat().contains(text))
}

fn render_app(app: &mut App) -> Terminal<TestBackend> {
    let backend = TestBackend::new(110, 40);
    let mut terminal = Terminal::new(backend).unwrap();
    terminal.draw(|frame| ui::render(frame, app)).unwrap();
    terminal
}

// =============================================================================
// Exchange
// =============================================================================

#[tokio::test]
async fn test_exchange_posts_query_and_reads_answer_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(serde_json::json!({ "query": "How do resits work?" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "answer": "Resits are held in **August**.",
            "sources": [
                { "title": "Assessment Policy", "url": "https://example.edu/assessment" },
                "Student Handbook"
            ],
            "escalation_link": "https://example.edu/contact"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = exchange_for(&server).send("How do resits work?").await.unwrap();

    assert_eq!(reply.text, "Resits are held in **August**.");
    assert_eq!(
        reply.sources,
        vec![
            "[Assessment Policy](https://example.edu/assessment)".to_string(),
            "Student Handbook".to_string(),
        ]
    );
    assert_eq!(reply.escalation_link.as_deref(), Some("https://example.edu/contact"));
}

#[tokio::test]
async fn test_exchange_reads_legacy_shape() {
    let server = MockServer::start().await;
    mock_answer(&server, serde_json::json!({ "response": "Old style reply" })).await;

    let reply = exchange_for(&server).send("hello").await.unwrap();

    assert_eq!(reply.text, "Old style reply");
    assert!(reply.sources.is_empty());
    assert!(reply.escalation_link.is_none());
}

#[tokio::test]
async fn test_exchange_unrecognized_shape_is_not_an_error() {
    let server = MockServer::start().await;
    mock_answer(&server, serde_json::json!({})).await;

    let reply = exchange_for(&server).send("hello").await.unwrap();

    assert_eq!(reply.text, UNEXPECTED_FORMAT_MESSAGE);
}

#[tokio::test]
async fn test_exchange_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let err = exchange_for(&server).send("hello").await.unwrap_err();

    assert!(matches!(err, ExchangeError::Status { status: 500, .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_exchange_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "answer": "too late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let exchange = HttpExchange::new(&server.uri(), Duration::from_secs(1)).unwrap();
    let err = exchange.send("hello").await.unwrap_err();

    assert!(matches!(err, ExchangeError::Timeout(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_exchange_unreachable_service() {
    // Nothing listens on the discard port in test environments
    let exchange = HttpExchange::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    assert!(exchange.send("hello").await.is_err());
}

#[tokio::test]
async fn test_health_reports_document_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "knowledge_base": { "documents_loaded": 42 }
        })))
        .mount(&server)
        .await;

    let report = exchange_for(&server).health().await.unwrap();

    assert_eq!(report.status, "healthy");
    assert_eq!(report.documents_loaded, Some(42));
}

// =============================================================================
// Controller over HTTP
// =============================================================================

#[tokio::test]
async fn test_controller_records_reply_and_title() {
    let server = MockServer::start().await;
    mock_answer(
        &server,
        serde_json::json!({ "answer": "See the handbook.", "sources": ["Handbook"] }),
    )
    .await;

    let mut controller = memory_controller();
    let outcome = controller
        .exchange_once(&exchange_for(&server), "Where is the grading scheme described?")
        .await;

    assert_eq!(outcome, Some(ReplyOutcome::Applied { failed: false }));
    let session = controller.active().unwrap();
    assert_eq!(session.title, "Where is the grading scheme de...");
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[1].content, "See the handbook.");
    assert_eq!(session.turns[1].sources, vec!["Handbook".to_string()]);
    assert!(!controller.is_awaiting());
}

#[tokio::test]
async fn test_controller_failure_appends_apology_with_contact_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut controller = memory_controller();
    let outcome = controller.exchange_once(&exchange_for(&server), "hello").await;

    assert_eq!(outcome, Some(ReplyOutcome::Applied { failed: true }));
    let reply = controller.active().unwrap().turns.last().unwrap();
    assert_eq!(reply.content, APOLOGY_MESSAGE);
    assert_eq!(
        reply.escalation_link.as_deref(),
        Some("mailto:help@uni.example?subject=Chatbot%20Support%20Request")
    );
    // Input is usable again after a failure
    assert!(controller.can_submit());
}

#[tokio::test]
async fn test_sessions_survive_reload_from_disk() {
    let server = MockServer::start().await;
    mock_answer(&server, serde_json::json!({ "answer": "Term starts in September." })).await;
    let temp_dir = TempDir::new().unwrap();

    let active_id = {
        let store = SessionStore::load(Box::new(FileBackend::new(temp_dir.path()))).unwrap();
        let mut controller = Controller::new(store, SUPPORT_EMAIL);
        controller
            .exchange_once(&exchange_for(&server), "When does term start?")
            .await;
        assert!(controller.take_persist_error().is_none());
        controller.active_id().to_string()
    };

    assert!(temp_dir.path().join("chat_sessions.json").exists());
    assert!(temp_dir.path().join("active_session.json").exists());

    let store = SessionStore::load(Box::new(FileBackend::new(temp_dir.path()))).unwrap();
    let controller = Controller::new(store, SUPPORT_EMAIL);

    assert_eq!(controller.active_id(), active_id);
    let session = controller.active().unwrap();
    assert_eq!(session.title, "When does term start?");
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[1].content, "Term starts in September.");
}

#[test]
fn test_corrupt_store_is_backed_up_and_reseeded() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("chat_sessions.json"), "{ not json").unwrap();

    let store = SessionStore::load(Box::new(FileBackend::new(temp_dir.path()))).unwrap();

    assert_eq!(store.len(), 1, "Should fall back to the seed conversation");
    let backup = temp_dir.path().join("chat_sessions.corrupt.json");
    assert_eq!(std::fs::read_to_string(backup).unwrap(), "{ not json");
}

// =============================================================================
// App (TUI state)
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_app_sends_query_and_applies_reply() {
    let server = MockServer::start().await;
    mock_answer(
        &server,
        serde_json::json!({
            "answer": "Use the **Submit** button.",
            "escalation_link": "https://example.edu/support"
        }),
    )
    .await;

    let exchange: Arc<dyn Exchange> = Arc::new(exchange_for(&server));
    let mut app = App::new(memory_controller(), exchange, tokio::runtime::Handle::current());

    for c in "How do I submit?".chars() {
        app.on_char(c);
    }
    app.on_enter();

    assert!(app.input.is_empty(), "Input should clear on submit");
    assert!(app.controller().is_awaiting());

    // Enter while waiting is ignored and keeps the draft
    app.on_char('x');
    app.on_enter();
    assert_eq!(app.input, "x");

    wait_for_reply(&mut app, 250).await;

    let session = app.controller().active().unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[1].content, "Use the **Submit** button.");
    assert_eq!(session.title, "How do I submit?");

    app.on_copy_link();
    assert_eq!(app.should_copy.as_deref(), Some("https://example.edu/support"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_app_discards_reply_after_starting_new_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "answer": "late answer" }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let exchange: Arc<dyn Exchange> = Arc::new(exchange_for(&server));
    let mut app = App::new(memory_controller(), exchange, tokio::runtime::Handle::current());
    let first_id = app.controller().active_id().to_string();

    for c in "first question".chars() {
        app.on_char(c);
    }
    app.on_enter();
    app.on_new_chat();

    assert!(!app.controller().is_awaiting());
    tokio::time::sleep(Duration::from_millis(600)).await;
    app.poll_replies();

    let first = app.controller().store().get(&first_id).unwrap();
    assert_eq!(first.turns.len(), 1, "Stale reply must not be appended");
    assert!(app.controller().active().unwrap().turns.is_empty());
}

#[tokio::test]
async fn test_app_clear_requires_confirmation() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut controller = memory_controller();
    let seeded = controller
        .sessions()
        .iter()
        .find(|s| !s.turns.is_empty())
        .unwrap()
        .id
        .clone();
    controller.select_session(&seeded).unwrap();
    let mut app = App::new(controller, exchange, tokio::runtime::Handle::current());
    assert_eq!(app.controller().active().unwrap().turns.len(), 2);

    app.on_clear_request();
    app.on_char('n');
    assert!(!app.confirm_clear);
    assert_eq!(app.controller().active().unwrap().turns.len(), 2);

    app.on_clear_request();
    app.on_char('y');
    assert!(!app.confirm_clear);
    assert!(app.controller().active().unwrap().turns.is_empty());
    assert_eq!(app.controller().active_id(), seeded, "Clearing keeps the session id");
}

#[tokio::test]
async fn test_app_escape_clears_input_then_quits() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut app = App::new(memory_controller(), exchange, tokio::runtime::Handle::current());

    app.on_paste("line one\nline two");
    assert_eq!(app.input, "line one line two");

    app.on_escape();
    assert!(app.input.is_empty());
    assert!(!app.should_quit);

    app.on_escape();
    assert!(app.should_quit);
}

#[tokio::test]
async fn test_app_paste_does_not_answer_clear_dialog() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut controller = memory_controller();
    let seeded = controller
        .sessions()
        .iter()
        .find(|s| !s.turns.is_empty())
        .unwrap()
        .id
        .clone();
    controller.select_session(&seeded).unwrap();
    let mut app = App::new(controller, exchange, tokio::runtime::Handle::current());

    app.on_clear_request();
    app.on_paste("hey there, yes");

    assert!(app.confirm_clear, "Dialog should stay open");
    assert!(app.input.is_empty(), "Paste should not reach the input behind the dialog");
    assert_eq!(app.controller().active().unwrap().turns.len(), 2);

    app.on_char('n');
    assert!(!app.confirm_clear);
    assert_eq!(app.controller().active().unwrap().turns.len(), 2);
}

// =============================================================================
// Rendering
// =============================================================================

#[tokio::test]
async fn test_renders_welcome_for_empty_chat() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut app = App::new(memory_controller(), exchange, tokio::runtime::Handle::current());

    let terminal = render_app(&mut app);

    assert!(buffer_contains(&terminal, ui::WELCOME_TITLE));
    assert!(buffer_contains(&terminal, "Conversations"));
    assert!(buffer_contains(&terminal, "New Chat"));
    assert!(buffer_contains(&terminal, "Ask a question..."));
    assert!(buffer_contains(&terminal, "2 chats"));
}

#[tokio::test]
async fn test_renders_sources_and_escalation() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut controller = memory_controller();
    let ticket = controller.submit("Who marks my exam?").unwrap();
    controller.resolve(
        ticket.id,
        Ok(chatdesk::exchange::NormalizedReply {
            text: "Your **module leader** does.".to_string(),
            sources: vec!["[Exam Guide](https://example.edu/exams)".to_string()],
            escalation_link: Some("https://example.edu/help".to_string()),
        }),
    );
    let mut app = App::new(controller, exchange, tokio::runtime::Handle::current());

    let terminal = render_app(&mut app);

    assert!(buffer_contains(&terminal, "Who marks my exam?"));
    assert!(buffer_contains(&terminal, "module leader"));
    assert!(!buffer_contains(&terminal, "**"), "Bold markers should not be shown");
    assert!(buffer_contains(&terminal, "Sources:"));
    assert!(buffer_contains(&terminal, "Exam Guide"));
    assert!(buffer_contains(&terminal, "Contact Student Support:"));
    assert!(buffer_contains(&terminal, "https://example.edu/help"));
}

#[tokio::test]
async fn test_renders_clear_dialog() {
    let exchange: Arc<dyn Exchange> = Arc::new(offline_exchange());
    let mut app = App::new(memory_controller(), exchange, tokio::runtime::Handle::current());
    app.on_clear_request();

    let terminal = render_app(&mut app);

    assert!(buffer_contains(&terminal, "Clear this conversation?"));
}

#[test]
fn test_html_fragment_for_assistant_turn() {
    let turn = Turn::assistant(
        "Hi **there** <script>",
        vec!["[Guide](https://example.edu/g)".to_string(), "FAQ".to_string()],
        None,
    );

    let html = format::to_html(&format::format(&turn));

    assert_snapshot!(html, @r#"<div class="message assistant"><div class="body">Hi <strong>there</strong> &lt;script&gt;</div><div class="sources"><strong>Sources:</strong><ul><li><a href="https://example.edu/g" target="_blank" rel="noopener noreferrer">Guide</a></li><li>FAQ</li></ul></div></div>"#);
}

// =============================================================================
// CLI Integration Tests
// =============================================================================

use std::process::Command;

fn chatdesk_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chatdesk"))
}

fn run_cli(args: &[&str], home: &Path, base_url: &str) -> (String, String, bool) {
    let output = Command::new(chatdesk_bin())
        .args(args)
        .env("CHATDESK_HOME", home)
        .env("CHATDESK_BASE_URL", base_url)
        .env_remove("CHATDESK_TIMEOUT_SECS")
        .env_remove("CHATDESK_SUPPORT_EMAIL")
        .output()
        .expect("Failed to run chatdesk");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_cli_list_on_fresh_home_shows_seed() {
    let temp_dir = TempDir::new().unwrap();

    let (stdout, _stderr, success) = run_cli(&["list"], temp_dir.path(), "http://127.0.0.1:9");

    assert!(success, "CLI list should succeed");
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("Output should be valid JSON");
    let sessions = json["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["title"], "What can you help me with?");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_ask_then_show_and_export() {
    let server = MockServer::start().await;
    mock_answer(
        &server,
        serde_json::json!({ "answer": "The library opens at 8am.", "sources": ["Library FAQ"] }),
    )
    .await;
    let temp_dir = TempDir::new().unwrap();
    let home = temp_dir.path().to_path_buf();
    let uri = server.uri();

    let (stdout, stderr, success) = tokio::task::spawn_blocking({
        let home = home.clone();
        let uri = uri.clone();
        move || run_cli(&["ask", "--new", "When", "does", "the", "library", "open?"], &home, &uri)
    })
    .await
    .unwrap();
    assert!(success, "CLI ask should succeed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["answer"], "The library opens at 8am.");
    assert_eq!(json["title"], "When does the library open?");
    assert_eq!(json["failed"], false);
    let session_id = json["session_id"].as_str().unwrap().to_string();

    let selector = format!("{}:-1", &session_id[..8]);
    let (stdout, _stderr, success) = run_cli(&["show", &selector], &home, &uri);
    assert!(success, "CLI show should succeed");
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["total_turns"], 2);
    let turns = json["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0]["index"], 2);
    assert_eq!(turns[0]["role"], "assistant");

    let (stdout, _stderr, success) = run_cli(&["export", &session_id], &home, &uri);
    assert!(success, "CLI export should succeed");
    assert!(stdout.starts_with("<!DOCTYPE html>"));
    assert!(stdout.contains("<h1>When does the library open?</h1>"));
    assert!(stdout.contains("<li>Library FAQ</li>"));
}

#[test]
fn test_cli_show_rejects_bad_selector() {
    let temp_dir = TempDir::new().unwrap();

    let (_stdout, stderr, success) =
        run_cli(&["show", "abc:nope"], temp_dir.path(), "http://127.0.0.1:9");

    assert!(!success);
    assert!(stderr.contains("Invalid selector"), "stderr: {}", stderr);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "knowledge_base": { "documents_loaded": 7 }
        })))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().unwrap();
    let home = temp_dir.path().to_path_buf();
    let uri = server.uri();

    let (stdout, stderr, success) =
        tokio::task::spawn_blocking(move || run_cli(&["health"], &home, &uri))
            .await
            .unwrap();

    assert!(success, "CLI health should succeed: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["documents_loaded"], 7);
}

use crate::controller::{Controller, ReplyOutcome};
use crate::exchange::{Exchange, ExchangeError, NormalizedReply};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Messages from exchange tasks
#[derive(Debug)]
pub struct ReplyMsg {
    pub ticket_id: u64,
    pub result: Result<NormalizedReply, ExchangeError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Info(String),
    Error(String),
}

pub struct App {
    /// Text being typed
    pub input: String,
    /// Cursor position in input (char index)
    pub cursor: usize,
    /// Transcript scroll, in lines up from the bottom
    pub transcript_scroll: usize,
    /// Whether the transcript has more content than fits (for scroll hint)
    pub transcript_scrollable: bool,
    /// Sidebar with the session list
    pub sidebar_visible: bool,
    /// Clear-chat confirmation dialog is open
    pub confirm_clear: bool,
    /// Should quit
    pub should_quit: bool,
    /// Text to put on the clipboard (handled by the main loop)
    pub should_copy: Option<String>,
    /// Status bar message
    pub status: Option<Status>,
    /// Animation frame for the pending-reply indicator
    pub tick: usize,
    controller: Controller,
    exchange: Arc<dyn Exchange>,
    runtime: Handle,
    reply_tx: UnboundedSender<ReplyMsg>,
    reply_rx: UnboundedReceiver<ReplyMsg>,
    in_flight: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(controller: Controller, exchange: Arc<dyn Exchange>, runtime: Handle) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let mut app = Self {
            input: String::new(),
            cursor: 0,
            transcript_scroll: 0,
            transcript_scrollable: false,
            sidebar_visible: true,
            confirm_clear: false,
            should_quit: false,
            should_copy: None,
            status: None,
            tick: 0,
            controller,
            exchange,
            runtime,
            reply_tx,
            reply_rx,
            in_flight: None,
        };
        app.check_persist();
        app
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Apply finished exchanges (call this in the main loop)
    pub fn poll_replies(&mut self) {
        loop {
            match self.reply_rx.try_recv() {
                Ok(msg) => self.apply_reply(msg),
                Err(TryRecvError::Empty) => break,
                // We hold a sender ourselves, so this never happens in practice
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if self.controller.is_awaiting() {
            self.tick = self.tick.wrapping_add(1);
        }
    }

    fn apply_reply(&mut self, msg: ReplyMsg) {
        match self.controller.resolve(msg.ticket_id, msg.result) {
            ReplyOutcome::Applied { failed } => {
                self.in_flight = None;
                self.transcript_scroll = 0;
                if failed {
                    self.status = Some(Status::Error(
                        "Could not reach the answering service".to_string(),
                    ));
                }
            }
            ReplyOutcome::Stale => {}
        }
        self.check_persist();
    }

    /// Handle Enter: submit the input, or answer the confirmation dialog
    pub fn on_enter(&mut self) {
        if self.confirm_clear {
            self.on_confirm(true);
            return;
        }

        let Some(ticket) = self.controller.submit(&self.input) else {
            return;
        };
        self.input.clear();
        self.cursor = 0;
        self.transcript_scroll = 0;
        self.status = None;
        self.check_persist();

        let exchange = Arc::clone(&self.exchange);
        let tx = self.reply_tx.clone();
        let ticket_id = ticket.id;
        self.in_flight = Some(self.runtime.spawn(async move {
            let result = exchange.send(&ticket.query).await;
            let _ = tx.send(ReplyMsg { ticket_id, result });
        }));
    }

    /// Abort the running exchange task, if any
    fn abort_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }

    /// Start a new conversation
    pub fn on_new_chat(&mut self) {
        self.abort_in_flight();
        self.controller.new_chat();
        self.reset_view();
        self.check_persist();
    }

    /// Ask before clearing the active conversation
    pub fn on_clear_request(&mut self) {
        self.confirm_clear = true;
    }

    /// Answer the clear-chat dialog
    pub fn on_confirm(&mut self, yes: bool) {
        if !self.confirm_clear {
            return;
        }
        self.confirm_clear = false;
        if yes {
            self.abort_in_flight();
            self.controller.clear_chat();
            self.reset_view();
            self.check_persist();
        }
    }

    /// Switch to the session `offset` steps away in the sidebar
    pub fn on_select_relative(&mut self, offset: isize) {
        let before = self.controller.active_id().to_string();
        self.controller.select_relative(offset);
        if self.controller.active_id() != before {
            self.abort_in_flight();
            self.reset_view();
            self.check_persist();
        }
    }

    /// Switch to a session by id
    pub fn select_session(&mut self, id: &str) {
        if id == self.controller.active_id() {
            return;
        }
        match self.controller.select_session(id) {
            Ok(()) => {
                self.abort_in_flight();
                self.reset_view();
                self.check_persist();
            }
            Err(e) => self.status = Some(Status::Error(e.to_string())),
        }
    }

    pub fn toggle_sidebar(&mut self) {
        self.sidebar_visible = !self.sidebar_visible;
    }

    /// Queue the latest escalation link for the clipboard
    pub fn on_copy_link(&mut self) {
        let link = self
            .controller
            .active()
            .and_then(|s| s.latest_escalation_link())
            .map(str::to_string);
        match link {
            Some(link) => self.should_copy = Some(link),
            None => self.status = Some(Status::Info("No contact link to copy".to_string())),
        }
    }

    /// Esc: close the dialog, else clear input, else quit
    pub fn on_escape(&mut self) {
        if self.confirm_clear {
            self.confirm_clear = false;
        } else if self.input.is_empty() {
            self.should_quit = true;
        } else {
            self.input.clear();
            self.cursor = 0;
        }
    }

    /// Handle character input
    pub fn on_char(&mut self, c: char) {
        if self.confirm_clear {
            match c {
                'y' | 'Y' => self.on_confirm(true),
                'n' | 'N' => self.on_confirm(false),
                _ => {}
            }
            return;
        }
        let byte_pos = self.cursor_byte_pos();
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    /// Handle backspace
    pub fn on_backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = self.cursor_byte_pos();
            self.input.remove(byte_pos);
        }
    }

    /// Handle delete key
    pub fn on_delete(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor < char_count {
            let byte_pos = self.cursor_byte_pos();
            self.input.remove(byte_pos);
        }
    }

    /// Move cursor left
    pub fn on_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Move cursor right
    pub fn on_right(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor < char_count {
            self.cursor += 1;
        }
    }

    /// Move cursor to start
    pub fn on_home(&mut self) {
        self.cursor = 0;
    }

    /// Move cursor to end
    pub fn on_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    /// Insert pasted text at the cursor; newlines become spaces.
    /// Ignored while the clear dialog is open, which only answers typed keys.
    pub fn on_paste(&mut self, text: &str) {
        if self.confirm_clear {
            return;
        }
        for c in text.chars() {
            let c = if c == '\n' || c == '\r' { ' ' } else { c };
            self.on_char(c);
        }
    }

    /// Scroll transcript towards older turns
    pub fn scroll_up(&mut self, lines: usize) {
        self.transcript_scroll = self.transcript_scroll.saturating_add(lines);
    }

    /// Scroll transcript towards the latest turn
    pub fn scroll_down(&mut self, lines: usize) {
        self.transcript_scroll = self.transcript_scroll.saturating_sub(lines);
    }

    /// Convert cursor (char index) to byte position
    fn cursor_byte_pos(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    fn reset_view(&mut self) {
        self.transcript_scroll = 0;
        self.status = None;
    }

    /// Surface storage failures separately from exchange failures
    fn check_persist(&mut self) {
        if let Some(e) = self.controller.take_persist_error() {
            self.status = Some(Status::Error(format!("Could not save conversations: {}", e)));
        }
    }
}

//! Session controller: the state machine between user input, the store and the exchange.

use crate::exchange::{Exchange, ExchangeError, NormalizedReply};
use crate::session::{Session, Turn};
use crate::store::{SessionStore, StoreError};
use thiserror::Error;

/// Assistant text appended when an exchange fails
pub const APOLOGY_MESSAGE: &str = "Sorry, there was an error processing your request. \
Please try again or contact Student Support.";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("session not found: {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle for one in-flight exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub session_id: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingReply(Ticket),
}

/// What happened to a reply handed to [`Controller::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// An assistant turn was appended; `failed` marks the synthetic apology
    Applied { failed: bool },
    /// The ticket was no longer pending; nothing changed
    Stale,
}

pub struct Controller {
    store: SessionStore,
    active_id: String,
    phase: Phase,
    next_ticket: u64,
    support_email: String,
    persist_error: Option<StoreError>,
}

impl Controller {
    /// Take ownership of the store and pick the active session: the one saved last time if
    /// it still exists, otherwise a brand new one
    pub fn new(store: SessionStore, support_email: impl Into<String>) -> Self {
        let saved = store.load_active_id().filter(|id| store.contains(id));
        let mut controller = Self {
            store,
            active_id: String::new(),
            phase: Phase::Idle,
            next_ticket: 1,
            support_email: support_email.into(),
            persist_error: None,
        };

        match saved {
            Some(id) => controller.active_id = id,
            None => {
                controller.new_chat();
            }
        }
        controller
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> Option<&Session> {
        self.store.get(&self.active_id)
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Sessions for the sidebar, most recent first
    pub fn sessions(&self) -> Vec<&Session> {
        self.store.sorted()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.phase, Phase::AwaitingReply(_))
    }

    /// Submission is disabled while a reply is pending
    pub fn can_submit(&self) -> bool {
        !self.is_awaiting()
    }

    /// Last persistence failure, if any (cleared by taking it)
    pub fn take_persist_error(&mut self) -> Option<StoreError> {
        self.persist_error.take()
    }

    /// The `mailto:` link offered when an exchange fails
    pub fn support_link(&self) -> String {
        format!(
            "mailto:{}?subject=Chatbot%20Support%20Request",
            self.support_email
        )
    }

    /// Idle → AwaitingReply. Appends the user turn and returns the ticket to dispatch.
    ///
    /// Blank queries and submissions while a reply is pending are ignored.
    pub fn submit(&mut self, query: &str) -> Option<Ticket> {
        let query = query.trim();
        if query.is_empty() || self.is_awaiting() {
            return None;
        }

        let session = self.store.get_mut(&self.active_id)?;
        session.record_user_turn(query);

        let ticket = Ticket {
            id: self.next_ticket,
            session_id: self.active_id.clone(),
            query: query.to_string(),
        };
        self.next_ticket += 1;
        self.phase = Phase::AwaitingReply(ticket.clone());
        tracing::debug!(ticket = ticket.id, session = %ticket.session_id, "query submitted");

        self.persist();
        Some(ticket)
    }

    /// AwaitingReply → Idle. Appends the reply (or an apology on failure).
    ///
    /// Results for a ticket that is no longer pending are dropped.
    pub fn resolve(
        &mut self,
        ticket_id: u64,
        result: Result<NormalizedReply, ExchangeError>,
    ) -> ReplyOutcome {
        let ticket = match &self.phase {
            Phase::AwaitingReply(t) if t.id == ticket_id => t.clone(),
            _ => {
                tracing::debug!(ticket = ticket_id, "discarding stale reply");
                return ReplyOutcome::Stale;
            }
        };

        let failed = result.is_err();
        let turn = match result {
            Ok(reply) => Turn::assistant(reply.text, reply.sources, reply.escalation_link),
            Err(e) => {
                tracing::warn!(ticket = ticket_id, "exchange failed: {}", e);
                Turn::assistant(APOLOGY_MESSAGE, Vec::new(), Some(self.support_link()))
            }
        };

        self.phase = Phase::Idle;
        let Some(session) = self.store.get_mut(&ticket.session_id) else {
            return ReplyOutcome::Stale;
        };
        session.push_turn(turn);
        self.persist();

        ReplyOutcome::Applied { failed }
    }

    /// Drop the pending ticket, if any, so its reply will be discarded
    pub fn abandon_pending(&mut self) -> Option<Ticket> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::AwaitingReply(ticket) => {
                tracing::debug!(ticket = ticket.id, "abandoning pending reply");
                Some(ticket)
            }
            Phase::Idle => None,
        }
    }

    /// Create a fresh session and make it active
    pub fn new_chat(&mut self) -> String {
        self.abandon_pending();
        let session = Session::new();
        let id = session.id.clone();
        self.store.insert(session);
        self.active_id = id.clone();
        tracing::info!(session = %id, "new chat");
        self.persist();
        id
    }

    /// Empty the active session; its id is kept
    pub fn clear_chat(&mut self) {
        self.abandon_pending();
        if let Some(session) = self.store.get_mut(&self.active_id) {
            session.clear();
        }
        tracing::info!(session = %self.active_id, "chat cleared");
        self.persist();
    }

    /// Switch the active session
    pub fn select_session(&mut self, id: &str) -> Result<(), ControllerError> {
        if !self.store.contains(id) {
            return Err(ControllerError::UnknownSession(id.to_string()));
        }
        if id == self.active_id {
            return Ok(());
        }
        self.abandon_pending();
        self.active_id = id.to_string();
        self.persist();
        Ok(())
    }

    /// Select the session `offset` steps away from the active one in sidebar order
    pub fn select_relative(&mut self, offset: isize) {
        let ids: Vec<String> = self.sessions().iter().map(|s| s.id.clone()).collect();
        let Some(pos) = ids.iter().position(|id| *id == self.active_id) else {
            return;
        };
        let target = (pos as isize + offset).clamp(0, ids.len() as isize - 1) as usize;
        if let Some(id) = ids.get(target) {
            let id = id.clone();
            let _ = self.select_session(&id);
        }
    }

    /// Run a full exchange for one query: submit, await the reply, resolve.
    ///
    /// Returns `None` when the query was ignored.
    pub async fn exchange_once(
        &mut self,
        exchange: &dyn Exchange,
        query: &str,
    ) -> Option<ReplyOutcome> {
        let ticket = self.submit(query)?;
        let result = exchange.send(&ticket.query).await;
        Some(self.resolve(ticket.id, result))
    }

    fn persist(&mut self) {
        let result = self
            .store
            .save()
            .and_then(|_| self.store.save_active_id(&self.active_id));
        if let Err(e) = result {
            tracing::error!("failed to save sessions: {}", e);
            self.persist_error = Some(e);
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title every session carries until its first user turn arrives
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum characters kept from the first user message when deriving a title
const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a transcript.
///
/// Sources and the escalation link only ever appear on assistant turns; user turns are
/// built through [`Turn::user`], which has no way to set them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_link: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
            sources: Vec::new(),
            escalation_link: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        sources: Vec<String>,
        escalation_link: Option<String>,
    ) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            sources,
            escalation_link,
        }
    }
}

/// One independent conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Session {
    /// Create an empty session with a fresh id and the default title
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            updated_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Append a turn and bump the session timestamp. Never touches the title.
    pub fn append_turn(mut self, turn: Turn) -> Self {
        self.push_turn(turn);
        self
    }

    /// In-place variant of [`Session::append_turn`]
    pub fn push_turn(&mut self, turn: Turn) {
        self.updated_at = turn.timestamp.max(self.updated_at);
        self.turns.push(turn);
    }

    /// Append a user turn, deriving the title if this is the session's first user turn
    pub fn record_user_turn(&mut self, content: &str) {
        self.push_turn(Turn::user(content));
        self.retitle();
    }

    /// Derive the title from the first user turn, but only while the default title is
    /// still in place and exactly one user turn exists
    pub fn retitle(&mut self) {
        if !self.has_default_title() || !self.is_first_user_turn() {
            return;
        }
        if let Some(first) = self.turns.iter().find(|t| t.role == Role::User) {
            self.title = derive_title(&first.content);
        }
    }

    /// True iff exactly one user turn exists (checked after the candidate append)
    pub fn is_first_user_turn(&self) -> bool {
        self.user_turn_count() == 1
    }

    pub fn user_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }

    /// Drop every turn and reset title and timestamp; the id survives
    pub fn clear(&mut self) {
        self.turns.clear();
        self.title = DEFAULT_TITLE.to_string();
        self.updated_at = Utc::now();
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    /// Most recent assistant escalation link, if any
    pub fn latest_escalation_link(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find_map(|t| t.escalation_link.as_deref())
    }

    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
            turn_count: self.turns.len(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a session title from the first user message: at most 30 characters,
/// with "..." appended when anything was cut
pub fn derive_title(first_user_content: &str) -> String {
    let trimmed = first_user_content.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", head)
}

// ============================================================================
// CLI Output Types (JSON serialization for non-interactive mode)
// ============================================================================

/// Session summary for list output (no turns)
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Output format for `chatdesk list`
#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub sessions: Vec<SessionSummary>,
}

/// A turn with its 1-based position in the transcript
#[derive(Debug, Serialize)]
pub struct NumberedTurn {
    pub index: usize,
    #[serde(flatten)]
    pub turn: Turn,
}

/// Output format for `chatdesk show`
#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub session_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub total_turns: usize,
    pub turns: Vec<NumberedTurn>,
}

/// Output format for `chatdesk ask`
#[derive(Debug, Serialize)]
pub struct AskOutput {
    pub session_id: String,
    pub title: String,
    pub answer: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_link: Option<String>,
    /// True when the reply is the synthetic apology produced after a failed exchange
    pub failed: bool,
}

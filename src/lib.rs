pub mod app;
pub mod config;
pub mod controller;
pub mod exchange;
pub mod format;
pub mod logging;
pub mod selector;
pub mod session;
pub mod store;
pub mod theme;
pub mod tui;
pub mod ui;

pub use app::{App, Status};
pub use config::Config;
pub use controller::{Controller, ControllerError, Phase, ReplyOutcome, Ticket};
pub use exchange::{Exchange, ExchangeError, HttpExchange, NormalizedReply, RemoteReply};
pub use format::{DisplayBlock, Inline, Source};
pub use selector::{parse_selector, Selector, SelectorError, TurnSelector};
pub use session::{
    AskOutput, ListOutput, NumberedTurn, Role, Session, SessionSummary, ShowOutput, Turn,
};
pub use store::{FileBackend, MemoryBackend, SessionStore, StorageBackend, StoreError};

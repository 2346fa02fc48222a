//! Selector parsing for `chatdesk show`.
//!
//! Supports the following formats:
//! - `abc123` - Whole session
//! - `abc123:5` - Turn 5
//! - `abc123:2-5` - Turns 2 through 5
//! - `abc123:-3` - Last 3 turns

use std::ops::Range;
use thiserror::Error;

/// Parsed selector addressing a session and a slice of its turns
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub session_id: String,
    pub turns: TurnSelector,
}

/// Turn selection within a session (indices are 1-based)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnSelector {
    All,
    Single(usize),
    /// Inclusive range
    Range(usize, usize),
    Last(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    EmptyInput,
    #[error("empty session id")]
    EmptySessionId,
    #[error("invalid turn index: {0}")]
    InvalidTurnIndex(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("invalid last count: {0}")]
    InvalidLastCount(String),
    #[error("turn {index} not found (session has {total} turns)")]
    OutOfBounds { index: usize, total: usize },
}

impl TurnSelector {
    /// Resolve to a 0-based half-open range over a transcript of `total` turns
    pub fn resolve(&self, total: usize) -> Result<Range<usize>, SelectorError> {
        match *self {
            TurnSelector::All => Ok(0..total),
            TurnSelector::Single(idx) => {
                if idx == 0 || idx > total {
                    return Err(SelectorError::OutOfBounds { index: idx, total });
                }
                Ok(idx - 1..idx)
            }
            TurnSelector::Range(start, end) => {
                if start == 0 || start > end {
                    return Err(SelectorError::InvalidRange(format!("{}-{}", start, end)));
                }
                if end > total {
                    return Err(SelectorError::OutOfBounds { index: end, total });
                }
                Ok(start - 1..end)
            }
            TurnSelector::Last(n) => Ok(total.saturating_sub(n)..total),
        }
    }
}

/// Parse a selector string
///
/// # Examples
///
/// ```
/// use chatdesk::selector::{parse_selector, TurnSelector};
///
/// let s = parse_selector("abc123").unwrap();
/// assert_eq!(s.session_id, "abc123");
/// assert_eq!(s.turns, TurnSelector::All);
///
/// let s = parse_selector("abc123:-3").unwrap();
/// assert_eq!(s.turns, TurnSelector::Last(3));
/// ```
pub fn parse_selector(input: &str) -> Result<Selector, SelectorError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SelectorError::EmptyInput);
    }

    let Some((session_id, rest)) = input.split_once(':') else {
        return Ok(Selector {
            session_id: input.to_string(),
            turns: TurnSelector::All,
        });
    };
    if session_id.is_empty() {
        return Err(SelectorError::EmptySessionId);
    }
    let session_id = session_id.to_string();

    // Could be :-3 (last 3) or :2-5 (range)
    if let Some(count) = rest.strip_prefix('-') {
        let count = count
            .parse::<usize>()
            .map_err(|_| SelectorError::InvalidLastCount(rest.to_string()))?;
        return Ok(Selector {
            session_id,
            turns: TurnSelector::Last(count),
        });
    }

    if let Some((start_part, end_part)) = rest.split_once('-') {
        let start = start_part
            .parse::<usize>()
            .map_err(|_| SelectorError::InvalidRange(rest.to_string()))?;
        let end = end_part
            .parse::<usize>()
            .map_err(|_| SelectorError::InvalidRange(rest.to_string()))?;
        return Ok(Selector {
            session_id,
            turns: TurnSelector::Range(start, end),
        });
    }

    let index = rest
        .parse::<usize>()
        .map_err(|_| SelectorError::InvalidTurnIndex(rest.to_string()))?;
    Ok(Selector {
        session_id,
        turns: TurnSelector::Single(index),
    })
}

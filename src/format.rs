//! Turn content → display blocks.
//!
//! Formatting produces a small inline AST ([`Inline`]) that is rendered by trusted
//! renderers only: [`crate::ui`] for the terminal and [`to_html`] for exports. Raw turn
//! content is never spliced into markup directly.

use crate::session::{Role, Session, Turn};

/// Heading shown above a reply's source list
pub const SOURCES_LABEL: &str = "Sources";
/// Call-to-action label for an escalation link
pub const ESCALATION_LABEL: &str = "Contact Student Support";

/// Inline markup node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    LineBreak,
    Bold(String),
    Link { label: String, url: String },
}

/// One entry of a reply's source list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Link-capable source (may contain anchors)
    Markup(Vec<Inline>),
    /// Anything else: shown verbatim, never interpreted
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub label: String,
    pub url: String,
}

/// Display-ready form of one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBlock {
    pub role: Role,
    pub body: Vec<Inline>,
    pub sources: Option<Vec<Source>>,
    pub escalation: Option<Escalation>,
}

/// Format a turn for display.
///
/// User turns are a single literal text run. Assistant turns go through the markup rules
/// in [`format_body`] and carry their sources and escalation link.
pub fn format(turn: &Turn) -> DisplayBlock {
    match turn.role {
        Role::User => DisplayBlock {
            role: Role::User,
            body: vec![Inline::Text(turn.content.clone())],
            sources: None,
            escalation: None,
        },
        Role::Assistant => DisplayBlock {
            role: Role::Assistant,
            body: format_body(&turn.content),
            sources: format_sources(&turn.sources),
            escalation: turn.escalation_link.as_ref().map(|url| Escalation {
                label: ESCALATION_LABEL.to_string(),
                url: url.clone(),
            }),
        },
    }
}

/// Apply assistant markup rules, in order:
/// 1. literal `\n` escape sequences become line breaks
/// 2. newline characters become line breaks
/// 3. a leading `- ` on a line becomes a `• ` bullet
/// 4. `**text**` becomes bold (non-greedy, left to right, no nesting). A bold pair may
///    enclose line breaks; the run is then split into one bold node per line.
pub fn format_body(content: &str) -> Vec<Inline> {
    let unescaped = content.replace("\\n", "\n");
    let bulleted = unescaped
        .split('\n')
        .map(|line| match line.strip_prefix("- ") {
            Some(rest) => format!("• {}", rest),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = Vec::new();
    let mut rest = bulleted.as_str();
    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        push_lines(&rest[..open], false, &mut out);
        push_lines(&after_open[..close], true, &mut out);
        rest = &after_open[close + 2..];
    }
    push_lines(rest, false, &mut out);

    out
}

/// Push a run as text or bold nodes, with a line break at every newline
fn push_lines(run: &str, bold: bool, out: &mut Vec<Inline>) {
    for (i, line) in run.split('\n').enumerate() {
        if i > 0 {
            out.push(Inline::LineBreak);
        }
        if line.is_empty() {
            continue;
        }
        out.push(if bold {
            Inline::Bold(line.to_string())
        } else {
            Inline::Text(line.to_string())
        });
    }
}

fn format_sources(sources: &[String]) -> Option<Vec<Source>> {
    if sources.is_empty() {
        return None;
    }
    Some(sources.iter().map(|s| classify_source(s)).collect())
}

/// Only sources that look like links may carry markup; the rest stay literal
pub fn classify_source(source: &str) -> Source {
    let link_like = source.contains("http") || (source.contains('[') && source.contains(']'));
    if link_like {
        Source::Markup(parse_link_markup(source))
    } else {
        Source::Literal(source.to_string())
    }
}

/// Recognize `[label](url)`, `<a href="url">label</a>` and bare `http(s)://` URLs
fn parse_link_markup(s: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < s.len() {
        let rest = &s[i..];
        let parsed = parse_markdown_link(rest)
            .or_else(|| parse_anchor(rest))
            .or_else(|| parse_bare_url(rest));

        match parsed {
            Some((inline, consumed)) => {
                if !text.is_empty() {
                    out.push(Inline::Text(std::mem::take(&mut text)));
                }
                out.push(inline);
                i += consumed;
            }
            None => {
                // Advance one char (not byte) to stay on a boundary
                let c = rest.chars().next().unwrap_or_default();
                text.push(c);
                i += c.len_utf8().max(1);
            }
        }
    }

    if !text.is_empty() {
        out.push(Inline::Text(text));
    }
    out
}

fn parse_markdown_link(s: &str) -> Option<(Inline, usize)> {
    let inner = s.strip_prefix('[')?;
    let label_end = inner.find("](")?;
    let label = &inner[..label_end];
    if label.contains('[') {
        return None;
    }
    let after = &inner[label_end + 2..];
    let url_end = after.find(')')?;
    let url = after[..url_end].trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    let consumed = 1 + label_end + 2 + url_end + 1;
    Some((
        Inline::Link {
            label: label.to_string(),
            url: url.to_string(),
        },
        consumed,
    ))
}

fn parse_anchor(s: &str) -> Option<(Inline, usize)> {
    if !s.get(..3)?.eq_ignore_ascii_case("<a ") {
        return None;
    }
    let tag_end = s.find('>')?;
    let tag = &s[..tag_end];
    let href_start = tag.find("href=")? + 5;
    let quote = tag[href_start..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let url_start = href_start + 1;
    let url_len = tag[url_start..].find(quote)?;
    let url = &tag[url_start..url_start + url_len];

    let body = &s[tag_end + 1..];
    let close = body.to_ascii_lowercase().find("</a>")?;
    let label = body[..close].trim();
    let consumed = tag_end + 1 + close + 4;
    Some((
        Inline::Link {
            label: if label.is_empty() { url } else { label }.to_string(),
            url: url.to_string(),
        },
        consumed,
    ))
}

fn parse_bare_url(s: &str) -> Option<(Inline, usize)> {
    if !(s.starts_with("http://") || s.starts_with("https://")) {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    // Trailing punctuation usually belongs to the sentence, not the URL
    let url = s[..end].trim_end_matches(['.', ',', ';', ')']);
    Some((
        Inline::Link {
            label: url.to_string(),
            url: url.to_string(),
        },
        url.len(),
    ))
}

// ============================================================================
// HTML rendering
// ============================================================================

/// Escape text for HTML element and attribute content
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Schemes allowed to become clickable anchors
fn is_safe_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

pub fn inlines_to_html(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(text) => out.push_str(&escape_html(text)),
            Inline::LineBreak => out.push_str("<br>"),
            Inline::Bold(text) => {
                out.push_str("<strong>");
                out.push_str(&escape_html(text));
                out.push_str("</strong>");
            }
            Inline::Link { label, url } => {
                if is_safe_url(url) {
                    out.push_str(&format!(
                        "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                        escape_html(url),
                        escape_html(label)
                    ));
                } else {
                    out.push_str(&escape_html(label));
                }
            }
        }
    }
    out
}

fn source_to_html(source: &Source) -> String {
    match source {
        Source::Markup(inlines) => inlines_to_html(inlines),
        Source::Literal(text) => escape_html(text),
    }
}

/// Render a display block as an HTML fragment
pub fn to_html(block: &DisplayBlock) -> String {
    let mut out = format!(
        "<div class=\"message {}\"><div class=\"body\">{}</div>",
        block.role.as_str(),
        inlines_to_html(&block.body)
    );

    if let Some(sources) = &block.sources {
        out.push_str(&format!(
            "<div class=\"sources\"><strong>{}:</strong><ul>",
            SOURCES_LABEL
        ));
        for source in sources {
            out.push_str(&format!("<li>{}</li>", source_to_html(source)));
        }
        out.push_str("</ul></div>");
    }

    if let Some(escalation) = &block.escalation {
        let link = Inline::Link {
            label: escalation.label.clone(),
            url: escalation.url.clone(),
        };
        out.push_str(&format!(
            "<div class=\"escalation\">{}</div>",
            inlines_to_html(std::slice::from_ref(&link))
        ));
    }

    out.push_str("</div>");
    out
}

/// Render a whole session as a standalone HTML document
pub fn session_to_html(session: &Session) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", escape_html(&session.title)));
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(&session.title)));
    for turn in &session.turns {
        out.push_str(&to_html(&format(turn)));
        out.push('\n');
    }
    out.push_str("</body>\n</html>\n");
    out
}

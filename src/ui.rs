use crate::app::{App, Status};
use crate::controller::Phase;
use crate::format::{self, DisplayBlock, Inline, Source, SOURCES_LABEL};
use crate::session::{Role, Session};
use crate::theme::Theme;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::sync::OnceLock;

/// Sidebar width including its right padding
const SIDEBAR_WIDTH: u16 = 30;

/// Shown in place of an empty transcript; never persisted
pub const WELCOME_TITLE: &str = "Hi! I'm the Student Support assistant.";
pub const WELCOME_BODY: &str = "Ask me about academic policies, assessments, Canvas or student \
services. I'll cite the documents I used and point you to a human when I can't help.";

const SPINNER: [&str; 4] = ["⠋", "⠙", "⠹", "⠸"];

fn theme() -> &'static Theme {
    static THEME: OnceLock<Theme> = OnceLock::new();
    THEME.get_or_init(Theme::detect)
}

/// Main UI rendering
pub fn render(frame: &mut Frame, app: &mut App) {
    let area = frame.area();

    // Main layout: content, input bar (3 lines with padding), spacing, status bar
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Sidebar + transcript
            Constraint::Length(3), // Input bar with top/bottom padding
            Constraint::Length(1), // Spacing before status bar
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    let content = main_layout[0];
    if app.sidebar_visible && content.width > SIDEBAR_WIDTH * 2 {
        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(SIDEBAR_WIDTH - 2),
                Constraint::Length(2), // Separator column
                Constraint::Min(0),
            ])
            .split(content);
        render_sidebar(frame, app, panes[0]);
        render_separator(frame, panes[1]);
        render_transcript(frame, app, pad_horizontal(panes[2]));
    } else {
        let padded = pad_horizontal(content);
        render_transcript(frame, app, padded);
    }

    render_input_bar(frame, app, pad_horizontal(main_layout[1]));
    render_status_bar(frame, app, pad_horizontal(main_layout[3]));

    if app.confirm_clear {
        render_confirm_dialog(frame, area);
    }
}

/// 1 char of padding on each side
fn pad_horizontal(area: Rect) -> Rect {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area)[1]
}

fn render_sidebar(frame: &mut Frame, app: &App, area: Rect) {
    let t = theme();
    let controller = app.controller();
    let sessions = controller.sessions();
    let active_id = controller.active_id();
    let title_width = area.width.saturating_sub(3) as usize;

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(0)])
        .split(area);

    let heading = Line::from(vec![
        Span::raw(" "),
        Span::styled(
            "Conversations",
            Style::default().fg(t.accent).add_modifier(Modifier::BOLD),
        ),
    ]);
    frame.render_widget(Paragraph::new(heading), layout[0]);

    let items: Vec<ListItem> = sessions
        .iter()
        .map(|session| {
            let is_active = session.id == active_id;
            let title = truncate_chars(&session.title, title_width);
            let title_style = if is_active {
                Style::default().fg(t.selection_fg).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(t.session_fg)
            };
            let lines = vec![
                Line::from(Span::styled(format!(" {}", title), title_style)),
                Line::from(Span::styled(
                    format!(" {}", format_time_ago(session.updated_at)),
                    Style::default().fg(t.dim_fg),
                )),
            ];
            if is_active {
                ListItem::new(lines).style(Style::default().bg(t.selection_bg))
            } else {
                ListItem::new(lines)
            }
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(sessions.iter().position(|s| s.id == active_id));
    frame.render_stateful_widget(List::new(items), layout[1], &mut list_state);
}

fn render_separator(frame: &mut Frame, area: Rect) {
    let style = Style::default().fg(theme().separator_fg);
    let lines: Vec<Line> = (0..area.height)
        .map(|_| Line::from(Span::styled("│", style)))
        .collect();
    frame.render_widget(Paragraph::new(lines), area);
}

fn render_transcript(frame: &mut Frame, app: &mut App, area: Rect) {
    let t = theme();
    // Reserve chars for bubble padding (1 left, 1 right)
    let bubble_width = area.width.saturating_sub(2).max(1) as usize;

    let mut lines: Vec<Line> = Vec::new();
    let controller = app.controller();

    match controller.active() {
        Some(session) if !session.turns.is_empty() => {
            transcript_lines(session, bubble_width, &mut lines);
        }
        _ => welcome_lines(bubble_width, &mut lines),
    }

    let pending_here = match controller.phase() {
        Phase::AwaitingReply(ticket) => ticket.session_id == controller.active_id(),
        Phase::Idle => false,
    };
    if pending_here {
        let frame_glyph = SPINNER[app.tick / 4 % SPINNER.len()];
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("{} Thinking...", frame_glyph),
            Style::default().fg(t.pending_fg),
        )));
    }

    // Bottom-anchored: scroll counts lines up from the end
    let visible_height = area.height as usize;
    let max_scroll = lines.len().saturating_sub(visible_height);
    app.transcript_scrollable = max_scroll > 0;
    app.transcript_scroll = app.transcript_scroll.min(max_scroll);
    let skip = max_scroll - app.transcript_scroll;

    let visible_lines: Vec<Line> = lines.into_iter().skip(skip).collect();
    frame.render_widget(Paragraph::new(visible_lines), area);
}

/// Build the lines for every turn of a session
fn transcript_lines(session: &Session, bubble_width: usize, lines: &mut Vec<Line<'static>>) {
    let t = theme();

    for (i, turn) in session.turns.iter().enumerate() {
        if i > 0 {
            lines.push(Line::from(""));
        }

        let (label, label_color, bg) = match turn.role {
            Role::User => ("You", t.user_label, t.user_bubble_bg),
            Role::Assistant => ("Assistant", t.assistant_label, t.assistant_bubble_bg),
        };

        lines.push(Line::from(vec![
            Span::styled(label, Style::default().fg(label_color).add_modifier(Modifier::BOLD)),
            Span::styled(
                format!("  {}", format_time_ago(turn.timestamp)),
                Style::default().fg(t.dim_fg),
            ),
        ]));

        let block = format::format(turn);
        block_lines(&block, bubble_width, bg, lines);
    }
}

fn welcome_lines(bubble_width: usize, lines: &mut Vec<Line<'static>>) {
    let t = theme();
    lines.push(Line::from(Span::styled(
        WELCOME_TITLE,
        Style::default().fg(t.accent).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(""));
    let body = vec![(WELCOME_BODY.to_string(), Style::default().fg(t.dim_fg))];
    for wrapped in wrap_segments(&body, bubble_width) {
        lines.push(Line::from(wrapped));
    }
}

/// Render a display block as bubble lines
fn block_lines(
    block: &DisplayBlock,
    bubble_width: usize,
    bg: Color,
    lines: &mut Vec<Line<'static>>,
) {
    let t = theme();

    let logical: Vec<Vec<(String, Style)>> = match block.role {
        // User text is literal; only its own newlines affect layout
        Role::User => block
            .body
            .iter()
            .flat_map(|inline| match inline {
                Inline::Text(text) => text
                    .split('\n')
                    .map(|l| vec![(l.to_string(), Style::default())])
                    .collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect(),
        Role::Assistant => split_logical_lines(&block.body),
    };

    for segments in &logical {
        for wrapped in wrap_segments(segments, bubble_width) {
            push_bubble_line(wrapped, bubble_width, bg, lines);
        }
    }

    if let Some(sources) = &block.sources {
        push_bubble_line(Vec::new(), bubble_width, bg, lines);
        push_bubble_line(
            vec![Span::styled(
                format!("{}:", SOURCES_LABEL),
                Style::default().add_modifier(Modifier::BOLD),
            )],
            bubble_width,
            bg,
            lines,
        );
        for source in sources {
            let segments = source_item_segments(source);
            for wrapped in wrap_segments(&segments, bubble_width) {
                push_bubble_line(wrapped, bubble_width, bg, lines);
            }
        }
    }

    if let Some(escalation) = &block.escalation {
        push_bubble_line(Vec::new(), bubble_width, bg, lines);
        let segments = vec![
            (
                format!("→ {}:", escalation.label),
                Style::default().fg(t.escalation_fg).add_modifier(Modifier::BOLD),
            ),
            (
                escalation.url.clone(),
                Style::default().fg(t.link_fg).add_modifier(Modifier::UNDERLINED),
            ),
            ("(^Y copies)".to_string(), Style::default().fg(t.dim_fg)),
        ];
        for wrapped in wrap_segments(&segments, bubble_width) {
            push_bubble_line(wrapped, bubble_width, bg, lines);
        }
    }
}

/// Split assistant inlines at line breaks into styled segments
fn split_logical_lines(body: &[Inline]) -> Vec<Vec<(String, Style)>> {
    let mut out = vec![Vec::new()];
    for inline in body {
        match inline {
            Inline::LineBreak => out.push(Vec::new()),
            other => {
                if let Some(current) = out.last_mut() {
                    current.extend(inline_segments(other));
                }
            }
        }
    }
    out
}

fn inline_segments(inline: &Inline) -> Vec<(String, Style)> {
    let t = theme();
    match inline {
        Inline::Text(text) => vec![(text.clone(), Style::default())],
        Inline::Bold(text) => vec![(text.clone(), Style::default().add_modifier(Modifier::BOLD))],
        Inline::Link { label, url } => {
            let link = Style::default().fg(t.link_fg).add_modifier(Modifier::UNDERLINED);
            if label == url {
                vec![(label.clone(), link)]
            } else {
                vec![
                    (label.clone(), link),
                    (format!(" <{}>", url), Style::default().fg(t.dim_fg)),
                ]
            }
        }
        Inline::LineBreak => Vec::new(),
    }
}

/// One bulleted entry of the source list
fn source_item_segments(source: &Source) -> Vec<(String, Style)> {
    let mut segments = vec![("• ".to_string(), Style::default().fg(theme().dim_fg))];
    match source {
        Source::Markup(inlines) => segments.extend(inlines.iter().flat_map(inline_segments)),
        Source::Literal(text) => segments.push((text.clone(), Style::default())),
    }
    segments
}

/// Line: [1 space padding] [content] [right padding to fill width]
fn push_bubble_line(
    content: Vec<Span<'static>>,
    bubble_width: usize,
    bg: Color,
    lines: &mut Vec<Line<'static>>,
) {
    let content_len: usize = content.iter().map(|s| s.content.chars().count()).sum();
    let right_pad = bubble_width.saturating_sub(content_len);

    let mut spans = vec![Span::styled(" ", Style::default().bg(bg))];
    spans.extend(content.into_iter().map(|s| {
        let style = s.style.bg(bg);
        Span::styled(s.content, style)
    }));
    spans.push(Span::styled(" ".repeat(right_pad + 1), Style::default().bg(bg)));
    lines.push(Line::from(spans));
}

fn render_input_bar(frame: &mut Frame, app: &App, area: Rect) {
    let t = theme();

    let middle_line = if app.controller().is_awaiting() {
        Line::from(Span::styled(
            " Waiting for a reply...",
            Style::default().fg(t.placeholder_fg),
        ))
    } else if app.input.is_empty() {
        Line::from(vec![
            Span::styled(" ", Style::default().bg(t.accent)),
            Span::styled(" Ask a question...", Style::default().fg(t.placeholder_fg)),
        ])
    } else {
        let chars: Vec<char> = app.input.chars().collect();
        // Keep the cursor visible when the input is wider than the bar
        let width = area.width.saturating_sub(2) as usize;
        let start = app.cursor.saturating_sub(width.saturating_sub(1));

        let before: String = chars[start..app.cursor.min(chars.len())].iter().collect();
        let cursor_char = chars.get(app.cursor).copied().unwrap_or(' ');
        let after: String = if app.cursor < chars.len() {
            chars[app.cursor + 1..].iter().collect()
        } else {
            String::new()
        };

        Line::from(vec![
            Span::raw(" "),
            Span::raw(before),
            Span::styled(
                cursor_char.to_string(),
                Style::default().fg(t.input_bg).bg(t.accent),
            ),
            Span::raw(after),
        ])
    };

    let lines = vec![Line::from(""), middle_line, Line::from("")];
    let paragraph = Paragraph::new(lines).style(Style::default().bg(t.input_bg));
    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let t = theme();
    let keycap = Style::default().bg(t.keycap_bg);
    let label = Style::default();
    let dim = Style::default().fg(t.dim_fg);

    let hints: Line = match &app.status {
        Some(Status::Error(msg)) => Line::from(Span::styled(msg.clone(), Style::default().fg(t.error_fg))),
        Some(Status::Info(msg)) => Line::from(Span::styled(msg.clone(), Style::default().fg(t.pending_fg))),
        None => {
            let mut spans = vec![
                Span::styled(" Enter ", keycap),
                Span::styled(" send ", label),
                Span::styled(" │ ", dim),
                Span::styled(" ^N ", keycap),
                Span::styled(" new ", label),
                Span::styled(" │ ", dim),
                Span::styled(" ^L ", keycap),
                Span::styled(" clear ", label),
            ];
            if area.width > 80 {
                spans.extend([
                    Span::styled(" │ ", dim),
                    Span::styled(" ^↑↓ ", keycap),
                    Span::styled(" switch ", label),
                    Span::styled(" │ ", dim),
                    Span::styled(" ^B ", keycap),
                    Span::styled(" sidebar ", label),
                ]);
            }
            if area.width > 100 && app.transcript_scrollable {
                spans.extend([
                    Span::styled(" │ ", dim),
                    Span::styled(" Pg↑/↓ ", keycap),
                    Span::styled(" scroll ", label),
                ]);
            }
            spans.extend([
                Span::styled(" │ ", dim),
                Span::styled(" Esc ", keycap),
                Span::styled(" quit", label),
            ]);
            Line::from(spans)
        }
    };

    let count = app.controller().store().len();
    let sessions_count = Span::styled(
        format!(" {} {}", count, if count == 1 { "chat" } else { "chats" }),
        dim,
    );

    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(sessions_count.width() as u16)])
        .split(area);

    frame.render_widget(Paragraph::new(hints), layout[0]);
    frame.render_widget(Paragraph::new(sessions_count), layout[1]);
}

fn render_confirm_dialog(frame: &mut Frame, area: Rect) {
    let t = theme();
    let width = 44.min(area.width);
    let height = 5.min(area.height);
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };

    let keycap = Style::default().bg(t.keycap_bg);
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "  Clear this conversation?",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::raw("  "),
            Span::styled(" y ", keycap),
            Span::raw(" clear   "),
            Span::styled(" n ", keycap),
            Span::raw(" cancel"),
        ]),
    ];

    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines).style(Style::default().bg(t.dialog_bg)),
        popup,
    );
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", head)
}

/// A run of non-whitespace text, possibly spanning several styles
#[derive(Default)]
struct Word {
    parts: Vec<(String, Style)>,
    width: usize,
}

impl Word {
    fn push(&mut self, text: String, style: Style) {
        self.width += text.chars().count();
        self.parts.push((text, style));
    }
}

fn split_words(segments: &[(String, Style)]) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current = Word::default();

    for (text, style) in segments {
        let mut buf = String::new();
        for c in text.chars() {
            if c.is_whitespace() {
                if !buf.is_empty() {
                    current.push(std::mem::take(&mut buf), *style);
                }
                if !current.parts.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            } else {
                buf.push(c);
            }
        }
        if !buf.is_empty() {
            current.push(buf, *style);
        }
    }
    if !current.parts.is_empty() {
        words.push(current);
    }
    words
}

/// Word-wrap styled segments to fit within max_width characters.
/// Words are separated by single spaces; over-long words are force-broken.
fn wrap_segments(segments: &[(String, Style)], max_width: usize) -> Vec<Vec<Span<'static>>> {
    let max_width = max_width.max(1);
    let mut result: Vec<Vec<Span<'static>>> = Vec::new();
    let mut line: Vec<Span<'static>> = Vec::new();
    let mut width = 0;

    for word in split_words(segments) {
        if width > 0 && width + 1 + word.width <= max_width {
            // Word fits on current line
            line.push(Span::raw(" "));
            line.extend(word.parts.into_iter().map(|(text, style)| Span::styled(text, style)));
            width += 1 + word.width;
            continue;
        }

        if width > 0 {
            result.push(std::mem::take(&mut line));
            width = 0;
        }

        if word.width <= max_width {
            line.extend(word.parts.into_iter().map(|(text, style)| Span::styled(text, style)));
            width = word.width;
            continue;
        }

        // Word too long, force break it
        for (text, style) in word.parts {
            let mut chunk = String::new();
            for c in text.chars() {
                if width == max_width {
                    if !chunk.is_empty() {
                        line.push(Span::styled(std::mem::take(&mut chunk), style));
                    }
                    result.push(std::mem::take(&mut line));
                    width = 0;
                }
                chunk.push(c);
                width += 1;
            }
            if !chunk.is_empty() {
                line.push(Span::styled(chunk, style));
            }
        }
    }

    if !line.is_empty() || result.is_empty() {
        result.push(line);
    }
    result
}

/// Format a timestamp as a human-readable "time ago" string
fn format_time_ago(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let duration = now.signed_duration_since(timestamp);

    if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else if duration.num_weeks() < 4 {
        format!("{}w ago", duration.num_weeks())
    } else {
        timestamp.format("%b %d").to_string()
    }
}

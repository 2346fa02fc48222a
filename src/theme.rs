use ratatui::style::Color;

/// Terminal theme colors, adapts to light/dark mode
pub struct Theme {
    /// Background for the active session in the sidebar
    pub selection_bg: Color,
    /// Title color of the active session
    pub selection_fg: Color,
    /// Title color of other sessions
    pub session_fg: Color,
    /// Input bar background
    pub input_bg: Color,
    /// Placeholder text color
    pub placeholder_fg: Color,
    /// Accent color (cursor, headings)
    pub accent: Color,
    /// Dim text (timestamps, status bar)
    pub dim_fg: Color,
    /// Keycap background in status bar
    pub keycap_bg: Color,
    /// User message bubble background
    pub user_bubble_bg: Color,
    /// User label color (matches user bubble)
    pub user_label: Color,
    /// Assistant message bubble background
    pub assistant_bubble_bg: Color,
    /// Assistant label color
    pub assistant_label: Color,
    /// Hyperlinks in sources and escalation
    pub link_fg: Color,
    /// Escalation call-to-action
    pub escalation_fg: Color,
    /// Separator color between panes
    pub separator_fg: Color,
    /// Pending-reply indicator
    pub pending_fg: Color,
    /// Error messages in the status bar
    pub error_fg: Color,
    /// Confirmation dialog background
    pub dialog_bg: Color,
}

impl Theme {
    /// Pick a theme: `CHATDESK_THEME=light|dark` wins, otherwise ask the terminal
    pub fn detect() -> Self {
        match std::env::var("CHATDESK_THEME").as_deref() {
            Ok("light") => return Self::light(),
            Ok("dark") => return Self::dark(),
            _ => {}
        }
        let is_light = detect_light_theme();
        if is_light {
            Self::light()
        } else {
            Self::dark()
        }
    }

    pub fn dark() -> Self {
        Self {
            selection_bg: Color::Rgb(50, 50, 55),
            selection_fg: Color::Cyan,
            session_fg: Color::Rgb(170, 170, 170),
            input_bg: Color::Rgb(30, 30, 35),
            placeholder_fg: Color::Rgb(100, 100, 100),
            accent: Color::Cyan,
            dim_fg: Color::Rgb(100, 100, 100),
            keycap_bg: Color::Rgb(60, 60, 65),
            user_bubble_bg: Color::Rgb(30, 45, 55),      // subtle cyan tint
            user_label: Color::Rgb(80, 180, 220),        // bright cyan to match bubble
            assistant_bubble_bg: Color::Rgb(45, 35, 30), // subtle orange tint
            assistant_label: Color::Rgb(255, 150, 50),
            link_fg: Color::Rgb(110, 160, 255),
            escalation_fg: Color::Rgb(240, 110, 110),
            separator_fg: Color::Rgb(60, 60, 65),
            pending_fg: Color::Yellow,
            error_fg: Color::Rgb(230, 90, 90),
            dialog_bg: Color::Rgb(45, 45, 50),
        }
    }

    pub fn light() -> Self {
        Self {
            selection_bg: Color::Rgb(220, 220, 225),
            selection_fg: Color::Rgb(0, 120, 150),
            session_fg: Color::Rgb(70, 70, 70),
            input_bg: Color::Rgb(235, 235, 240),
            placeholder_fg: Color::Rgb(150, 150, 150),
            accent: Color::Rgb(0, 150, 180),
            dim_fg: Color::Rgb(140, 140, 140),
            keycap_bg: Color::Rgb(200, 200, 205),
            user_bubble_bg: Color::Rgb(220, 235, 245),      // subtle cyan tint
            user_label: Color::Rgb(40, 130, 180),           // darker cyan for light bg
            assistant_bubble_bg: Color::Rgb(250, 235, 220), // subtle orange tint
            assistant_label: Color::Rgb(200, 100, 20),
            link_fg: Color::Rgb(20, 80, 200),
            escalation_fg: Color::Rgb(180, 40, 40),
            separator_fg: Color::Rgb(195, 195, 200),
            pending_fg: Color::Rgb(180, 120, 0),
            error_fg: Color::Rgb(190, 30, 30),
            dialog_bg: Color::Rgb(215, 215, 220),
        }
    }
}

/// Detect if terminal has a light background
fn detect_light_theme() -> bool {
    // Try to query terminal's actual background color
    if let Some(bg) = query_terminal_bg() {
        return is_light(bg);
    }

    // Fallback: Check COLORFGBG env var (format: "fg;bg" where 15=white, 0=black)
    if let Ok(val) = std::env::var("COLORFGBG") {
        if let Some(bg) = val.split(';').next_back() {
            if let Ok(bg_num) = bg.parse::<u8>() {
                return bg_num >= 7;
            }
        }
    }

    false
}

/// Check if a color is perceptually light
fn is_light(color: (u8, u8, u8)) -> bool {
    let (r, g, b) = color;
    // Luminance formula (ITU-R BT.601)
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y > 128.0
}

/// Query terminal background color using crossterm
#[cfg(unix)]
fn query_terminal_bg() -> Option<(u8, u8, u8)> {
    use crossterm::style::{query_background_color, Color as CtColor};
    use std::sync::OnceLock;

    // Querying is slow; do it once per process
    static CACHED: OnceLock<Option<(u8, u8, u8)>> = OnceLock::new();

    *CACHED.get_or_init(|| {
        query_background_color()
            .ok()
            .flatten()
            .and_then(|c| match c {
                CtColor::Rgb { r, g, b } => Some((r, g, b)),
                _ => None,
            })
    })
}

#[cfg(not(unix))]
fn query_terminal_bg() -> Option<(u8, u8, u8)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_light() {
        assert!(is_light((255, 255, 255)));
        assert!(!is_light((0, 0, 0)));
        assert!(!is_light((30, 30, 35)));
    }
}

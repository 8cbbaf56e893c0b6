//! Icons, colors and column widths.

use crossterm::style::Color;

#[derive(Debug, Clone)]
pub struct Theme {
    pub icons: Icons,
    pub colors: Colors,
    /// Width of the label column in `status` and `channels`.
    pub label_width: usize,
    /// Width of the progress bar in cells.
    pub bar_width: usize,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            icons: Icons::default(),
            colors: Colors::default(),
            label_width: 14,
            bar_width: 24,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Icons {
    pub active: &'static str,
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
    pub selected: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            active: "●",
            success: "✓",
            error: "✗",
            warning: "⚠",
            info: "ℹ",
            selected: "▸",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Colors {
    pub label: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            label: Color::DarkGrey,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
        }
    }
}

//! Progress line formatting.

use upd_schema::{ApplyPhase, ApplyProgress};

/// Fixed-width bar using ▓ (filled) and ░ (empty).
pub fn format_progress_bar(percent: u8, width: usize) -> String {
    let percent = usize::from(percent.min(100));
    let filled = (percent * width + 50) / 100;
    let empty = width.saturating_sub(filled);
    format!("{}{}", "▓".repeat(filled), "░".repeat(empty))
}

/// `<bar>  42%  downloading`, with the phase label padded so shorter
/// labels overwrite longer ones on the same line.
pub fn format_apply_progress(progress: ApplyProgress, width: usize) -> String {
    let bar = format_progress_bar(progress.percent, width);
    format!(
        "{bar}  {:>3}%  {:<20}",
        progress.percent,
        progress.phase.label()
    )
}

/// Whether `phase` ends the live progress line.
pub fn is_terminal(phase: ApplyPhase) -> bool {
    matches!(phase, ApplyPhase::Done | ApplyPhase::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_bounds() {
        assert_eq!(format_progress_bar(0, 4), "░░░░");
        assert_eq!(format_progress_bar(50, 4), "▓▓░░");
        assert_eq!(format_progress_bar(100, 4), "▓▓▓▓");
        assert_eq!(format_progress_bar(250, 4), "▓▓▓▓");
    }

    #[test]
    fn test_apply_line() {
        let line = format_apply_progress(
            ApplyProgress {
                percent: 42,
                phase: ApplyPhase::Downloading,
            },
            10,
        );
        assert!(line.starts_with("▓▓▓▓░░░░░░   42%  downloading"));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(is_terminal(ApplyPhase::Done));
        assert!(is_terminal(ApplyPhase::Failed));
        assert!(!is_terminal(ApplyPhase::Verifying));
    }
}

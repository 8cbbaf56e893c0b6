//! UI actor: the only thread that writes to stdout.
//!
//! Many senders (commands, the download task, the blocking extraction task)
//! fire events without waiting for the terminal; one receiver renders them
//! in order. The actor exclusively owns the live progress line, so nothing
//! else needs to lock it.

use std::io::{self, Write};
use std::sync::mpsc;
use std::thread;

use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{cursor, queue};
use upd_schema::{ApplyPhase, ApplyProgress};

use super::progress::{format_apply_progress, is_terminal};
use super::theme::Theme;

/// Events that can be sent to the UI actor
#[derive(Debug)]
pub enum UiEvent {
    /// Print a bold section header
    Header(String),
    /// Print an aligned `label value` row
    Field { label: String, value: String },
    /// Print a list row, highlighted when `selected`
    Item { text: String, selected: bool },
    /// Redraw the live progress line
    Progress(ApplyProgress),
    /// Print info message
    Info(String),
    /// Print success message
    Success(String),
    /// Print warning message
    Warning(String),
    /// Print error message
    Error(String),
    /// Print a raw line (JSON output)
    Raw(String),
    /// Reply once every earlier event has been rendered
    Sync(tokio::sync::oneshot::Sender<()>),
    /// Shutdown the actor
    Shutdown,
}

/// Handle to the UI actor thread
#[derive(Debug)]
pub struct UiActor {
    sender: mpsc::Sender<UiEvent>,
    _handle: thread::JoinHandle<()>,
}

impl UiActor {
    /// Spawn a UI actor thread writing to stdout.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut renderer = Renderer::new(io::stdout(), Theme::default());
            run_event_loop(&receiver, &mut renderer);
        });
        Self {
            sender,
            _handle: handle,
        }
    }

    /// Get a cloneable sender for this actor
    pub fn sender(&self) -> mpsc::Sender<UiEvent> {
        self.sender.clone()
    }
}

impl Drop for UiActor {
    fn drop(&mut self) {
        let _ = self.sender.send(UiEvent::Shutdown);
    }
}

fn run_event_loop<W: Write>(receiver: &mpsc::Receiver<UiEvent>, renderer: &mut Renderer<W>) {
    while let Ok(event) = receiver.recv() {
        match event {
            UiEvent::Sync(tx) => {
                let _ = renderer.out.flush();
                let _ = tx.send(());
            }
            UiEvent::Shutdown => break,
            other => {
                if let Err(e) = renderer.render(other) {
                    tracing::debug!(error = %e, "terminal write failed");
                }
            }
        }
    }
    let _ = renderer.finish_line();
}

/// Terminal state owned by the actor thread.
struct Renderer<W: Write> {
    out: W,
    theme: Theme,
    /// A progress line is on screen without a trailing newline.
    live: Option<ApplyPhase>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W, theme: Theme) -> Self {
        Self {
            out,
            theme,
            live: None,
        }
    }

    fn render(&mut self, event: UiEvent) -> io::Result<()> {
        if let UiEvent::Progress(progress) = event {
            return self.progress(progress);
        }

        self.finish_line()?;
        let icons = self.theme.icons;
        let colors = self.theme.colors;
        match event {
            UiEvent::Header(title) => {
                writeln!(self.out)?;
                writeln!(self.out, "{}", title.bold())?;
            }
            UiEvent::Field { label, value } => {
                let padded = format!("{label:<width$}", width = self.theme.label_width);
                writeln!(self.out, "  {}{value}", padded.with(colors.label))?;
            }
            UiEvent::Item { text, selected } => {
                if selected {
                    writeln!(self.out, "{} {}", icons.selected, text.bold())?;
                } else {
                    writeln!(self.out, "  {text}")?;
                }
            }
            UiEvent::Info(msg) => writeln!(self.out, "{} {msg}", icons.info)?,
            UiEvent::Success(msg) => {
                writeln!(self.out, "{} {}", icons.success.with(colors.success), msg)?;
            }
            UiEvent::Warning(msg) => {
                writeln!(self.out, "{} {}", icons.warning.with(colors.warning), msg)?;
            }
            UiEvent::Error(msg) => {
                writeln!(self.out, "{} {}", icons.error.with(colors.error), msg.red())?;
            }
            UiEvent::Raw(line) => writeln!(self.out, "{line}")?,
            UiEvent::Progress(_) | UiEvent::Sync(_) | UiEvent::Shutdown => {}
        }
        self.out.flush()
    }

    fn progress(&mut self, progress: ApplyProgress) -> io::Result<()> {
        if progress.phase == ApplyPhase::Idle {
            return Ok(());
        }
        let icon = match progress.phase {
            ApplyPhase::Done => self.theme.icons.success.with(self.theme.colors.success),
            ApplyPhase::Failed => self.theme.icons.error.with(self.theme.colors.error),
            _ => self.theme.icons.active.with(self.theme.colors.label),
        };
        let line = format_apply_progress(progress, self.theme.bar_width);
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine)
        )?;
        write!(self.out, "{icon} {line}")?;
        self.live = Some(progress.phase);
        if is_terminal(progress.phase) {
            self.finish_line()?;
        }
        self.out.flush()
    }

    /// End an open progress line so the next write starts on a fresh row.
    fn finish_line(&mut self) -> io::Result<()> {
        if self.live.take().is_some() {
            writeln!(self.out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(events: Vec<UiEvent>) -> String {
        let (tx, rx) = mpsc::channel();
        for e in events {
            tx.send(e).unwrap();
        }
        drop(tx);
        let mut renderer = Renderer::new(Vec::new(), Theme::default());
        run_event_loop(&rx, &mut renderer);
        String::from_utf8(renderer.out).unwrap()
    }

    #[test]
    fn test_progress_line_is_closed_before_messages() {
        let out = render_all(vec![
            UiEvent::Progress(ApplyProgress::new(10, ApplyPhase::Downloading)),
            UiEvent::Progress(ApplyProgress::new(20, ApplyPhase::Downloading)),
            UiEvent::Warning("slow mirror".into()),
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" 20%"));
        assert!(lines[1].contains("slow mirror"));
    }

    #[test]
    fn test_done_ends_line() {
        let out = render_all(vec![
            UiEvent::Progress(ApplyProgress::new(100, ApplyPhase::Done)),
            UiEvent::Info("next".into()),
        ]);
        assert!(out.ends_with("next\n"));
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_idle_is_not_drawn() {
        let out = render_all(vec![UiEvent::Progress(ApplyProgress::new(0, ApplyPhase::Idle))]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_sync_replies_after_earlier_events() {
        let (tx, rx) = mpsc::channel();
        let (sync_tx, mut sync_rx) = tokio::sync::oneshot::channel();
        tx.send(UiEvent::Raw("{}".into())).unwrap();
        tx.send(UiEvent::Sync(sync_tx)).unwrap();
        drop(tx);
        let mut renderer = Renderer::new(Vec::new(), Theme::default());
        run_event_loop(&rx, &mut renderer);
        assert!(sync_rx.try_recv().is_ok());
        assert_eq!(String::from_utf8(renderer.out).unwrap(), "{}\n");
    }
}

//! Handle that commands and the pipeline use to reach the UI actor.

use std::sync::{OnceLock, mpsc};

use upd_core::Reporter;
use upd_schema::ApplyProgress;

use super::actor::{UiActor, UiEvent};

static UI_ACTOR: OnceLock<mpsc::Sender<UiEvent>> = OnceLock::new();

fn actor_sender() -> mpsc::Sender<UiEvent> {
    UI_ACTOR
        .get_or_init(|| {
            let actor = UiActor::spawn();
            let sender = actor.sender();
            // Keep the actor alive for the program duration.
            std::mem::forget(actor);
            sender
        })
        .clone()
}

/// A cloneable handle for sending UI events to the terminal actor.
#[derive(Debug, Clone)]
pub struct Output {
    sender: mpsc::Sender<UiEvent>,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self {
            sender: actor_sender(),
        }
    }

    fn send(&self, event: UiEvent) {
        let _ = self.sender.send(event);
    }

    pub fn header(&self, title: &str) {
        self.send(UiEvent::Header(title.to_string()));
    }

    pub fn field(&self, label: &str, value: &dyn std::fmt::Display) {
        self.send(UiEvent::Field {
            label: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn item(&self, text: &str, selected: bool) {
        self.send(UiEvent::Item {
            text: text.to_string(),
            selected,
        });
    }

    pub fn info(&self, msg: &str) {
        self.send(UiEvent::Info(msg.to_string()));
    }

    pub fn success(&self, msg: &str) {
        self.send(UiEvent::Success(msg.to_string()));
    }

    pub fn warning(&self, msg: &str) {
        self.send(UiEvent::Warning(msg.to_string()));
    }

    pub fn error(&self, msg: &str) {
        self.send(UiEvent::Error(msg.to_string()));
    }

    pub fn raw(&self, line: &str) {
        self.send(UiEvent::Raw(line.to_string()));
    }

    /// Wait until every event sent so far has been rendered.
    pub async fn wait_async(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(UiEvent::Sync(tx));
        let _ = rx.await;
    }
}

impl Reporter for Output {
    fn progress(&self, progress: ApplyProgress) {
        self.send(UiEvent::Progress(progress));
    }

    fn info(&self, msg: &str) {
        Output::info(self, msg);
    }

    fn warning(&self, msg: &str) {
        Output::warning(self, msg);
    }

    fn error(&self, msg: &str) {
        Output::error(self, msg);
    }
}

//! Lifecycle event bridge.
//!
//! Turns ingest notifications and termination signals into supervisor calls, and owns
//! the loop that multiplexes them with relay exits and timers.
use std::{future::Future, io};

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{
    constants::SHUTDOWN_GRACE,
    error::RelayError,
    launcher::Launcher,
    stream::{LocatorSource, PublishSession, StreamIdentity},
    supervisor::Supervisor,
};

/// Publish lifecycle event reported by the ingest server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IngestEvent {
    Started,
    Stopped,
}

/// One notification, as carried over the notification socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestNotification {
    pub event: IngestEvent,
    /// Full publish path, when the sender knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Session fields the path can be recovered from otherwise.
    #[serde(default)]
    pub session: PublishSession,
}

impl IngestNotification {
    pub fn new(event: IngestEvent, path: impl Into<String>) -> Self {
        Self {
            event,
            path: Some(path.into()),
            session: PublishSession::default(),
        }
    }
}

impl LocatorSource for IngestNotification {
    fn explicit_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.session.explicit_path())
    }

    fn raw_name(&self) -> Option<(&str, Option<&str>)> {
        self.session.raw_name()
    }
}

/// Derives the stream identity a notification refers to. Never guesses.
pub fn resolve_identity(
    notification: &IngestNotification,
    default_app: &str,
) -> Result<StreamIdentity, RelayError> {
    notification
        .locator()
        .and_then(|locator| StreamIdentity::from_path(&locator.into_path(default_app)))
        .ok_or_else(|| RelayError::UnresolvedStreamIdentity {
            event: notification.event.to_string(),
        })
}

/// Applies one notification to the supervisor.
pub fn dispatch<L: Launcher>(supervisor: &mut Supervisor<L>, notification: IngestNotification) {
    let identity = match resolve_identity(&notification, &supervisor.config().ingest.default_app)
    {
        Ok(identity) => identity,
        Err(err) => {
            warn!("{err}; ignoring notification");
            return;
        }
    };

    match notification.event {
        IngestEvent::Started => supervisor.start_stream(&identity),
        IngestEvent::Stopped => {
            supervisor.stop_stream(&identity);
        }
    }
}

/// SIGINT and SIGTERM listeners, installed before the loop starts.
pub struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves with whichever termination signal arrives first.
    pub async fn recv(mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::SIGINT,
            _ = self.terminate.recv() => Signal::SIGTERM,
        }
    }
}

/// Runs the supervisor until `shutdown` resolves, then stops every stream with the
/// received signal and waits at most [`SHUTDOWN_GRACE`] for relays to exit.
pub async fn run<L, F>(
    supervisor: &mut Supervisor<L>,
    mut notifications: mpsc::Receiver<IngestNotification>,
    shutdown: F,
) where
    L: Launcher,
    F: Future<Output = Signal>,
{
    tokio::pin!(shutdown);
    info!("Waiting for ingest notifications");

    let signal = loop {
        tokio::select! {
            signal = &mut shutdown => break signal,
            Some(notification) = notifications.recv() => dispatch(supervisor, notification),
            event = supervisor.next_event() => supervisor.dispatch(event),
        }
    };

    info!("Received {signal}; stopping all relays");
    supervisor.shutdown_all(signal);
    supervisor.drain(SHUTDOWN_GRACE).await;
}

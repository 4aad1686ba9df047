//! Notification socket between ingest hooks and the running supervisor.
//!
//! Each connection carries exactly one JSON-encoded [`IngestNotification`] terminated
//! by a newline, answered with one JSON-encoded [`ControlResponse`].
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader as AsyncBufReader},
    net::{UnixListener, UnixStream as AsyncUnixStream},
    sync::mpsc,
    time,
};
use tracing::{debug, warn};

use crate::{
    bridge::IngestNotification,
    constants::{NOTIFICATION_READ_TIMEOUT, SOCKET_FILE_NAME},
    error::ControlError,
};

/// Directory under `$HOME` where runtime artifacts (the socket file) are stored.
fn runtime_dir() -> Result<PathBuf, ControlError> {
    let home = std::env::var("HOME").map_err(|_| ControlError::MissingHome)?;
    let path = PathBuf::from(home).join(".local/share/streamrelay");
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Returns the unix socket path used when the configuration does not name one.
pub fn default_socket_path() -> Result<PathBuf, ControlError> {
    Ok(runtime_dir()?.join(SOCKET_FILE_NAME))
}

/// Response sent by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    Ok,
    Error(String),
}

/// Binds the notification socket, replacing a stale socket file left by an earlier run.
pub fn bind(path: &Path) -> Result<UnixListener, ControlError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

/// Accepts connections forever, forwarding each decoded notification to `forward`.
/// Each connection is served on its own task. Returns once the receiving side has gone
/// away.
pub async fn serve(listener: UnixListener, forward: mpsc::Sender<IngestNotification>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(err) => {
                warn!("Failed to accept notification connection: {err}");
                continue;
            }
        };

        if forward.is_closed() {
            debug!("Supervisor loop ended; closing notification socket");
            return;
        }

        let forward = forward.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &forward).await {
                warn!("Notification connection failed: {err}");
            }
        });
    }
}

async fn handle_connection(
    stream: AsyncUnixStream,
    forward: &mpsc::Sender<IngestNotification>,
) -> Result<(), ControlError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = AsyncBufReader::new(read_half);
    let mut line = String::new();
    time::timeout(NOTIFICATION_READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no notification received"))??;

    let response = match read_notification(&line) {
        Ok(notification) => {
            debug!("Received {} notification", notification.event);
            match forward.send(notification).await {
                Ok(()) => ControlResponse::Ok,
                Err(_) => ControlResponse::Error("supervisor is shutting down".into()),
            }
        }
        Err(err) => ControlResponse::Error(err.to_string()),
    };

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;
    write_half.flush().await?;
    Ok(())
}

/// Decodes one notification line.
pub fn read_notification(line: &str) -> Result<IngestNotification, ControlError> {
    if line.trim().is_empty() {
        return Err(ControlError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty notification",
        )));
    }

    Ok(serde_json::from_str(line.trim())?)
}

/// Sends a notification to the supervisor and waits for its response.
pub fn send_notification(
    path: &Path,
    notification: &IngestNotification,
) -> Result<ControlResponse, ControlError> {
    if !path.exists() {
        return Err(ControlError::NotAvailable(path.display().to_string()));
    }

    let mut stream = UnixStream::connect(path)?;
    let payload = serde_json::to_vec(notification)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    if response_line.trim().is_empty() {
        return Err(ControlError::NotAvailable(path.display().to_string()));
    }

    let response: ControlResponse = serde_json::from_str(response_line.trim())?;
    if let ControlResponse::Error(message) = &response {
        return Err(ControlError::Server(message.clone()));
    }

    Ok(response)
}

/// Removes the socket file.
pub fn cleanup_socket(path: &Path) {
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        warn!("Failed to remove notification socket {}: {err}", path.display());
    }
}

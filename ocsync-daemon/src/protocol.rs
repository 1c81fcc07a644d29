//! Client side of the control socket.
//!
//! One JSON object per line in each direction. Every command gets exactly one
//! [`DaemonResponse`]; `subscribe` then keeps the connection open and streams
//! [`StatusUpdate`] lines until either side hangs up.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ocsync_core::{Configuration, SyncStatus};

use crate::error::{io_err, DaemonError};
use crate::orchestrator::Phase;
use crate::paths::socket_path;
use crate::process::ProcessOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Only for `configure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Configuration>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            config: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Streamed to `subscribe` clients after each status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SyncStatus,
}

/// Answer to `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status: SyncStatus,
    pub phase: Phase,
    pub submit_again: bool,
    pub force_stop: bool,
    pub timer_armed: bool,
    pub runs_started: u64,
    pub last_outcome: Option<ProcessOutcome>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub watching: Option<PathBuf>,
    pub local_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

fn connect(home: &Path) -> Result<(UnixStream, PathBuf), DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;
    Ok((stream, socket))
}

fn write_request(
    stream: &mut UnixStream,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

/// `Ok(None)` on EOF.
fn read_line(
    reader: &mut BufReader<UnixStream>,
    socket: &Path,
) -> Result<Option<String>, DaemonError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let (mut stream, socket) = connect(home)?;
    write_request(&mut stream, &socket, request)?;

    let mut reader = BufReader::new(stream);
    let line = read_line(&mut reader, &socket)?.ok_or_else(|| {
        DaemonError::Protocol("daemon closed connection before responding".to_string())
    })?;
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Query the running daemon. Retries briefly so a CLI started right after
/// `daemon start` does not race the socket bind.
pub fn request_status(home: &Path) -> Result<StatusSnapshot, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => {
                let data = response_into_data(response)?;
                return Ok(serde_json::from_value(data)?);
            }
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, &DaemonRequest::command("stop"))?)
}

/// `force` also restarts the periodic cadence; a plain sync leaves it alone.
pub fn request_sync(home: &Path, force: bool) -> Result<Value, DaemonError> {
    let cmd = if force { "force" } else { "sync" };
    response_into_data(send_request(home, &DaemonRequest::command(cmd))?)
}

pub fn request_configure(home: &Path, config: &Configuration) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        cmd: "configure".to_string(),
        config: Some(config.clone()),
    };
    response_into_data(send_request(home, &request)?)
}

/// Subscribe to status transitions. `on_status` first sees the current
/// status, then every transition; returning `false` ends the subscription.
/// Also returns when the daemon closes the stream.
pub fn follow_status(
    home: &Path,
    mut on_status: impl FnMut(SyncStatus) -> bool,
) -> Result<(), DaemonError> {
    let (mut stream, socket) = connect(home)?;
    write_request(&mut stream, &socket, &DaemonRequest::command("subscribe"))?;

    let mut reader = BufReader::new(stream);
    let first = read_line(&mut reader, &socket)?.ok_or_else(|| {
        DaemonError::Protocol("daemon closed connection before responding".to_string())
    })?;
    let response: DaemonResponse = serde_json::from_str(first.trim_end())?;
    let initial: StatusUpdate = serde_json::from_value(response_into_data(response)?)?;
    if !on_status(initial.status) {
        return Ok(());
    }

    while let Some(line) = read_line(&mut reader, &socket)? {
        let update: StatusUpdate = serde_json::from_str(line.trim_end())?;
        if !on_status(update.status) {
            break;
        }
    }
    Ok(())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_commands_omit_config() {
        let line = serde_json::to_string(&DaemonRequest::command("status")).expect("json");
        assert_eq!(line, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn configure_request_carries_full_record() {
        let config = Configuration::defaults_at(Path::new("/home/alice"));
        let request = DaemonRequest {
            cmd: "configure".into(),
            config: Some(config.clone()),
        };
        let parsed: DaemonRequest =
            serde_json::from_str(&serde_json::to_string(&request).expect("json")).expect("parse");
        assert_eq!(parsed.config, Some(config));
    }

    #[test]
    fn error_response_surfaces_message() {
        let err = response_into_data(DaemonResponse::error("timeout must be at least 1 second"))
            .unwrap_err();
        assert!(err.to_string().contains("at least 1 second"), "got {err}");
    }

    #[test]
    fn status_update_wire_shape() {
        let line = serde_json::to_value(StatusUpdate {
            status: SyncStatus::Syncing,
        })
        .expect("json");
        assert_eq!(line, json!({"status": "syncing"}));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("tmp");
        let err = request_sync(home.path(), false).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got {err}");
    }
}

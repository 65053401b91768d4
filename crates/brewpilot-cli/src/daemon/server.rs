//! Unix socket server for the daemon process.
//!
//! Clients speak newline-delimited JSON. Every command is answered from
//! the controller handle without waiting on the control loop: submissions
//! are accepted or refused immediately, and clients poll `status` to follow
//! progress.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brewpilot_core::error::ApiError;
use brewpilot_core::protocol::{Command, Request, Response, ResponseData};
use brewpilot_core::state::RequestKind;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::daemon::paths;
use crate::machine::controller::ControllerHandle;

/// Concurrent client connections.
const MAX_CONNECTIONS: usize = 32;

/// How often the daemon checks that the control thread is still alive.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for in-flight connections to complete during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests are a few hundred bytes; anything past this is garbage.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    controller: ControllerHandle,
    connection_semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Bind to the socket of the current instance.
    pub async fn bind(controller: ControllerHandle) -> Result<Self> {
        let socket_path = paths::get_socket_path(None);
        let pid_path = paths::get_pid_path(None);
        Self::bind_to(socket_path, pid_path, controller).await
    }

    /// Bind to `socket_path`, replacing a stale socket left by a dead daemon.
    ///
    /// Binds first and inspects the PID file only when the address is taken,
    /// so two daemons racing for one socket cannot both succeed.
    pub async fn bind_to(
        socket_path: PathBuf,
        pid_path: PathBuf,
        controller: ControllerHandle,
    ) -> Result<Self> {
        paths::ensure_socket_dir().context("Failed to create socket directory")?;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory for {:?}", socket_path)
            })?;
        }

        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_daemon_alive(&pid_path) {
                    anyhow::bail!(
                        "Daemon already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                // Never follow a symlink when removing the stale socket.
                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;
                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "Socket path {:?} is a symlink, refusing to delete it",
                        socket_path
                    );
                }

                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "Path {:?} exists but is not a socket file (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("Removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!("Daemon listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            controller,
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Accept connections until a shutdown command arrives or the control
    /// thread dies. In-flight connections get a grace period to finish.
    pub async fn run(&self) -> Result<()> {
        self.spawn_watchdog();

        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("Accepted new connection");
                            let controller = self.controller.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, controller, shutdown).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {}
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }

    /// Shut the daemon down if the control thread exits on its own.
    fn spawn_watchdog(&self) {
        let controller = self.controller.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                if !controller.is_running() {
                    error!("Control thread stopped unexpectedly, shutting down");
                    shutdown.notify_waiters();
                    break;
                }
            }
        });
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// Whether the PID file names a live process.
fn is_daemon_alive(pid_path: &Path) -> bool {
    let pid_str = match std::fs::read_to_string(pid_path) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let pid: i32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };

    // SAFETY: signal 0 only checks that the process exists and may be
    // signalled; nothing is delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read one line of at most `max_size` bytes. Returns 0 at EOF.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;

    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader
            .fill_buf()
            .await
            .context("Failed to read from client")?;

        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let take = newline_pos.map(|p| p + 1).unwrap_or(available.len());

        if total + take > max_size {
            anyhow::bail!("Request too large: exceeded {} byte limit", max_size);
        }

        bytes.extend_from_slice(&available[..take]);
        total += take;
        reader.consume(take);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
    buf.push_str(line);
    Ok(total)
}

async fn handle_connection(
    stream: UnixStream,
    controller: ControllerHandle,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = read_line_bounded(&mut reader, &mut line, MAX_REQUEST_SIZE).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &controller, &shutdown),
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Send one JSON object per line with 'id' and 'command' fields. Example: {\"id\":\"1\",\"command\":{\"action\":\"status\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        debug!("Sending: {}", response_json);

        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush")?;
    }

    Ok(())
}

fn handle_request(
    request: Request,
    controller: &ControllerHandle,
    shutdown: &Arc<Notify>,
) -> Response {
    debug!("Handling command: {:?}", request.command);

    match request.command {
        Command::Submit {
            request: kind,
            parameter,
        } => handle_submit(&request.id, controller, kind, parameter),
        Command::Status => {
            Response::success(&request.id, ResponseData::Status(controller.status()))
        }
        Command::Events { after } => Response::success(
            &request.id,
            ResponseData::Events {
                entries: controller.events_after(after),
            },
        ),
        Command::Shutdown => handle_shutdown(&request.id, controller, shutdown),
    }
}

/// Range check parameters up front so a typo is reported instead of
/// failing the request on the appliance.
fn validate_parameter(kind: RequestKind, parameter: i32) -> Result<(), ApiError> {
    let range = match kind {
        RequestKind::SetAroma => 0..=5,
        RequestKind::SetTemperature => 0..=2,
        _ => return Ok(()),
    };
    if range.contains(&parameter) {
        return Ok(());
    }
    Err(ApiError::invalid_input_with_suggestion(
        format!("Parameter {} is out of range for '{}'", parameter, kind),
        format!("Use a value from {} to {}", range.start(), range.end()),
    ))
}

fn handle_submit(
    request_id: &str,
    controller: &ControllerHandle,
    kind: RequestKind,
    parameter: i32,
) -> Response {
    if let Err(e) = validate_parameter(kind, parameter) {
        return Response::error(request_id, e);
    }
    match controller.submit(kind, parameter) {
        Ok(()) => {
            info!("Accepted request {} ({})", kind, parameter);
            Response::success(
                request_id,
                ResponseData::Accepted {
                    request: kind,
                    parameter,
                },
            )
        }
        Err(e) => Response::error(request_id, e),
    }
}

fn handle_shutdown(
    request_id: &str,
    controller: &ControllerHandle,
    shutdown: &Arc<Notify>,
) -> Response {
    info!("Received shutdown command, stopping controller");

    let controller = controller.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        // Joining the control thread blocks for up to one procedure.
        if tokio::task::spawn_blocking(move || controller.stop())
            .await
            .is_err()
        {
            warn!("Stopping the controller panicked");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
    });

    Response::success(
        request_id,
        ResponseData::Ok {
            message: "Daemon shutting down".to_string(),
        },
    )
}

//! Client side of the daemon socket.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use brewpilot_core::protocol::{Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::daemon::paths;

/// Every command is answered without waiting on the appliance.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon of the current instance.
    ///
    /// The daemon owns the serial port and GPIO lines, so it is never
    /// started implicitly.
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&paths::get_socket_path(None)).await
    }

    pub async fn connect_to(socket_path: &Path) -> Result<Self> {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                debug!("Connected to daemon at {:?}", socket_path);
                Ok(Self { stream })
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "No daemon listening on {:?} (start one with 'brewpilot daemon --serial <port>')",
                    socket_path
                )
            }),
        }
    }

    pub async fn request(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, REQUEST_TIMEOUT).await
    }

    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        timeout_duration: Duration,
    ) -> Result<Response> {
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize request")?;
        debug!("Sending: {}", request_json);

        self.stream
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to write request")?;
        self.stream
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        self.stream.flush().await.context("Failed to flush")?;

        let (reader, _writer) = self.stream.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        let bytes_read = timeout(timeout_duration, reader.read_line(&mut response_line))
            .await
            .context("Request timed out")?
            .context("Failed to read response")?;

        if bytes_read == 0 {
            bail!("Daemon closed connection unexpectedly");
        }

        debug!("Received: {}", response_line.trim());

        let response: Response =
            serde_json::from_str(&response_line).context("Failed to parse response")?;
        Ok(response)
    }
}

//! JSON-lines protocol layer.
//!
//! Routes requests read from the UI to the [`TerminalSessionManager`] and
//! writes responses and push events back, one JSON object per line. All
//! output goes through a single writer task so lines never interleave.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use devterm_core::{Dimensions, SessionEvent};
use devterm_pty::TerminationMode;
use devterm_session::TerminalSessionManager;

use crate::codec::EventEncoder;
use crate::messages::*;

/// How long shutdown waits for already queued events to be written out.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Request handler in front of a session manager.
#[derive(Debug, Clone)]
pub struct TerminalServer {
    manager: Arc<TerminalSessionManager>,
}

impl TerminalServer {
    /// Create a server for `manager`.
    pub fn new(manager: Arc<TerminalSessionManager>) -> Self {
        Self { manager }
    }

    /// Session manager behind this server.
    pub fn manager(&self) -> &Arc<TerminalSessionManager> {
        &self.manager
    }

    /// Handle one raw request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Unreadable request: {}", e);
                Response::failure(None, ErrorBody::new(PARSE_ERROR, format!("Invalid request: {e}")))
            }
        }
    }

    /// Handle one request.
    #[instrument(skip_all, fields(id = request.id, method = %request.method))]
    pub async fn handle(&self, request: Request) -> Response {
        let Some(method) = Method::parse(&request.method) else {
            warn!("Unknown method");
            return Response::failure(
                Some(request.id),
                ErrorBody::new(
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", request.method),
                ),
            );
        };

        match self.dispatch(method, request.params).await {
            Ok(result) => Response::success(request.id, result),
            Err(error) => Response::failure(Some(request.id), error),
        }
    }

    async fn dispatch(&self, method: Method, params: Value) -> Result<Value, ErrorBody> {
        match method {
            Method::Create => {
                let params: CreateParams = parse_params(params)?;
                self.terminal_create(params).await
            }
            Method::Resize => {
                let params: ResizeParams = parse_params(params)?;
                debug!(
                    "Resizing terminal {} to {}x{}",
                    params.terminal_id, params.cols, params.rows
                );
                ack(self
                    .manager
                    .resize(params.terminal_id, params.cols, params.rows))
            }
            Method::Write => {
                let params: WriteParams = parse_params(params)?;
                ack(self
                    .manager
                    .write(params.terminal_id, params.data.as_bytes()))
            }
            Method::Close => {
                let params: CloseParams = parse_params(params)?;
                let mode = if params.force {
                    TerminationMode::Forced
                } else {
                    TerminationMode::Graceful
                };
                ack(self.manager.close_with(params.terminal_id, mode))
            }
            Method::ChangeDirectory => {
                let params: ChangeDirectoryParams = parse_params(params)?;
                ack(self
                    .manager
                    .change_directory(params.terminal_id, Path::new(&params.directory)))
            }
            Method::Execute => {
                let params: ExecuteParams = parse_params(params)?;
                ack(self.manager.execute(params.terminal_id, &params.command))
            }
            Method::List => {
                let _: ListParams = parse_params(params)?;
                to_result(&ListResponse {
                    terminals: self.manager.list(),
                })
            }
        }
    }

    async fn terminal_create(&self, params: CreateParams) -> Result<Value, ErrorBody> {
        info!(
            "Creating terminal: cols={:?}, rows={:?}, cwd={:?}",
            params.cols, params.rows, params.cwd
        );

        let id = self
            .manager
            .create(params.cols, params.rows, params.cwd.map(PathBuf::from))
            .await
            .map_err(|e| {
                error!("Failed to create terminal: {}", e);
                ErrorBody::from(&e)
            })?;

        let info = self.manager.info(id).map_err(|e| ErrorBody::from(&e))?;
        let Dimensions { rows, cols } = info.dimensions;

        to_result(&CreateResponse {
            terminal_id: id,
            shell: info.shell,
            cols,
            rows,
        })
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ErrorBody> {
    // Parameterless methods may omit `params` entirely
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| ErrorBody::new(INVALID_PARAMS, format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ErrorBody> {
    serde_json::to_value(value)
        .map_err(|e| ErrorBody::new(INTERNAL_ERROR, format!("Failed to encode result: {e}")))
}

fn ack(success: bool) -> Result<Value, ErrorBody> {
    to_result(&AckResponse { success })
}

/// Serve the protocol until `input` ends or `shutdown` resolves.
///
/// Requests are handled in arrival order. Session events from `events` are
/// forwarded as they come. On the way out every session is terminated through
/// [`TerminalSessionManager::shutdown`] and pending output lines are flushed.
pub async fn serve<R, W, S>(
    server: TerminalServer,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    input: R,
    output: W,
    shutdown: S,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = out_rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let event_tx = out_tx.clone();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let mut forwarder = tokio::spawn(async move {
        let mut encoder = EventEncoder::new();
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                _ = &mut stop_rx => break,
            };
            let Some(event) = event else {
                return;
            };
            if !forward_event(&mut encoder, event, &event_tx) {
                return;
            }
        }

        // Only what was queued before the stop request is flushed
        while let Ok(event) = events.try_recv() {
            if !forward_event(&mut encoder, event, &event_tx) {
                return;
            }
        }
    });

    let mut lines = BufReader::new(input).lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input closed");
                break;
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = server.handle_line(&line).await;
        let encoded = serde_json::to_string(&response)?;
        if out_tx.send(encoded).is_err() {
            warn!("Output closed, stopping");
            break;
        }
    }

    server.manager().shutdown();

    // Exit notifications of the swept sessions are not waited for
    let _ = stop_tx.send(());
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, &mut forwarder).await.is_err() {
        warn!("Timed out flushing queued events");
        forwarder.abort();
    }
    drop(out_tx);

    match writer.await {
        Ok(result) => result?,
        Err(e) => error!("Writer task failed: {}", e),
    }

    Ok(())
}

/// Encode one event onto the output channel. False once output is gone.
fn forward_event(
    encoder: &mut EventEncoder,
    event: SessionEvent,
    out: &mpsc::UnboundedSender<String>,
) -> bool {
    for event in encoder.encode(event) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if out.send(line).is_err() {
                    return false;
                }
            }
            Err(e) => error!("Failed to encode event: {}", e),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use devterm_core::{ExitStatus, SessionId};
    use devterm_pty::ShellResolver;
    use devterm_session::SessionManagerConfig;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn server() -> TerminalServer {
        let (tx, _rx) = mpsc::unbounded_channel();
        let resolver = ShellResolver::from_env().with_shell_override(Some("/bin/sh".to_string()));
        let manager =
            TerminalSessionManager::new(SessionManagerConfig::default(), resolver, Arc::new(tx));
        TerminalServer::new(Arc::new(manager))
    }

    fn request(id: u64, method: &str, params: Value) -> Request {
        Request {
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_unreadable_line() {
        let response = server().handle_line("{not json").await;
        assert_eq!(response.id, None);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server()
            .handle(request(3, "terminal-snapshot", Value::Null))
            .await;
        assert_eq!(response.id, Some(3));
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let response = server()
            .handle(request(4, "terminal-resize", json!({"terminalId": "x"})))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_terminal_is_not_an_error() {
        let server = server();
        for (method, params) in [
            ("terminal-write", json!({"terminalId": 42, "data": "ls\n"})),
            ("terminal-resize", json!({"terminalId": 42, "cols": 80, "rows": 24})),
            ("terminal-close", json!({"terminalId": 42})),
            ("terminal-cd", json!({"terminalId": 42, "directory": "/"})),
            ("terminal-execute", json!({"terminalId": 42, "command": "ls"})),
        ] {
            let response = server.handle(request(1, method, params)).await;
            assert_eq!(
                response.result,
                Some(json!({"success": false})),
                "{method} should fail softly"
            );
            assert!(response.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_list_without_params() {
        let response = server().handle(request(9, "terminal-list", Value::Null)).await;
        assert_eq!(response.result, Some(json!({"terminals": []})));
    }

    #[tokio::test]
    async fn test_create_after_shutdown_reports_error() {
        let server = server();
        server.manager().shutdown();

        let response = server.handle(request(5, "terminal-create", json!({}))).await;
        assert_eq!(response.error.unwrap().code, SHUTTING_DOWN);
    }

    #[tokio::test]
    async fn test_queued_events_are_flushed_on_eof() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let id = SessionId::new(3);
        event_tx
            .send(SessionEvent::Output {
                id,
                data: b"bye\r\n".to_vec(),
            })
            .unwrap();
        event_tx
            .send(SessionEvent::Exit {
                id,
                status: ExitStatus::with_code(0),
            })
            .unwrap();

        let (server_output, mut client) = tokio::io::duplex(64 * 1024);
        serve(
            server(),
            event_rx,
            tokio::io::empty(),
            server_output,
            std::future::pending(),
        )
        .await
        .unwrap();

        let mut written = String::new();
        client.read_to_string(&mut written).await.unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(
            lines,
            vec![
                json!({"event": "terminal-data", "terminalId": 3, "data": "bye\r\n"}),
                json!({"event": "terminal-exit", "terminalId": 3, "exitCode": 0, "signal": null}),
            ]
        );
        drop(event_tx);
    }
}

use crate::host::{HostRequest, HostResponse, HostService};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: HostRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub response: HostResponse,
}

#[derive(Debug)]
enum BridgeCommand {
    Request(RequestEnvelope),
    Shutdown,
}

/// UI end of the bridge. Requests are answered in the order they were sent.
pub struct BridgeClient {
    cmd_tx: Sender<BridgeCommand>,
    response_rx: Receiver<ResponseEnvelope>,
    next_id: u64,
    backlog: VecDeque<ResponseEnvelope>,
}

/// Runs `service` on its own thread.
pub fn spawn_host(service: HostService) -> BridgeClient {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();
    thread::spawn(move || host_loop(service, cmd_rx, response_tx));

    BridgeClient {
        cmd_tx,
        response_rx,
        next_id: 0,
        backlog: VecDeque::new(),
    }
}

impl BridgeClient {
    /// Fire a request; the answer shows up in [`BridgeClient::try_recv`].
    pub fn send(&mut self, request: HostRequest) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        if self
            .cmd_tx
            .send(BridgeCommand::Request(RequestEnvelope { id, request }))
            .is_err()
        {
            warn!(id, "host bridge is closed; request dropped");
        }
        id
    }

    pub fn try_recv(&mut self) -> Option<ResponseEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        self.response_rx.try_recv().ok()
    }

    /// Sends and waits for this request's answer. Answers to earlier requests
    /// that arrive meanwhile are kept for `try_recv`.
    pub fn call(&mut self, request: HostRequest, timeout: Duration) -> anyhow::Result<HostResponse> {
        let id = self.send(request);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(envelope) if envelope.id == id => return Ok(envelope.response),
                Ok(envelope) => self.backlog.push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    anyhow::bail!("host did not answer request {id} within {timeout:?}")
                }
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("host bridge is closed"),
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::Shutdown);
    }
}

fn host_loop(
    mut service: HostService,
    cmd_rx: Receiver<BridgeCommand>,
    response_tx: Sender<ResponseEnvelope>,
) {
    loop {
        match cmd_rx.recv() {
            Ok(BridgeCommand::Request(RequestEnvelope { id, request })) => {
                debug!(id, ?request, "host request");
                let response = service.handle(request);
                if response_tx.send(ResponseEnvelope { id, response }).is_err() {
                    break;
                }
            }
            Ok(BridgeCommand::Shutdown) | Err(_) => break,
        }
    }
    debug!("host bridge stopped");
}

/// Serves JSON-lines requests from `reader` until it closes. Lines that do
/// not parse are logged and skipped.
pub fn serve_lines<R: BufRead, W: Write>(
    service: &mut HostService,
    reader: R,
    mut writer: W,
) -> anyhow::Result<()> {
    for line in reader.lines() {
        let line = line.context("failed to read request line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let envelope = match serde_json::from_str::<RequestEnvelope>(trimmed) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("ignoring malformed request: {err}");
                continue;
            }
        };
        let response = service.handle(envelope.request);
        write_json_line(
            &mut writer,
            &ResponseEnvelope {
                id: envelope.id,
                response,
            },
        )?;
    }
    Ok(())
}

fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec(value).context("serialize failed")?;
    bytes.push(b'\n');
    writer.write_all(&bytes).context("write failed")?;
    writer.flush().context("flush failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{TerminalWindow, WindowCommand};
    use std::fs;
    use std::io::Cursor;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn call_returns_matching_response() {
        let window = TerminalWindow::new();
        let mut client = spawn_host(HostService::terminal(window.clone()));

        let response = client
            .call(HostRequest::Window(WindowCommand::Close), WAIT)
            .expect("call");

        assert_eq!(response, HostResponse::Ack);
        assert!(window.close_requested());
        client.shutdown();
    }

    #[test]
    fn earlier_answers_wait_in_the_backlog() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.mp3");
        fs::write(&path, [1_u8; 10]).expect("write");

        let mut client = spawn_host(HostService::terminal(TerminalWindow::new()));
        let first = client.send(HostRequest::FileSize { path: path.clone() });
        let second = client.send(HostRequest::FileSize {
            path: dir.path().join("missing.mp3"),
        });

        let third = client
            .call(HostRequest::OpenExternal { url: String::from("ftp://x") }, WAIT)
            .expect("call");
        assert_eq!(third, HostResponse::Ack);

        let backlog: Vec<ResponseEnvelope> = std::iter::from_fn(|| client.try_recv()).collect();
        assert_eq!(
            backlog,
            vec![
                ResponseEnvelope {
                    id: first,
                    response: HostResponse::FileSize(Some(10)),
                },
                ResponseEnvelope {
                    id: second,
                    response: HostResponse::FileSize(None),
                },
            ]
        );
    }

    #[test]
    fn call_after_shutdown_fails() {
        let mut client = spawn_host(HostService::terminal(TerminalWindow::new()));
        client.shutdown();
        let result = client.call(
            HostRequest::CoverArt {
                path: PathBuf::from("/nope.mp3"),
            },
            WAIT,
        );
        assert!(result.is_err());
    }

    #[test]
    fn serve_lines_answers_each_valid_request() {
        let window = TerminalWindow::new();
        let mut service = HostService::terminal(window.clone());
        let input = [
            serde_json::to_string(&RequestEnvelope {
                id: 4,
                request: HostRequest::Window(WindowCommand::Close),
            })
            .expect("encode"),
            String::from("{ this is not json"),
            String::new(),
            serde_json::to_string(&RequestEnvelope {
                id: 5,
                request: HostRequest::CoverArt {
                    path: PathBuf::from("/missing/file.mp3"),
                },
            })
            .expect("encode"),
        ]
        .join("\n");

        let mut output = Vec::new();
        serve_lines(&mut service, Cursor::new(input), &mut output).expect("serve");

        let responses: Vec<ResponseEnvelope> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("decode"))
            .collect();
        assert_eq!(
            responses,
            vec![
                ResponseEnvelope {
                    id: 4,
                    response: HostResponse::Ack,
                },
                ResponseEnvelope {
                    id: 5,
                    response: HostResponse::CoverArt(None),
                },
            ]
        );
        assert!(window.close_requested());
    }
}

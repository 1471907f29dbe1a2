use pipekv_proto::{
    create_fifo, open_read, open_write, read_exact_or_eof, remove_fifo, ConnectRequest, KeyRequest,
    Notification, OpCode, ProtoError, ReadOutcome, Response, MAX_PIPE_PATH_LENGTH,
    NOTIFICATION_FRAME_LEN, RESPONSE_LEN,
};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered the CONNECT with a nonzero result.
    #[error("server refused the connection (result {0})")]
    Refused(u8),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The four paths a client derives from its id and the server's pipe name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPipes {
    pub req_path: PathBuf,
    pub resp_path: PathBuf,
    pub notif_path: PathBuf,
    pub server_path: PathBuf,
}

impl ClientPipes {
    /// Derives `/tmp/req<id>`, `/tmp/resp<id>`, `/tmp/notif<id>` and the
    /// server's `/tmp/<name>`, rejecting ids that would overflow the
    /// fixed-width path fields of the connection frame.
    pub fn derive(client_id: &str, register_pipe_name: &str) -> Result<Self, ProtoError> {
        let req = format!("/tmp/req{client_id}");
        let resp = format!("/tmp/resp{client_id}");
        let notif = format!("/tmp/notif{client_id}");
        for path in [&req, &resp, &notif] {
            if path.len() > MAX_PIPE_PATH_LENGTH {
                return Err(ProtoError::FieldTooLong {
                    len: path.len(),
                    max: MAX_PIPE_PATH_LENGTH,
                });
            }
        }
        Ok(Self {
            req_path: req.into(),
            resp_path: resp.into(),
            notif_path: notif.into(),
            server_path: format!("/tmp/{register_pipe_name}").into(),
        })
    }

    /// Best-effort removal of the three client FIFOs.
    pub fn remove_all(&self) {
        remove_fifo(&self.req_path);
        remove_fifo(&self.resp_path);
        remove_fifo(&self.notif_path);
    }
}

/// An established session: request writer and response reader.
pub struct Session {
    req: File,
    resp: File,
}

impl Session {
    fn read_response(&mut self) -> Result<Response, ProtoError> {
        let mut frame = [0u8; RESPONSE_LEN];
        match read_exact_or_eof(&mut self.resp, &mut frame, None)? {
            ReadOutcome::Full => Response::decode(frame),
            ReadOutcome::Eof => Err(ProtoError::UnexpectedEof),
        }
    }

    fn send_key_request(&mut self, op: OpCode, key: &str) -> Result<u8, ProtoError> {
        let frame = KeyRequest {
            op,
            key: key.to_owned(),
        }
        .encode()?;
        self.req.write_all(&frame)?;
        let response = self.read_response()?;
        if response.op != op {
            return Err(ProtoError::Malformed("response for a different operation"));
        }
        Ok(response.result)
    }

    /// Returns the server's result byte: 0 subscribed, 1 key absent,
    /// 2 duplicate or quota exceeded.
    pub fn subscribe(&mut self, key: &str) -> Result<u8, ProtoError> {
        self.send_key_request(OpCode::Subscribe, key)
    }

    /// Returns the server's result byte: 0 removed, 1 not subscribed,
    /// 2 key absent.
    pub fn unsubscribe(&mut self, key: &str) -> Result<u8, ProtoError> {
        self.send_key_request(OpCode::Unsubscribe, key)
    }

    /// Clean teardown; consumes the session.
    pub fn disconnect(mut self) -> Result<u8, ProtoError> {
        self.req.write_all(&[OpCode::Disconnect as u8])?;
        let response = self.read_response()?;
        Ok(response.result)
    }
}

/// Creates the client FIFOs, registers with the server, opens the three
/// session ends and waits for the CONNECT response.
///
/// Returns the session plus the notification read end, to be handed to
/// [`run_notification_listener`].
pub fn connect(pipes: &ClientPipes) -> Result<(Session, File), ClientError> {
    create_fifo(&pipes.req_path)?;
    create_fifo(&pipes.resp_path)?;
    create_fifo(&pipes.notif_path)?;

    let result = register_and_open(pipes);
    if result.is_err() {
        pipes.remove_all();
    }
    result
}

fn register_and_open(pipes: &ClientPipes) -> Result<(Session, File), ClientError> {
    let mut server = open_write(&pipes.server_path)?;
    let frame = ConnectRequest {
        req_path: pipes.req_path.display().to_string(),
        resp_path: pipes.resp_path.display().to_string(),
        notif_path: pipes.notif_path.display().to_string(),
    }
    .encode()?;
    server.write_all(&frame)?;

    // Mirror image of the server's open order.
    let req = open_write(&pipes.req_path)?;
    let resp = open_read(&pipes.resp_path)?;
    let notif = open_read(&pipes.notif_path)?;

    let mut session = Session { req, resp };
    let response = session.read_response()?;
    if response.op != OpCode::Connect {
        return Err(ProtoError::Malformed("first response is not a CONNECT").into());
    }
    if response.result != 0 {
        return Err(ClientError::Refused(response.result));
    }
    Ok((session, notif))
}

/// Body of the listener thread: prints one `(key,value)` line per change
/// record until a terminate frame or the pipe closes.
///
/// `active_subs` is decremented for every deleted-key record, since the
/// server drops the subscription along with the key.
pub fn run_notification_listener(mut notif: File, active_subs: Arc<AtomicUsize>) {
    loop {
        let mut frame = [0u8; NOTIFICATION_FRAME_LEN];
        match read_exact_or_eof(&mut notif, &mut frame, None) {
            Ok(ReadOutcome::Full) => {}
            Ok(ReadOutcome::Eof) => return,
            Err(e) => {
                warn!("notification pipe failed: {e}");
                return;
            }
        }
        match Notification::decode(&frame) {
            Ok(Notification::Terminate) => return,
            Ok(notification) => {
                if matches!(notification, Notification::Deleted { .. }) {
                    let _ = active_subs.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        n.checked_sub(1)
                    });
                }
                if let Some(line) = notification.display_line() {
                    // println! locks stdout per call, so lines from the
                    // command loop and the listener never interleave.
                    println!("{line}");
                }
            }
            Err(e) => {
                warn!("bad notification frame: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_builds_the_three_pipe_paths() {
        let pipes = ClientPipes::derive("7", "registry").unwrap();
        assert_eq!(pipes.req_path, PathBuf::from("/tmp/req7"));
        assert_eq!(pipes.resp_path, PathBuf::from("/tmp/resp7"));
        assert_eq!(pipes.notif_path, PathBuf::from("/tmp/notif7"));
        assert_eq!(pipes.server_path, PathBuf::from("/tmp/registry"));
    }

    #[test]
    fn derive_rejects_ids_that_overflow_the_frame_field() {
        let long_id = "x".repeat(MAX_PIPE_PATH_LENGTH);
        assert!(matches!(
            ClientPipes::derive(&long_id, "reg"),
            Err(ProtoError::FieldTooLong { .. })
        ));
    }
}

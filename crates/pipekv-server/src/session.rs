//! Client sessions: the host thread that accepts connection records and
//! the worker loop that serves one session at a time.
//!
//! Each session owns three descriptors (request read end, response write
//! end, notification write end) held as raw fds behind a close-once flag.
//! That shape exists for the reset path: the host thread force-closes the
//! descriptors of every active session from outside the worker, the
//! worker's next read fails, and its cleanup must not close a second time.

use crate::admission::SessionQueue;
use crate::signal;
use parking_lot::Mutex;
use pipekv::{
    NotificationSink, SubscribeOutcome, SubscriberId, SubscriptionRegistry, UnsubscribeOutcome,
};
use pipekv_proto::{
    create_fifo, open_read, open_read_write, open_write, read_exact_or_eof, ConnectRequest,
    Notification, OpCode, ProtoError, ReadOutcome, Response, CONNECT_FRAME_LEN, MAX_STRING_SIZE,
};
use std::io::{self, Read, Write};
use std::os::fd::{IntoRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The descriptor triple of one accepted session.
///
/// `close_all` is idempotent: whoever flips the flag first (worker cleanup
/// or the host's reset) closes; everyone else sees `is_closed` and stands
/// down.
pub struct SessionFds {
    req: RawFd,
    resp: RawFd,
    notif: RawFd,
    closed: AtomicBool,
}

impl SessionFds {
    fn new(req: RawFd, resp: RawFd, notif: RawFd) -> Self {
        Self {
            req,
            resp,
            notif,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // SAFETY: the swap above guarantees each descriptor is closed
        // exactly once.
        unsafe {
            libc::close(self.req);
            libc::close(self.resp);
            libc::close(self.notif);
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionFds {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// One endpoint view over a session descriptor.
///
/// Reads and writes go through the close-once flag: a force-closed session
/// reads EOF and writes broken-pipe instead of touching a dead (or reused)
/// descriptor number.
struct PipeEnd {
    fds: Arc<SessionFds>,
    fd: RawFd,
}

impl PipeEnd {
    fn request_reader(fds: &Arc<SessionFds>) -> Self {
        Self {
            fds: Arc::clone(fds),
            fd: fds.req,
        }
    }

    fn response_writer(fds: &Arc<SessionFds>) -> Self {
        Self {
            fds: Arc::clone(fds),
            fd: fds.resp,
        }
    }

    fn notification_writer(fds: &Arc<SessionFds>) -> Self {
        Self {
            fds: Arc::clone(fds),
            fd: fds.notif,
        }
    }
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fds.is_closed() {
            return Ok(0);
        }
        // SAFETY: buf is a valid writable region; the descriptor is open
        // until close_all flips the flag checked above.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fds.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "session closed"));
        }
        // SAFETY: buf is a valid readable region; the descriptor is open
        // until close_all flips the flag checked above.
        let n = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// All currently accepted sessions, for the reset path.
pub struct ActiveSessions {
    inner: Mutex<Vec<Arc<SessionFds>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, fds: Arc<SessionFds>) {
        self.inner.lock().push(fds);
    }

    fn unregister(&self, fds: &Arc<SessionFds>) {
        self.inner.lock().retain(|s| !Arc::ptr_eq(s, fds));
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// The SIGUSR1 reset: under the session-list lock, drop every
    /// subscription and force-close every session's descriptors. Workers
    /// blocked on those sessions fail their next read and recycle.
    pub fn reset(&self, registry: &SubscriptionRegistry) {
        let mut sessions = self.inner.lock();
        registry.drain_all();
        for session in sessions.drain(..) {
            session.close_all();
        }
    }
}

impl Default for ActiveSessions {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of one session worker thread: masks the reset signal, then serves
/// accepted connections forever.
pub fn run_session_worker(
    queue: &SessionQueue<ConnectRequest>,
    registry: &Arc<SubscriptionRegistry>,
    sessions: &ActiveSessions,
) {
    if let Err(e) = signal::block_on_this_thread() {
        warn!("failed to mask SIGUSR1 in session worker: {e}");
    }
    loop {
        let record = queue.pop();
        match serve_session(&record, registry, sessions) {
            Ok(()) => debug!("session ended cleanly"),
            Err(e) if e.is_disconnect() => debug!("client disconnected abruptly"),
            Err(e) => warn!("session failed: {e}"),
        }
    }
}

fn serve_session(
    record: &ConnectRequest,
    registry: &Arc<SubscriptionRegistry>,
    sessions: &ActiveSessions,
) -> Result<(), ProtoError> {
    // Open order matches the client's: it opens its request end for
    // writing first, then response for reading, then notifications.
    let req = open_read(Path::new(&record.req_path))?;
    let mut resp = open_write(Path::new(&record.resp_path))?;
    let notif = match open_write(Path::new(&record.notif_path)) {
        Ok(file) => file,
        Err(e) => {
            let frame = Response { op: OpCode::Connect, result: 1 }.encode();
            let _ = resp.write_all(&frame);
            return Err(e.into());
        }
    };

    let fds = Arc::new(SessionFds::new(
        req.into_raw_fd(),
        resp.into_raw_fd(),
        notif.into_raw_fd(),
    ));
    // The notification descriptor doubles as the subscriber identity, one
    // per live session.
    let id = SubscriberId(fds.notif as u64);
    let sink = Arc::new(NotificationSink::new(
        id,
        Box::new(PipeEnd::notification_writer(&fds)),
    ));

    sessions.register(Arc::clone(&fds));
    let result = respond(&fds, OpCode::Connect, 0)
        .and_then(|()| request_loop(&fds, id, &sink, registry));

    // Covers the abrupt paths; a no-op after a clean disconnect.
    registry.drain_for_handle(id);
    sessions.unregister(&fds);
    fds.close_all();
    result
}

fn respond(fds: &Arc<SessionFds>, op: OpCode, result: u8) -> Result<(), ProtoError> {
    let frame = Response { op, result }.encode();
    PipeEnd::response_writer(fds).write_all(&frame)?;
    Ok(())
}

fn read_key(reader: &mut PipeEnd) -> Result<Option<String>, ProtoError> {
    let mut field = [0u8; MAX_STRING_SIZE];
    match read_exact_or_eof(reader, &mut field, None)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof => return Err(ProtoError::UnexpectedEof),
    }
    match pipekv_proto::KeyRequest::decode_key(&field) {
        Ok(key) => Ok(Some(key)),
        Err(_) => Ok(None),
    }
}

fn request_loop(
    fds: &Arc<SessionFds>,
    id: SubscriberId,
    sink: &Arc<NotificationSink>,
    registry: &Arc<SubscriptionRegistry>,
) -> Result<(), ProtoError> {
    let mut req = PipeEnd::request_reader(fds);
    loop {
        let mut op = [0u8; 1];
        match read_exact_or_eof(&mut req, &mut op, None)? {
            ReadOutcome::Full => {}
            // EOF without a DISCONNECT: the client is gone.
            ReadOutcome::Eof => return Ok(()),
        }

        match OpCode::try_from(op[0]) {
            Ok(OpCode::Disconnect) => {
                registry.drain_for_handle(id);
                // Lets the client's listener thread exit without waiting
                // for EOF on the notification pipe.
                sink.send(&Notification::Terminate);
                respond(fds, OpCode::Disconnect, 0)?;
                return Ok(());
            }
            Ok(OpCode::Subscribe) => {
                let result = match read_key(&mut req)? {
                    Some(key) => match registry.subscribe(&key, Arc::clone(sink)) {
                        SubscribeOutcome::Subscribed => 0,
                        SubscribeOutcome::KeyAbsent => 1,
                        SubscribeOutcome::Duplicate | SubscribeOutcome::QuotaExceeded => 2,
                    },
                    None => 2,
                };
                respond(fds, OpCode::Subscribe, result)?;
            }
            Ok(OpCode::Unsubscribe) => {
                let result = match read_key(&mut req)? {
                    Some(key) => match registry.unsubscribe(&key, id) {
                        UnsubscribeOutcome::Removed => 0,
                        UnsubscribeOutcome::NotSubscribed => 1,
                        UnsubscribeOutcome::KeyAbsent => 2,
                    },
                    None => 2,
                };
                respond(fds, OpCode::Unsubscribe, result)?;
            }
            Ok(OpCode::Connect) | Err(_) => {
                warn!("unknown op code {} on request pipe", op[0]);
            }
        }
    }
}

/// Body of the host thread: the only thread that observes SIGUSR1.
///
/// The registration FIFO is opened read-write so the read side never sees
/// EOF while clients come and go. A short frame is a protocol error -
/// discarded, not fatal.
pub fn run_host(
    fifo_path: &Path,
    queue: &SessionQueue<ConnectRequest>,
    registry: &Arc<SubscriptionRegistry>,
    sessions: &ActiveSessions,
) -> Result<(), ProtoError> {
    signal::unblock_on_this_thread()?;
    signal::install_handler()?;

    let mut pipe = open_read_write(fifo_path)?;
    info!(path = %fifo_path.display(), "accepting connections");

    loop {
        if signal::take_reset_request() {
            info!("SIGUSR1: resetting all client sessions");
            sessions.reset(registry);
            continue;
        }

        let mut frame = [0u8; CONNECT_FRAME_LEN];
        match read_exact_or_eof(&mut pipe, &mut frame, Some(signal::reset_flag())) {
            Ok(ReadOutcome::Full) => {}
            // We hold a write end ourselves, so EOF cannot happen; recheck
            // the flag and keep accepting.
            Ok(ReadOutcome::Eof) => continue,
            Err(e) if e.is_interrupted() => continue,
            Err(ProtoError::UnexpectedEof) => {
                warn!("short connection frame; discarding");
                continue;
            }
            Err(e) => return Err(e),
        }

        match ConnectRequest::decode(&frame) {
            Ok(mut record) => {
                debug!(req = %record.req_path, "connection request");
                // Blocks while the ring is full: bounded admission. A
                // pending reset aborts the wait; the record is retried
                // once the reset has freed the sessions holding the ring.
                while let Err(returned) = queue.push(record, signal::reset_flag()) {
                    record = returned;
                    if signal::take_reset_request() {
                        info!("SIGUSR1: resetting all client sessions");
                        sessions.reset(registry);
                    }
                }
            }
            Err(e) => warn!("discarding bad connection frame: {e}"),
        }
    }
}

/// Creates the registration FIFO under `/tmp`.
pub fn create_registration_fifo(name: &str) -> io::Result<std::path::PathBuf> {
    let path = std::path::PathBuf::from(format!("/tmp/{name}"));
    create_fifo(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipekv::Store;

    /// A real pipe pair so close() has live descriptors to act on.
    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: fds is a valid two-element array.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn session() -> Arc<SessionFds> {
        let (r1, w1) = pipe_fds();
        let (_r2, w2) = pipe_fds();
        Arc::new(SessionFds::new(r1, w1, w2))
    }

    #[test]
    fn close_all_is_idempotent() {
        let fds = session();
        fds.close_all();
        assert!(fds.is_closed());
        // A second close (and the one in Drop) must not close again -
        // the descriptors may already belong to someone else.
        fds.close_all();
    }

    #[test]
    fn closed_session_reads_eof_and_fails_writes() {
        let fds = session();
        fds.close_all();

        let mut reader = PipeEnd::request_reader(&fds);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut writer = PipeEnd::response_writer(&fds);
        let err = writer.write(&[0]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn reset_closes_and_clears_every_session() {
        let store = Arc::new(Store::new());
        let registry = SubscriptionRegistry::new(store, 4);
        let sessions = ActiveSessions::new();

        let a = session();
        let b = session();
        sessions.register(Arc::clone(&a));
        sessions.register(Arc::clone(&b));
        assert_eq!(sessions.count(), 2);

        sessions.reset(&registry);
        assert_eq!(sessions.count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn unregister_removes_only_the_given_session() {
        let sessions = ActiveSessions::new();
        let a = session();
        let b = session();
        sessions.register(Arc::clone(&a));
        sessions.register(Arc::clone(&b));

        sessions.unregister(&a);
        assert_eq!(sessions.count(), 1);
    }
}

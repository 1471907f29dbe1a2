use crate::registry::SubscriberId;
use parking_lot::Mutex;
use pipekv_proto::Notification;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Write-only handle to one subscriber's notification pipe.
///
/// Each record is encoded as one fixed-size frame and written with a single
/// `write_all` (frames fit in `PIPE_BUF`, so the write is atomic; partial
/// writes and `EINTR` are retried inside `write_all`). A broken pipe or any
/// other fatal error marks the sink failed; a failed sink never writes
/// again and is evicted by the registry on the next operation that touches
/// its subscriber.
pub struct NotificationSink {
    id: SubscriberId,
    writer: Mutex<Box<dyn Write + Send>>,
    failed: AtomicBool,
}

impl NotificationSink {
    pub fn new(id: SubscriberId, writer: Box<dyn Write + Send>) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
            failed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Encodes and writes one frame. Returns `false` if the sink is (or
    /// just became) failed; delivery failures are otherwise silent.
    pub fn send(&self, notification: &Notification) -> bool {
        if self.is_failed() {
            return false;
        }
        let Ok(frame) = notification.encode() else {
            // Oversize key or value cannot come from a committed entry.
            self.mark_failed();
            return false;
        };
        let mut writer = self.writer.lock();
        match writer.write_all(&frame).and_then(|()| writer.flush()) {
            Ok(()) => true,
            Err(_) => {
                self.mark_failed();
                false
            }
        }
    }

    #[inline]
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSink")
            .field("id", &self.id)
            .field("failed", &self.is_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipekv_proto::NOTIFICATION_FRAME_LEN;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_writes_one_frame_per_notification() {
        let buf = SharedBuf::default();
        let sink = NotificationSink::new(SubscriberId(1), Box::new(buf.clone()));

        assert!(sink.send(&Notification::Changed {
            key: "apple".into(),
            value: "red".into(),
        }));
        assert!(sink.send(&Notification::Deleted { key: "apple".into() }));

        let bytes = buf.0.lock();
        assert_eq!(bytes.len(), 2 * NOTIFICATION_FRAME_LEN);
        let second = &bytes[NOTIFICATION_FRAME_LEN..];
        let decoded =
            Notification::decode(second.try_into().unwrap()).unwrap();
        assert_eq!(decoded, Notification::Deleted { key: "apple".into() });
    }

    #[test]
    fn broken_pipe_marks_failed_and_stops_writing() {
        let sink = NotificationSink::new(SubscriberId(2), Box::new(BrokenPipe));

        assert!(!sink.send(&Notification::Terminate));
        assert!(sink.is_failed());
        // Failed sinks short-circuit without touching the writer.
        assert!(!sink.send(&Notification::Terminate));
    }
}

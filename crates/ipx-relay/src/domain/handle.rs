//! The relay's view of one connected client.
//!
//! The registry and relay engine never touch sockets.  They hold a
//! [`ClientHandle`] per client and only ever ask it to queue a frame or to
//! close.  The infrastructure layer implements the trait on top of a real
//! connection; tests implement it with recording doubles and `mockall` mocks.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// Why a frame could not be queued for a client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound queue is full")]
    QueueFull,
}

/// Sending side of a connected client.
///
/// Both methods must return promptly: they are called while routing other
/// clients' traffic.
#[cfg_attr(test, mockall::automock)]
pub trait ClientHandle: Send + Sync {
    /// Queues `frame` for delivery, unmodified, to this client.
    fn send(&self, frame: Bytes) -> Result<(), HandleError>;

    /// Closes the connection. Idempotent.
    fn close(&self);
}

/// Handles are shared between the owning session and the registry.
pub type SharedHandle = Arc<dyn ClientHandle>;

/// True when both handles refer to the same client object.
pub fn same_handle(a: &SharedHandle, b: &SharedHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every frame it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingHandle {
        frames: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
        reject: Option<HandleError>,
    }

    impl RecordingHandle {
        /// A handle whose `send` always fails with `err`.
        pub(crate) fn rejecting(err: HandleError) -> Self {
            Self {
                reject: Some(err),
                ..Self::default()
            }
        }

        pub(crate) fn frames(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ClientHandle for RecordingHandle {
        fn send(&self, frame: Bytes) -> Result<(), HandleError> {
            if let Some(err) = self.reject {
                return Err(err);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingHandle;
    use super::*;

    #[test]
    fn test_same_handle_compares_identity_not_contents() {
        let a: SharedHandle = Arc::new(RecordingHandle::default());
        let a_again = Arc::clone(&a);
        let b: SharedHandle = Arc::new(RecordingHandle::default());

        assert!(same_handle(&a, &a_again));
        assert!(!same_handle(&a, &b));
    }

    #[test]
    fn test_recording_handle_captures_frames_in_order() {
        let handle = RecordingHandle::default();

        handle.send(Bytes::from_static(b"one")).unwrap();
        handle.send(Bytes::from_static(b"two")).unwrap();

        assert_eq!(
            handle.frames(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }
}

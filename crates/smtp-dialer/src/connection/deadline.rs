//! Absolute I/O deadlines shared between a connection and its owner.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

/// Handle to the deadline of a [`Connection`](super::Connection).
///
/// Clones share the same deadline, so the dialer can keep a handle while the
/// protocol client owns the connection. While a deadline is armed, reads and
/// writes still pending when it passes fail with [`io::ErrorKind::TimedOut`].
#[derive(Debug, Clone, Default)]
pub struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    /// Creates an unarmed deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the deadline at `at`, or disarms it with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle's lock was poisoned by a panicking holder.
    pub fn set(&self, at: Option<Instant>) -> io::Result<()> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("deadline lock poisoned"))?;
        *guard = at;
        Ok(())
    }

    /// Disarms the deadline.
    ///
    /// # Errors
    ///
    /// See [`Deadline::set`].
    pub fn clear(&self) -> io::Result<()> {
        self.set(None)
    }

    /// Returns the armed instant, if any.
    #[must_use]
    pub fn get(&self) -> Option<Instant> {
        self.0.lock().ok().and_then(|guard| *guard)
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub(crate) fn poison(&self) {
        let inner = self.0.clone();
        let _ = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
    }
}

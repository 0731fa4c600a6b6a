//! Exclusive status device.
//!
//! Each `open` renders a fresh status message into a `StreamSession`; reads
//! drain that message and then report end-of-stream. Only one session may
//! exist at a time.
//!
//! # Invariants
//!
//! - At most one `StreamSession` is alive per device
//! - A session never re-renders; once drained it keeps returning zero bytes
//! - Dropping a session releases the device, so `close` cannot be skipped

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::errors::DeviceError;
use crate::state::StateStore;

/// Read-only status device backed by the shared vitals
#[derive(Debug)]
pub struct StreamInterface {
    name: String,
    store: Arc<StateStore>,
    in_use: AtomicBool,
    opens: AtomicU64,
}

impl StreamInterface {
    /// Create a device named `name` that reports `store`
    pub fn new(name: impl Into<String>, store: Arc<StateStore>) -> Self {
        Self {
            name: name.into(),
            store,
            in_use: AtomicBool::new(false),
            opens: AtomicU64::new(0),
        }
    }

    /// Registered name of the device
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a session currently holds the device
    pub fn is_open(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of successful opens so far
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    /// Acquire the device and render a status message for this session.
    ///
    /// Fails with `DeviceError::Busy` while another session is alive.
    pub fn open(self: &Arc<Self>) -> Result<StreamSession, DeviceError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(device = %self.name, "Open refused, device busy");
            return Err(DeviceError::Busy);
        }

        let told = self.opens.fetch_add(1, Ordering::AcqRel);
        let message = self.render_message(told);
        tracing::debug!(device = %self.name, told, "Status session opened");
        Ok(StreamSession {
            device: Arc::clone(self),
            message: message.into_bytes(),
            cursor: 0,
        })
    }

    /// Length in bytes of the message a session opened now would see
    pub fn current_size(&self) -> usize {
        self.render_message(self.opens()).len()
    }

    /// Writes are not accepted on the status device; commands go to the
    /// control file. Always reports zero bytes consumed.
    pub fn write(&self, data: &[u8]) -> usize {
        tracing::warn!(
            device = %self.name,
            len = data.len(),
            "Writes to the status device are ignored, write commands to the control file instead"
        );
        0
    }

    fn render_message(&self, told: u64) -> String {
        format!(
            "I already told you {told} times Hello world!\n{}",
            self.store.render()
        )
    }

    fn release(&self) {
        self.in_use.store(false, Ordering::Release);
        tracing::debug!(device = %self.name, "Status session closed");
    }
}

/// One exclusive read pass over a rendered status message
#[derive(Debug)]
pub struct StreamSession {
    device: Arc<StreamInterface>,
    message: Vec<u8>,
    cursor: usize,
}

impl StreamSession {
    /// Return up to `max_len` bytes of the remaining message.
    ///
    /// Empty once the message is exhausted.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let end = self.cursor.saturating_add(max_len).min(self.message.len());
        let chunk = self.message[self.cursor..end].to_vec();
        self.cursor = end;
        chunk
    }

    /// Copy as much of the remaining message as fits into `buf`.
    ///
    /// Returns the number of bytes copied, zero at end-of-stream.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.message[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        n
    }

    /// Total length of this session's message
    pub fn len(&self) -> usize {
        self.message.len()
    }

    /// Whether the rendered message is empty
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.message.len() - self.cursor
    }

    /// Name of the device this session holds
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Release the device. Equivalent to dropping the session.
    pub fn close(self) {}
}

impl io::Read for StreamSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.device.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn device() -> (Arc<StateStore>, Arc<StreamInterface>) {
        let store = Arc::new(StateStore::new());
        let device = Arc::new(StreamInterface::new("gotchi", Arc::clone(&store)));
        (store, device)
    }

    #[test]
    fn test_second_open_is_busy() {
        let (_store, device) = device();
        let session = device.open().unwrap();
        assert_eq!(session.device_name(), "gotchi");
        assert_eq!(device.open().unwrap_err(), DeviceError::Busy);
        assert!(device.is_open());

        session.close();
        assert!(!device.is_open());
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_drop_releases_device() {
        let (_store, device) = device();
        {
            let _session = device.open().unwrap();
        }
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_message_reports_vitals_and_open_count() {
        let (store, device) = device();
        store.advance();

        let mut first = device.open().unwrap();
        let text = String::from_utf8(first.read(usize::MAX)).unwrap();
        assert_eq!(
            text,
            "I already told you 0 times Hello world!\nhunger=1 boredom=1\n"
        );
        first.close();

        let mut second = device.open().unwrap();
        let text = String::from_utf8(second.read(usize::MAX)).unwrap();
        assert!(text.starts_with("I already told you 1 times"));
        assert_eq!(device.opens(), 2);
    }

    #[test]
    fn test_read_in_chunks_then_end_of_stream() {
        let (_store, device) = device();
        let mut session = device.open().unwrap();
        let total = session.len();

        let mut collected = Vec::new();
        loop {
            let chunk = session.read(7);
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 7);
            collected.extend(chunk);
        }
        assert_eq!(collected.len(), total);
        assert_eq!(session.remaining(), 0);

        for _ in 0..3 {
            assert!(session.read(64).is_empty());
            assert_eq!(session.read_into(&mut [0u8; 16]), 0);
        }
    }

    #[test]
    fn test_session_does_not_rerender() {
        let (store, device) = device();
        let mut session = device.open().unwrap();
        let before = session.len();
        for _ in 0..1000 {
            store.advance();
        }
        let mut text = String::new();
        session.read_to_string(&mut text).unwrap();
        assert_eq!(text.len(), before);
        assert!(text.contains("hunger=0 boredom=0"));
    }

    #[test]
    fn test_write_to_device_is_ignored() {
        let (_store, device) = device();
        assert_eq!(device.write(b"feed"), 0);
    }

    #[test]
    fn test_open_is_exclusive_across_threads() {
        let (_store, device) = device();
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let device = Arc::clone(&device);
                    scope.spawn(move || device.open().ok().map(std::mem::forget).is_some())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });
        assert_eq!(winners, 1);
    }
}

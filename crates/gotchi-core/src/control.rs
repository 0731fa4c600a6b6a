//! Write-only control file.
//!
//! Payloads are truncated to `CONTROL_BUFFER_CAPACITY`, stored as the most
//! recent command and handed to a `CommandHandler`. The default handler
//! accepts everything and does nothing.
//!
//! # Invariants
//!
//! - The stored length never exceeds `CONTROL_BUFFER_CAPACITY`
//! - A write that faults while copying leaves the previous payload intact
//! - Concurrent writers are last-writer-wins

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errors::ControlError;

/// Maximum number of bytes kept from a single write
pub const CONTROL_BUFFER_CAPACITY: usize = 1024;

/// Raised by a `PayloadSource` that cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFault;

/// Caller-owned bytes that are copied into the control buffer
pub trait PayloadSource {
    /// Number of bytes the caller submitted
    fn len(&self) -> usize;

    /// Whether nothing was submitted
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the first `dst.len()` submitted bytes into `dst`
    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CopyFault>;
}

impl PayloadSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CopyFault> {
        let src = self.get(..dst.len()).ok_or(CopyFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// Interprets control payloads
pub trait CommandHandler: Send + Sync {
    /// Apply one (possibly truncated) payload
    fn apply(&self, command: &[u8]) -> Result<(), ControlError>;
}

/// Handler that accepts and ignores every payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl CommandHandler for NoopHandler {
    fn apply(&self, _command: &[u8]) -> Result<(), ControlError> {
        Ok(())
    }
}

/// Most recent control payload
#[derive(Clone)]
pub struct ControlBuffer {
    data: Box<[u8; CONTROL_BUFFER_CAPACITY]>,
    len: usize,
}

impl Default for ControlBuffer {
    fn default() -> Self {
        Self {
            data: Box::new([0; CONTROL_BUFFER_CAPACITY]),
            len: 0,
        }
    }
}

impl fmt::Debug for ControlBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBuffer")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ControlBuffer {
    /// Stored bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Stored length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been stored yet (or an empty payload was written)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Write-only command surface
pub struct ControlInterface {
    name: String,
    buffer: Mutex<ControlBuffer>,
    handler: Arc<dyn CommandHandler>,
    writes: AtomicU64,
}

impl fmt::Debug for ControlInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlInterface")
            .field("name", &self.name)
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

impl ControlInterface {
    /// Create a control file that ignores its payloads
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_handler(name, Arc::new(NoopHandler))
    }

    /// Create a control file that routes payloads to `handler`
    pub fn with_handler(name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            name: name.into(),
            buffer: Mutex::new(ControlBuffer::default()),
            handler,
            writes: AtomicU64::new(0),
        }
    }

    /// Registered name of the control file
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of writes that were stored
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Copy of the most recent payload
    pub fn last_command(&self) -> Vec<u8> {
        self.buffer.lock().as_bytes().to_vec()
    }

    /// Copy of the whole control buffer
    pub fn snapshot(&self) -> ControlBuffer {
        self.buffer.lock().clone()
    }

    /// Store up to `CONTROL_BUFFER_CAPACITY` bytes from `payload` and pass
    /// them to the command handler.
    ///
    /// Returns the number of bytes accepted, which is less than submitted
    /// when the payload was truncated.
    pub fn write<S>(&self, payload: &S) -> Result<usize, ControlError>
    where
        S: PayloadSource + ?Sized,
    {
        let accepted = payload.len().min(CONTROL_BUFFER_CAPACITY);
        let mut staged = [0u8; CONTROL_BUFFER_CAPACITY];
        payload
            .copy_to(&mut staged[..accepted])
            .map_err(|_| ControlError::Fault {
                requested: accepted,
            })?;

        {
            let mut buffer = self.buffer.lock();
            buffer.data[..accepted].copy_from_slice(&staged[..accepted]);
            buffer.len = accepted;
        }
        self.writes.fetch_add(1, Ordering::AcqRel);

        if accepted < payload.len() {
            tracing::debug!(
                control = %self.name,
                submitted = payload.len(),
                accepted,
                "Control payload truncated"
            );
        }

        self.handler.apply(&staged[..accepted]).map_err(|err| {
            tracing::warn!(control = %self.name, "Control payload rejected: {err}");
            err
        })?;
        Ok(accepted)
    }

    /// The control file is not meant to be read; always produces zero bytes.
    pub fn read(&self, _buf: &mut [u8]) -> usize {
        tracing::warn!(
            control = %self.name,
            "Reads from the control file return nothing, read the status device instead"
        );
        0
    }
}

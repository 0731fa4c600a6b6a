//! # Gotchi Core
//!
//! A resident service that keeps two slowly growing vitals (`hunger` and
//! `boredom`), advanced by one self-rescheduling background task, and exposes
//! them through two host-registered surfaces:
//!
//! - a read-only status device: exclusive open, read the rendered status
//!   until end-of-stream, close
//! - a write-only control file: bounded payloads handed to a
//!   `CommandHandler`
//!
//! ## Key Components
//!
//! - **StateStore**: atomic counters with a saturating joint increment
//! - **PeriodicTask**: arm-after-complete timer task with cancel and drain
//! - **StreamInterface**: single-opener status device
//! - **ControlInterface**: 1024-byte truncating control file
//! - **GotchiService**: startup registration and ordered shutdown
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gotchi_core::{GotchiService, LocalHost, ServiceConfig};
//!
//! let host = Arc::new(LocalHost::new());
//! let service = GotchiService::start(ServiceConfig::default(), host.clone()).await?;
//!
//! let mut session = host.device("gotchi").expect("registered").open()?;
//! let status = session.read(usize::MAX);
//! session.close();
//!
//! let report = service.stop().await;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod control;
pub mod errors;
pub mod host;
pub mod service;
pub mod state;
pub mod stream;
pub mod task;

pub use config::ServiceConfig;
pub use control::{
    CommandHandler, ControlBuffer, ControlInterface, CopyFault, NoopHandler, PayloadSource,
    CONTROL_BUFFER_CAPACITY,
};
pub use errors::{ConfigError, ControlError, DeviceError, RegistrationError, ServiceError, TaskError};
pub use host::{DeviceNumber, HostRegistry, LocalHost};
pub use service::{GotchiService, ServiceHealth, ShutdownReport};
pub use state::{StateStore, Vitals};
pub use stream::{StreamInterface, StreamSession};
pub use task::{Drained, PeriodicTask, PeriodicWork, StopFlag, TaskPhase};

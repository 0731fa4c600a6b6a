//! Service lifecycle.
//!
//! `GotchiService::start` wires the pieces together and registers them with
//! the host; `GotchiService::stop` tears them down again in the one order that
//! is safe:
//!
//! 1. raise the stop flag
//! 2. cancel any pending firing
//! 3. wait for the periodic task to drain (yields a `Drained` token)
//! 4. unregister the status device and the control file
//! 5. release the state store, which requires the `Drained` token
//!
//! `stop` consumes the service. A stopped service cannot be restarted; start a
//! new one instead.

use std::fmt;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::control::{CommandHandler, ControlInterface, NoopHandler};
use crate::errors::{Result, ServiceError};
use crate::host::{DeviceNumber, HostRegistry};
use crate::state::{StateStore, Vitals};
use crate::stream::StreamInterface;
use crate::task::{Drained, PeriodicTask, StopFlag, TaskPhase};

/// Health status of a running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHealth {
    /// The periodic task is armed or running
    Healthy,
    /// The service is up but the periodic task is not advancing
    Degraded {
        /// Reason for degraded state
        reason: String,
    },
}

impl ServiceHealth {
    /// Returns true if the service is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceHealth::Healthy => write!(f, "healthy"),
            ServiceHealth::Degraded { reason } => write!(f, "degraded: {reason}"),
        }
    }
}

/// Summary produced by a completed shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Vitals at the moment the state store was released
    pub vitals: Vitals,
    /// Completed firings of the periodic task
    pub fired: u64,
    /// Successful opens of the status device
    pub opens: u64,
    /// Stored writes to the control file
    pub control_writes: u64,
}

/// A live gotchi service
pub struct GotchiService {
    config: ServiceConfig,
    host: Arc<dyn HostRegistry>,
    store: Arc<StateStore>,
    device: Arc<StreamInterface>,
    device_number: DeviceNumber,
    control: Arc<ControlInterface>,
    stop: StopFlag,
    task: PeriodicTask,
}

impl fmt::Debug for GotchiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GotchiService")
            .field("config", &self.config)
            .field("device_number", &self.device_number)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl GotchiService {
    /// Start a service whose control file ignores its payloads
    pub async fn start(config: ServiceConfig, host: Arc<dyn HostRegistry>) -> Result<Self> {
        Self::start_with_handler(config, host, Arc::new(NoopHandler)).await
    }

    /// Start a service routing control payloads to `handler`.
    ///
    /// On a registration failure every interface registered so far is
    /// withdrawn before the error is returned.
    pub async fn start_with_handler(
        config: ServiceConfig,
        host: Arc<dyn HostRegistry>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(StateStore::new());
        let device = Arc::new(StreamInterface::new(
            config.device_name.clone(),
            Arc::clone(&store),
        ));
        let control = Arc::new(ControlInterface::with_handler(
            config.control_name.clone(),
            handler,
        ));

        let device_number = host.register_device(Arc::clone(&device)).map_err(|err| {
            tracing::error!(device = %config.device_name, "Device registration failed: {err}");
            err
        })?;

        if let Err(err) = host.register_control(Arc::clone(&control), device.current_size()) {
            tracing::error!(control = %config.control_name, "Control file registration failed: {err}");
            host.unregister_device(device_number, device.name());
            return Err(err.into());
        }

        let stop = StopFlag::new();
        let task = PeriodicTask::new(store.clone(), stop.clone());
        if let Err(err) = task.arm(config.interval()) {
            host.unregister_control(control.name());
            host.unregister_device(device_number, device.name());
            return Err(ServiceError::from(err));
        }

        tracing::info!(
            device = %config.device_name,
            %device_number,
            control = %config.control_name,
            interval_ms = config.interval_ms,
            "Gotchi loaded"
        );
        let (device_name, control_name) = (&config.device_name, &config.control_name);
        tracing::info!(
            "To read gotchi status open device '{device_name}' (number {device_number}); \
             send commands to control file '{control_name}'"
        );

        Ok(Self {
            config,
            host,
            store,
            device,
            device_number,
            control,
            stop,
            task,
        })
    }

    /// Configuration the service was started with
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current vitals
    pub fn vitals(&self) -> Vitals {
        self.store.vitals()
    }

    /// The status device
    pub fn device(&self) -> &Arc<StreamInterface> {
        &self.device
    }

    /// Number the host assigned to the status device
    pub fn device_number(&self) -> DeviceNumber {
        self.device_number
    }

    /// The control file
    pub fn control(&self) -> &Arc<ControlInterface> {
        &self.control
    }

    /// Current phase of the periodic task
    pub fn task_phase(&self) -> TaskPhase {
        self.task.phase()
    }

    /// Health derived from the periodic task
    pub fn health(&self) -> ServiceHealth {
        match self.task.phase() {
            TaskPhase::Armed | TaskPhase::Running => ServiceHealth::Healthy,
            phase => ServiceHealth::Degraded {
                reason: format!("periodic task is {phase}"),
            },
        }
    }

    /// Shut the service down. Cannot fail once started.
    pub async fn stop(self) -> ShutdownReport {
        let GotchiService {
            config: _,
            host,
            store,
            device,
            device_number,
            control,
            stop,
            task,
        } = self;

        stop.raise();
        task.cancel();
        let drained = task.await_stopped().await;
        drop(task);

        if device.is_open() {
            tracing::warn!(device = %device.name(), "Status session still open at shutdown");
        }
        host.unregister_device(device_number, device.name());
        host.unregister_control(control.name());

        let fired = drained.fired();
        let vitals = release_store(store, drained);
        let report = ShutdownReport {
            vitals,
            fired,
            opens: device.opens(),
            control_writes: control.writes(),
        };
        tracing::info!(%vitals, fired, "Gotchi unloaded");
        report
    }
}

/// Drop the service's handle on the state store. Requires proof that the
/// periodic task can no longer advance it.
fn release_store(store: Arc<StateStore>, _drained: Drained) -> Vitals {
    let vitals = store.vitals();
    drop(store);
    vitals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RegistrationError;
    use crate::host::LocalHost;
    use std::time::Duration;

    fn config() -> ServiceConfig {
        ServiceConfig::default().with_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_both_surfaces() {
        let host = Arc::new(LocalHost::new());
        let service = GotchiService::start(config(), host.clone()).await.unwrap();

        assert_eq!(host.registered(), 2);
        assert_eq!(host.device_number("gotchi"), Some(service.device_number()));
        assert!(host.control("gotchi").is_some());
        assert!(service.health().is_healthy());

        service.stop().await;
        assert_eq!(host.registered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_advances_service_store() {
        let host = Arc::new(LocalHost::new());
        let service = GotchiService::start(config(), host).await.unwrap();
        assert_eq!(service.task_phase(), TaskPhase::Armed);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(service.vitals(), Vitals { hunger: 1, boredom: 1 });
        assert!(service.device().current_size() > 0);

        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_failure_rolls_back_device() {
        let host = Arc::new(LocalHost::with_slots(1));
        let err = GotchiService::start(config(), host.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Registration(RegistrationError::Exhausted(_))
        ));
        assert_eq!(host.registered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected_before_registration() {
        let host = Arc::new(LocalHost::new());
        let err = GotchiService::start(config().with_interval(Duration::ZERO), host.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
        assert_eq!(host.registered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_final_state() {
        let host = Arc::new(LocalHost::new());
        let service = GotchiService::start(config(), host).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        service.device().open().unwrap().close();
        service.control().write(b"feed".as_slice()).unwrap();

        let report = service.stop().await;
        assert_eq!(report.fired, 2);
        assert_eq!(report.vitals, Vitals { hunger: 2, boredom: 2 });
        assert_eq!(report.opens, 1);
        assert_eq!(report.control_writes, 1);
    }

    #[test]
    fn test_health_display() {
        assert_eq!(ServiceHealth::Healthy.to_string(), "healthy");
        let degraded = ServiceHealth::Degraded {
            reason: "periodic task is stopped".to_string(),
        };
        assert!(!degraded.is_healthy());
        assert_eq!(degraded.to_string(), "degraded: periodic task is stopped");
    }
}

//! Service lifecycle integration tests
//!
//! Drive a full service through a `LocalHost` the way an external caller
//! would: look surfaces up by name, open, read, write, then stop.
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use gotchi_core::{
    ControlError, DeviceError, GotchiService, HostRegistry, LocalHost, RegistrationError,
    ServiceConfig, ServiceError, StreamInterface, Vitals,
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> ServiceConfig {
    ServiceConfig::default().with_interval(Duration::from_secs(1))
}

fn read_all(device: &Arc<StreamInterface>) -> String {
    let mut session = device.open().expect("device free");
    let mut text = Vec::new();
    loop {
        let chunk = session.read(16);
        if chunk.is_empty() {
            break;
        }
        text.extend(chunk);
    }
    session.close();
    String::from_utf8(text).expect("status is utf-8")
}

/// Start, wait just over one tick, read the status, stop.
#[tokio::test(start_paused = true)]
async fn test_status_after_one_tick() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let device = host.device("gotchi").expect("device registered");
    let status = read_all(&device);
    assert!(status.contains("hunger=1 boredom=1"), "status was {status:?}");
    assert!(status.starts_with("I already told you 0 times Hello world!"));

    let report = service.stop().await;
    assert_eq!(report.vitals, Vitals { hunger: 1, boredom: 1 });
    assert_eq!(host.registered(), 0);
    assert!(host.device("gotchi").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_counters_track_firings() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host).await.unwrap();

    // Sample halfway between firings.
    tokio::time::sleep(Duration::from_millis(500)).await;
    for expected in 1..=5u64 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let vitals = service.vitals();
        assert_eq!(vitals.hunger, expected);
        assert_eq!(vitals.boredom, expected);
    }

    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_open_busy_until_close() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();
    let device = host.device("gotchi").unwrap();

    let first = device.open().unwrap();
    assert_eq!(device.open().unwrap_err(), DeviceError::Busy);
    assert_eq!(device.open().unwrap_err(), DeviceError::Busy);
    first.close();

    let second = device.open().unwrap();
    second.close();
    assert_eq!(service.stop().await.opens, 2);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_control_write() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();
    let control = host.control("gotchi").unwrap();

    let payload = vec![b'f'; 2000];
    assert_eq!(control.write(payload.as_slice()).unwrap(), 1024);
    assert_eq!(control.last_command().len(), 1024);

    let mut buf = [0u8; 64];
    assert_eq!(control.read(&mut buf), 0);

    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_misrouted_device_write_is_ignored() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();
    assert_eq!(host.device("gotchi").unwrap().write(b"feed"), 0);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_control_size_reflects_rendered_status() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();

    let expected = "I already told you 0 times Hello world!\nhunger=0 boredom=0\n".len();
    assert_eq!(host.control_size("gotchi"), Some(expected));

    service.stop().await;
}

/// The host refuses the control file; the device must not stay registered.
#[tokio::test(start_paused = true)]
async fn test_registration_failure_rolls_back() {
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

/// A name already taken by another instance is a registration error.
#[tokio::test(start_paused = true)]
async fn test_second_instance_on_same_names_refused() {
    let host = Arc::new(LocalHost::new());
    let first = GotchiService::start(config(), host.clone()).await.unwrap();

    let err = GotchiService::start(config(), host.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Registration(RegistrationError::NameInUse(_))
    ));
    assert_eq!(host.registered(), 2);

    first.stop().await;
}

/// Restart means a brand new service: fresh counters, fresh registration.
#[tokio::test(start_paused = true)]
async fn test_restart_requires_full_reinitialization() {
    let host = Arc::new(LocalHost::new());
    let first = GotchiService::start(config(), host.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(first.stop().await.vitals.hunger, 3);

    let second = GotchiService::start(config(), host.clone()).await.unwrap();
    assert_eq!(second.vitals(), Vitals::default());
    assert_eq!(host.registered(), 2);
    second.stop().await;
}

/// Stop while a session is still held: shutdown completes anyway.
#[tokio::test(start_paused = true)]
async fn test_stop_with_open_session() {
    let host = Arc::new(LocalHost::new());
    let service = GotchiService::start(config(), host.clone()).await.unwrap();
    let device = host.device("gotchi").unwrap();
    let mut session = device.open().unwrap();

    let report = service.stop().await;
    assert_eq!(report.opens, 1);

    // The session still drains its already-rendered message.
    assert!(!session.read(usize::MAX).is_empty());
    assert!(session.read(usize::MAX).is_empty());
}

/// Host that refuses to come up at all
struct UnavailableHost;

impl HostRegistry for UnavailableHost {
    fn register_device(
        &self,
        _device: Arc<StreamInterface>,
    ) -> Result<gotchi_core::DeviceNumber, RegistrationError> {
        Err(RegistrationError::Unavailable("host offline".to_string()))
    }

    fn unregister_device(&self, _number: gotchi_core::DeviceNumber, _name: &str) {
        panic!("nothing was registered");
    }

    fn register_control(
        &self,
        _control: Arc<gotchi_core::ControlInterface>,
        _size: usize,
    ) -> Result<(), RegistrationError> {
        panic!("device registration failed first");
    }

    fn unregister_control(&self, _name: &str) {
        panic!("nothing was registered");
    }
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_host() {
    let err = GotchiService::start(config(), Arc::new(UnavailableHost))
        .await
        .unwrap_err();
    assert!(err.is_registration());
}

#[tokio::test(start_paused = true)]
async fn test_rejecting_handler_does_not_stop_ticks() {
    struct RejectAll;

    impl gotchi_core::CommandHandler for RejectAll {
        fn apply(&self, _command: &[u8]) -> Result<(), ControlError> {
            Err(ControlError::rejected("no commands yet"))
        }
    }

    let host = Arc::new(LocalHost::new());
    let service =
        GotchiService::start_with_handler(config(), host.clone(), Arc::new(RejectAll))
            .await
            .unwrap();

    let control = host.control("gotchi").unwrap();
    assert!(control.write(b"feed".as_slice()).is_err());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(service.health().is_healthy());
    assert_eq!(service.stop().await.fired, 2);
}

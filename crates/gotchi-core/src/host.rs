//! Host registration facility.
//!
//! The service does not own its own addressing. A `HostRegistry` hands the
//! status device a numeric identity and publishes the control file under a
//! name; external callers then reach both surfaces through the host.
//! `LocalHost` is the in-process implementation used by the daemon and tests.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::control::ControlInterface;
use crate::errors::RegistrationError;
use crate::stream::StreamInterface;

/// Identity the host assigned to a registered status device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceNumber(pub u32);

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration contract the service depends on
pub trait HostRegistry: Send + Sync {
    /// Publish the status device and return its assigned number
    fn register_device(
        &self,
        device: Arc<StreamInterface>,
    ) -> Result<DeviceNumber, RegistrationError>;

    /// Withdraw a device registered earlier
    fn unregister_device(&self, number: DeviceNumber, name: &str);

    /// Publish the control file; `size` is advertised alongside it
    fn register_control(
        &self,
        control: Arc<ControlInterface>,
        size: usize,
    ) -> Result<(), RegistrationError>;

    /// Withdraw a control file registered earlier
    fn unregister_control(&self, name: &str);
}

#[derive(Debug)]
struct DeviceEntry {
    number: DeviceNumber,
    device: Arc<StreamInterface>,
}

#[derive(Debug)]
struct ControlEntry {
    size: usize,
    control: Arc<ControlInterface>,
}

#[derive(Debug, Default)]
struct LocalHostState {
    next_number: u32,
    devices: BTreeMap<String, DeviceEntry>,
    controls: BTreeMap<String, ControlEntry>,
}

impl LocalHostState {
    fn used_slots(&self) -> usize {
        self.devices.len() + self.controls.len()
    }
}

/// In-process host with name tables and an optional slot limit
#[derive(Debug, Default)]
pub struct LocalHost {
    state: Mutex<LocalHostState>,
    slots: Option<usize>,
}

impl LocalHost {
    /// Create a host without a registration limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host that refuses registrations beyond `slots` entries
    pub fn with_slots(slots: usize) -> Self {
        Self {
            state: Mutex::new(LocalHostState::default()),
            slots: Some(slots),
        }
    }

    /// Look up a registered status device by name
    pub fn device(&self, name: &str) -> Option<Arc<StreamInterface>> {
        self.state
            .lock()
            .devices
            .get(name)
            .map(|entry| Arc::clone(&entry.device))
    }

    /// Number assigned to a registered status device
    pub fn device_number(&self, name: &str) -> Option<DeviceNumber> {
        self.state.lock().devices.get(name).map(|entry| entry.number)
    }

    /// Look up a registered control file by name
    pub fn control(&self, name: &str) -> Option<Arc<ControlInterface>> {
        self.state
            .lock()
            .controls
            .get(name)
            .map(|entry| Arc::clone(&entry.control))
    }

    /// Size advertised for a registered control file
    pub fn control_size(&self, name: &str) -> Option<usize> {
        self.state.lock().controls.get(name).map(|entry| entry.size)
    }

    /// Total live registrations
    pub fn registered(&self) -> usize {
        self.state.lock().used_slots()
    }

    fn check_slot(&self, state: &LocalHostState, name: &str) -> Result<(), RegistrationError> {
        match self.slots {
            Some(limit) if state.used_slots() >= limit => {
                Err(RegistrationError::Exhausted(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl HostRegistry for LocalHost {
    fn register_device(
        &self,
        device: Arc<StreamInterface>,
    ) -> Result<DeviceNumber, RegistrationError> {
        let mut state = self.state.lock();
        let name = device.name().to_string();
        if state.devices.contains_key(&name) {
            return Err(RegistrationError::NameInUse(name));
        }
        self.check_slot(&state, &name)?;

        state.next_number = state
            .next_number
            .checked_add(1)
            .ok_or_else(|| RegistrationError::Exhausted(name.clone()))?;
        let number = DeviceNumber(state.next_number);
        state.devices.insert(name, DeviceEntry { number, device });
        Ok(number)
    }

    fn unregister_device(&self, number: DeviceNumber, name: &str) {
        let mut state = self.state.lock();
        match state.devices.get(name) {
            Some(entry) if entry.number == number => {
                state.devices.remove(name);
            }
            _ => tracing::warn!(%number, name, "Unregister of unknown device ignored"),
        }
    }

    fn register_control(
        &self,
        control: Arc<ControlInterface>,
        size: usize,
    ) -> Result<(), RegistrationError> {
        let mut state = self.state.lock();
        let name = control.name().to_string();
        if state.controls.contains_key(&name) {
            return Err(RegistrationError::NameInUse(name));
        }
        self.check_slot(&state, &name)?;

        state.controls.insert(name, ControlEntry { size, control });
        Ok(())
    }

    fn unregister_control(&self, name: &str) {
        if self.state.lock().controls.remove(name).is_none() {
            tracing::warn!(name, "Unregister of unknown control file ignored");
        }
    }
}

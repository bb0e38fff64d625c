use std::sync::{Mutex, PoisonError};
use log::info;

use crate::device::types::Device;

/// Receives the device the user picked, handing it to the rest of the application.
pub trait DeviceHolder: Send + Sync {
    fn attach_device(&self, device: Device);
}

/// Keeps the most recently selected device in memory.
#[derive(Debug, Default)]
pub struct SelectedDeviceHolder {
    device: Mutex<Option<Device>>,
}

impl SelectedDeviceHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the selected device out, leaving nothing selected.
    pub fn detach_device(&self) -> Option<Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl DeviceHolder for SelectedDeviceHolder {
    fn attach_device(&self, device: Device) {
        info!("Selected device {}", device);
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = Some(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_replaces_previous_selection() {
        let holder = SelectedDeviceHolder::new();
        assert_eq!(holder.detach_device(), None);

        holder.attach_device(Device::new("A"));
        holder.attach_device(Device::new("B"));

        assert_eq!(holder.detach_device(), Some(Device::new("B")));
        assert_eq!(holder.detach_device(), None);
    }
}

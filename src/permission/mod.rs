pub mod gate;
pub mod host;

pub use gate::{Permission, PermissionGate, PermissionRegistry, PermissionState};
pub use host::HostPermissionRegistry;

//! Device path assignment for volume attachments.

pub mod allocator;
pub mod device;
pub mod error;
pub mod manager;

pub use allocator::{AllocatorKind, DeviceAllocator, ExhaustedError, LinearAllocator, RecencyAllocator};
pub use device::{BlockDevice, ReleaseOutcome};
pub use error::{DeviceError, Result};
pub use manager::{BlockDeviceManager, DEFAULT_DEVICE_PREFIX, parse_device_mappings};

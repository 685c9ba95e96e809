//! EBS volume attachment library
//!
//! Assigns OS device paths to EBS volumes and drives the attach/detach
//! sequence against the EC2 API, whose view of attached devices trails
//! in-flight requests.
//!
//! This library provides:
//! - A per-node device path manager that merges the cloud's confirmed
//!   attachments with reservations still in flight
//! - Attach/detach orchestration that always clears its reservation
//! - Disk create/delete/lookup on top of an abstract compute API

pub mod api;
pub mod cloud;
pub mod config;
pub mod devicemanager;
pub mod metrics;
pub mod telemetry;
pub mod types;

pub use api::{ApiError, ComputeApi, Instance};
pub use cloud::{Cloud, CloudError};
pub use config::{CloudConfig, CloudOptions};
pub use devicemanager::{BlockDevice, BlockDeviceManager, DeviceError};

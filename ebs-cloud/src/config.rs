//! Configuration for device assignment and attach orchestration.
//!
//! [`CloudOptions`] is a set of clap arguments meant to be flattened into the
//! host binary's CLI. Every option can also be set from the environment.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::devicemanager::{AllocatorKind, BlockDeviceManager, DEFAULT_DEVICE_PREFIX};

/// Default time to wait for an attachment to reach its terminal state
pub const DEFAULT_ATTACH_TIMEOUT_SECS: u64 = 300;
/// Initial delay between attachment state polls
pub const DEFAULT_POLL_INITIAL_MS: u64 = 500;
/// Maximum delay between attachment state polls
pub const DEFAULT_POLL_MAX_MS: u64 = 10_000;
/// Lower bound on the delay between attachment state polls
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Args, Debug, Clone)]
pub struct CloudOptions {
    /// Prefix of device paths handed to the cloud on attach
    #[arg(long, env = "EBS_DEVICE_PREFIX", default_value = DEFAULT_DEVICE_PREFIX)]
    pub device_prefix: String,

    /// Device name allocation strategy (recency, linear)
    #[arg(long, env = "EBS_DEVICE_ALLOCATOR", default_value = "recency")]
    pub allocator: AllocatorKind,

    /// Also hand out two-letter device names (ba..cz)
    #[arg(long, env = "EBS_EXTENDED_DEVICE_NAMES", default_value = "false")]
    pub extended_device_names: bool,

    /// Seconds to wait for a volume to reach the attached state
    #[arg(long, env = "EBS_ATTACH_TIMEOUT_SECS", default_value_t = DEFAULT_ATTACH_TIMEOUT_SECS)]
    pub attach_timeout_secs: u64,

    /// Initial delay between attachment state polls, in milliseconds
    #[arg(long, env = "EBS_ATTACH_POLL_INITIAL_MS", default_value_t = DEFAULT_POLL_INITIAL_MS)]
    pub attach_poll_initial_ms: u64,

    /// Maximum delay between attachment state polls, in milliseconds
    #[arg(long, env = "EBS_ATTACH_POLL_MAX_MS", default_value_t = DEFAULT_POLL_MAX_MS)]
    pub attach_poll_max_ms: u64,
}

impl CloudOptions {
    pub fn into_config(self) -> CloudConfig {
        let poll_initial = Duration::from_millis(self.attach_poll_initial_ms).max(MIN_POLL_INTERVAL);
        CloudConfig {
            device_prefix: self.device_prefix,
            allocator: self.allocator,
            extended_device_names: self.extended_device_names,
            attach_timeout: Duration::from_secs(self.attach_timeout_secs),
            poll_initial,
            poll_max: Duration::from_millis(self.attach_poll_max_ms).max(poll_initial),
        }
    }
}

/// Resolved configuration used by [`Cloud`](crate::cloud::Cloud).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub device_prefix: String,
    pub allocator: AllocatorKind,
    pub extended_device_names: bool,
    pub attach_timeout: Duration,
    pub poll_initial: Duration,
    pub poll_max: Duration,
}

impl CloudConfig {
    /// Build a device manager from this configuration.
    pub fn device_manager(&self) -> BlockDeviceManager {
        BlockDeviceManager::with_allocator(
            &self.device_prefix,
            self.allocator,
            self.extended_device_names,
        )
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            device_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            allocator: AllocatorKind::default(),
            extended_device_names: false,
            attach_timeout: Duration::from_secs(DEFAULT_ATTACH_TIMEOUT_SECS),
            poll_initial: Duration::from_millis(DEFAULT_POLL_INITIAL_MS),
            poll_max: Duration::from_millis(DEFAULT_POLL_MAX_MS),
        }
    }
}

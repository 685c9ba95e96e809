//! Per-node device path assignment.
//!
//! The cloud's list of devices attached to an instance lags behind in-flight
//! attach requests. To avoid handing the same path to two volumes, the manager
//! keeps its own record of paths assigned but not yet confirmed ("attaching")
//! and merges it with the instance's reported mappings on every call.
//!
//! All state lives behind one mutex shared by every node. Critical sections
//! only touch in-memory maps; no cloud call is ever made with the lock held.
//! The attaching map is process memory only. After a restart the manager
//! rebuilds its view from the instance descriptions alone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::allocator::{AllocatorKind, DeviceAllocator, ExistingNames, default_names};
use super::device::BlockDevice;
use super::error::{DeviceError, Result};
use crate::api::Instance;
use crate::metrics;

/// Default prefix for device paths handed out by the manager
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/xvd";

/// Device-name prefixes recognized in instance descriptions
const KNOWN_DEVICE_PREFIXES: [&str; 2] = ["/dev/sd", "/dev/xvd"];

/// Builds the allocator for a node the manager has not seen before.
pub type AllocatorFactory = Arc<dyn Fn(&str) -> Box<dyn DeviceAllocator> + Send + Sync>;

#[derive(Default)]
struct State {
    /// Allocator per node ID
    allocators: HashMap<String, Box<dyn DeviceAllocator>>,
    /// node ID -> device path -> volume ID, for attaches still in progress
    attaching: HashMap<String, HashMap<String, String>>,
}

struct Inner {
    device_prefix: String,
    factory: AllocatorFactory,
    state: Mutex<State>,
}

/// Assigns device paths to volumes and tracks in-flight attachments.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct BlockDeviceManager {
    inner: Arc<Inner>,
}

impl BlockDeviceManager {
    /// Create a manager with the default prefix and a recency-biased allocator.
    pub fn new() -> Self {
        Self::with_allocator(DEFAULT_DEVICE_PREFIX, AllocatorKind::default(), false)
    }

    /// Create a manager that builds allocators of `kind` over the default name pool.
    pub fn with_allocator(device_prefix: &str, kind: AllocatorKind, extended_names: bool) -> Self {
        let names = default_names(extended_names);
        Self::with_factory(device_prefix, Arc::new(move |_node: &str| kind.build(names.clone())))
    }

    /// Create a manager with a custom per-node allocator factory.
    pub fn with_factory(device_prefix: &str, factory: AllocatorFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                device_prefix: device_prefix.to_string(),
                factory,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn device_prefix(&self) -> &str {
        &self.inner.device_prefix
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the device already assigned to the volume, or assign an unused one.
    ///
    /// If the volume already has a device on the instance (confirmed or in
    /// flight), that device is returned with `is_already_assigned() == true`
    /// and the allocator is not consulted. Otherwise the first free name is
    /// reserved and returned with `is_already_assigned() == false`.
    pub fn new_block_device(&self, instance: Option<&Instance>, volume_id: &str) -> Result<BlockDevice> {
        let instance = instance.ok_or(DeviceError::NilInstance)?;
        let node_id = instance.instance_id.as_str();

        let mut state = self.lock();
        if let Some(path) = assigned_path(&state, instance, volume_id) {
            debug!(node = %node_id, volume_id, path = %path, "Volume already has a device");
            return Ok(self.device(node_id, volume_id, path, true));
        }

        let in_use = self.devices_in_use(&state, instance, node_id);
        let State { allocators, attaching } = &mut *state;
        let allocator = allocators
            .entry(node_id.to_string())
            .or_insert_with(|| (self.inner.factory)(node_id));

        let name = match allocator.next(&in_use) {
            Ok(name) => name,
            Err(e) => {
                warn!(node = %node_id, mappings = ?in_use, error = %e, "Could not assign a mount device");
                metrics::record_devices_exhausted();
                return Err(DeviceError::TooManyVolumes {
                    node: node_id.to_string(),
                });
            }
        };

        let path = self.path_for(&name);
        attaching
            .entry(node_id.to_string())
            .or_default()
            .insert(path.clone(), volume_id.to_string());
        debug!(node = %node_id, volume_id, path = %path, "Assigned mount device");

        // Keep the name out of rotation until the cloud catches up with its release.
        allocator.deprioritize(&name);

        metrics::set_inflight_attachments(count_attaching(&state));
        Ok(self.device(node_id, volume_id, path, false))
    }

    /// Get the device already assigned to the volume, without assigning one.
    ///
    /// Returns a device with an empty path if the volume has no device on the
    /// instance; check [`BlockDevice::is_assigned`] before using the path.
    pub fn get_block_device(&self, instance: Option<&Instance>, volume_id: &str) -> Result<BlockDevice> {
        let instance = instance.ok_or(DeviceError::NilInstance)?;
        let node_id = instance.instance_id.as_str();

        let state = self.lock();
        Ok(match assigned_path(&state, instance, volume_id) {
            Some(path) => self.device(node_id, volume_id, path, true),
            None => self.device(node_id, volume_id, String::new(), false),
        })
    }

    /// Remove the in-flight entry for `device`.
    ///
    /// Fails without touching state if no attach is in progress for the path or
    /// if the path is held by a different volume.
    pub fn release(&self, device: &BlockDevice) -> Result<()> {
        let node_id = device.node_id();
        let mut state = self.lock();

        let Some(existing) = state
            .attaching
            .get(node_id)
            .and_then(|paths| paths.get(device.path()))
        else {
            metrics::record_release_conflict("not_in_progress");
            return Err(DeviceError::NotInProgress {
                volume_id: device.volume_id().to_string(),
            });
        };

        // A concurrent request may already have been given this path once the
        // cloud reported it free.
        if existing != device.volume_id() {
            metrics::record_release_conflict("volume_mismatch");
            return Err(DeviceError::VolumeMismatch {
                path: device.path().to_string(),
                requested: device.volume_id().to_string(),
                existing: existing.clone(),
            });
        }

        debug!(node = %node_id, path = %device.path(), volume_id = %device.volume_id(), "Releasing in-process attachment entry");
        if let Some(paths) = state.attaching.get_mut(node_id) {
            paths.remove(device.path());
            if paths.is_empty() {
                state.attaching.remove(node_id);
            }
        }

        metrics::set_inflight_attachments(count_attaching(&state));
        Ok(())
    }

    /// Snapshot of the in-flight attachments for a node (device path -> volume ID).
    pub fn attaching(&self, node_id: &str) -> HashMap<String, String> {
        self.lock().attaching.get(node_id).cloned().unwrap_or_default()
    }

    /// Merge the instance's reported mappings with the in-flight attachments.
    /// Keys are device-name suffixes.
    fn devices_in_use(&self, state: &State, instance: &Instance, node_id: &str) -> ExistingNames {
        let mut in_use = parse_device_mappings(instance);

        if let Some(attaching) = state.attaching.get(node_id) {
            for (path, volume_id) in attaching {
                let name = path.strip_prefix(self.inner.device_prefix.as_str()).unwrap_or(path);
                in_use.insert(name.to_string(), volume_id.clone());
            }
        }

        in_use
    }

    fn path_for(&self, name: &str) -> String {
        format!("{}{}", self.inner.device_prefix, name)
    }

    fn device(&self, node_id: &str, volume_id: &str, path: String, assigned: bool) -> BlockDevice {
        BlockDevice::new(self.clone(), node_id, volume_id, path, assigned)
    }
}

impl Default for BlockDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Confirmed device mappings of an instance, keyed by device-name suffix.
///
/// Names with a recognized prefix have it stripped. A suffix that is not one
/// or two characters long is logged and kept as-is.
pub fn parse_device_mappings(instance: &Instance) -> ExistingNames {
    let mut mappings = ExistingNames::new();

    for mapping in &instance.block_device_mappings {
        let name = KNOWN_DEVICE_PREFIXES
            .iter()
            .find_map(|prefix| mapping.device_name.strip_prefix(prefix))
            .unwrap_or(&mapping.device_name);

        if name.is_empty() || name.len() > 2 {
            warn!(device_name = %mapping.device_name, "Unexpected EBS DeviceName");
        }
        mappings.insert(name.to_string(), mapping.volume_id.clone());
    }

    mappings
}

/// Path already held by `volume_id` on the instance.
///
/// An in-flight reservation wins over the cloud's list. Confirmed entries keep
/// the device name the cloud reports, so verification compares like with like.
fn assigned_path(state: &State, instance: &Instance, volume_id: &str) -> Option<String> {
    let in_flight = state
        .attaching
        .get(instance.instance_id.as_str())
        .and_then(|paths| {
            paths
                .iter()
                .filter(|(_, v)| v.as_str() == volume_id)
                .map(|(path, _)| path)
                .min()
        });

    in_flight.cloned().or_else(|| {
        instance
            .block_device_mappings
            .iter()
            .find(|m| m.volume_id == volume_id)
            .map(|m| m.device_name.clone())
    })
}

fn count_attaching(state: &State) -> usize {
    state.attaching.values().map(HashMap::len).sum()
}

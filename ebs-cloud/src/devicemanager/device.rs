use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::error::Result;
use super::manager::BlockDeviceManager;

/// What a call to [`BlockDevice::release`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The in-flight reservation was removed
    Released,
    /// The device is tainted and the release was not forced
    Suppressed,
    /// A previous call already released this device
    AlreadyReleased,
}

/// A device path resolved for a volume on a node.
///
/// Devices are handed out by [`BlockDeviceManager`] and carry the ability to
/// release their own in-flight reservation. An empty `path` means the volume
/// has no device on the node (see [`BlockDeviceManager::get_block_device`]).
pub struct BlockDevice {
    node_id: String,
    path: String,
    volume_id: String,
    is_already_assigned: bool,
    tainted: AtomicBool,
    released: AtomicBool,
    manager: BlockDeviceManager,
}

impl BlockDevice {
    pub(super) fn new(
        manager: BlockDeviceManager,
        node_id: &str,
        volume_id: &str,
        path: String,
        is_already_assigned: bool,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            path,
            volume_id: volume_id.to_string(),
            is_already_assigned,
            tainted: AtomicBool::new(false),
            released: AtomicBool::new(false),
            manager,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// True if the volume already had this path before the call that produced the device.
    pub fn is_already_assigned(&self) -> bool {
        self.is_already_assigned
    }

    /// False for the empty-path device returned by a lookup that found nothing.
    pub fn is_assigned(&self) -> bool {
        !self.path.is_empty()
    }

    /// Mark the outcome of the attachment as unknown.
    ///
    /// A tainted device ignores [`release`](Self::release) unless forced, so its
    /// path cannot be handed to another volume while the cloud may still be
    /// attaching this one.
    pub fn taint(&self) {
        self.tainted.store(true, Ordering::Release);
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }

    /// Release the in-flight reservation held for this device.
    ///
    /// Only the first effective call reaches the manager; later calls return
    /// [`ReleaseOutcome::AlreadyReleased`].
    pub fn release(&self, force: bool) -> Result<ReleaseOutcome> {
        if self.is_tainted() && !force {
            warn!(
                node = %self.node_id,
                path = %self.path,
                volume_id = %self.volume_id,
                "Not releasing tainted device"
            );
            return Ok(ReleaseOutcome::Suppressed);
        }

        if self.released.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path, volume_id = %self.volume_id, "Device already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        self.manager.release(self)?;
        Ok(ReleaseOutcome::Released)
    }
}

impl fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDevice")
            .field("node_id", &self.node_id)
            .field("path", &self.path)
            .field("volume_id", &self.volume_id)
            .field("is_already_assigned", &self.is_already_assigned)
            .field("tainted", &self.is_tainted())
            .finish()
    }
}

impl Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.path)
    }
}

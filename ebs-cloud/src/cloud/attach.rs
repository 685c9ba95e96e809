//! Attach and detach orchestration.
//!
//! An attach reserves a device path, asks the cloud to attach the volume at
//! that path, waits for the cloud to report the attachment and then releases
//! the reservation. The reservation is held by an [`AttachGuard`] so it is
//! released exactly once however the attach ends.

use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::{Cloud, CloudError, Result, VOLUME_NOT_FOUND_CODE};
use crate::api::{
    AttachVolumeRequest, DescribeVolumesRequest, DetachVolumeRequest, Volume, VolumeAttachment,
};
use crate::config::MIN_POLL_INTERVAL;
use crate::devicemanager::{BlockDevice, DeviceError, ReleaseOutcome};
use crate::metrics::{self, OperationTimer};
use crate::types::AttachmentState;

/// Holds a reserved device for the duration of an attach.
///
/// Once [`conclude`](Self::conclude) has been called, dropping the guard
/// releases the device. A guard dropped before that (the attach future was
/// cancelled while a cloud call was outstanding) keeps the reservation, since
/// the cloud may still act on the request.
struct AttachGuard {
    device: BlockDevice,
    concluded: bool,
}

impl AttachGuard {
    fn new(device: BlockDevice) -> Self {
        Self {
            device,
            concluded: false,
        }
    }

    fn device(&self) -> &BlockDevice {
        &self.device
    }

    /// Mark the attach as finished, successfully or not.
    fn conclude(&mut self) {
        self.concluded = true;
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let device = &self.device;
        if !self.concluded {
            warn!(
                node = %device.node_id(),
                path = %device.path(),
                volume_id = %device.volume_id(),
                "Attach did not conclude, keeping device reservation"
            );
            return;
        }

        match device.release(false) {
            Ok(ReleaseOutcome::Released) => {
                debug!(path = %device.path(), volume_id = %device.volume_id(), "Released device")
            }
            Ok(_) => {}
            Err(DeviceError::NotInProgress { .. }) if device.is_already_assigned() => {
                debug!(path = %device.path(), volume_id = %device.volume_id(), "No reservation held for existing device")
            }
            Err(e) => error!(error = %e, "Error releasing device"),
        }
    }
}

impl Cloud {
    /// Attach a volume to a node and return the device path it was attached at.
    #[instrument(skip(self))]
    pub async fn attach_disk(&self, volume_id: &str, node_id: &str) -> Result<String> {
        let timer = OperationTimer::new("attach_disk");
        let result = self.attach(volume_id, node_id).await;
        timer.finish(&result, CloudError::code);
        result
    }

    async fn attach(&self, volume_id: &str, node_id: &str) -> Result<String> {
        let instance = self.devices_in_use(node_id).await?;
        let device = self.dm.new_block_device(Some(&instance), volume_id)?;

        let mut guard = AttachGuard::new(device);
        let result = self.attach_device(guard.device(), volume_id, node_id).await;
        guard.conclude();
        result
    }

    async fn attach_device(&self, device: &BlockDevice, volume_id: &str, node_id: &str) -> Result<String> {
        if !device.is_already_assigned() {
            let request = AttachVolumeRequest {
                device: device.path().to_string(),
                instance_id: node_id.to_string(),
                volume_id: volume_id.to_string(),
            };

            let response = self
                .ec2
                .attach_volume(request)
                .await
                .map_err(|source| CloudError::Attach {
                    volume_id: volume_id.to_string(),
                    node: node_id.to_string(),
                    source,
                })?;
            info!(volume_id, node = node_id, state = %response.state, "AttachVolume request returned");
        }

        let attachment = match self
            .wait_for_attachment_state(volume_id, node_id, AttachmentState::Attached, self.config.attach_timeout)
            .await
        {
            Ok(attachment) => attachment,
            Err(e @ CloudError::AttachmentTimeout { .. }) => {
                // The cloud may still complete the attach at this path.
                device.taint();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // The attachment seen here could come from an earlier or concurrent
        // AttachVolume call against a different device or instance.
        let attachment = attachment.ok_or_else(|| CloudError::MissingAttachment {
            volume_id: volume_id.to_string(),
            node: node_id.to_string(),
        })?;
        verify_attachment(&attachment, device.path(), volume_id, node_id)?;

        Ok(device.path().to_string())
    }

    /// Detach a volume from a node.
    #[instrument(skip(self))]
    pub async fn detach_disk(&self, volume_id: &str, node_id: &str) -> Result<()> {
        let timer = OperationTimer::new("detach_disk");
        let result = self.detach(volume_id, node_id).await;
        timer.finish(&result, CloudError::code);
        result
    }

    async fn detach(&self, volume_id: &str, node_id: &str) -> Result<()> {
        let instance = self.devices_in_use(node_id).await?;
        let device = self.dm.get_block_device(Some(&instance), volume_id)?;

        let request = DetachVolumeRequest {
            instance_id: node_id.to_string(),
            volume_id: volume_id.to_string(),
        };
        self.ec2
            .detach_volume(request)
            .await
            .map_err(|source| CloudError::Detach {
                volume_id: volume_id.to_string(),
                node: node_id.to_string(),
                source,
            })?;

        if device.is_assigned() {
            // Detach usually has no attach in progress to clear.
            match device.release(false) {
                Ok(_) => {}
                Err(e @ DeviceError::NotInProgress { .. }) => {
                    debug!(volume_id, node = node_id, reason = %e, "No in-flight attachment to release")
                }
                Err(e) => warn!(volume_id, node = node_id, error = %e, "Could not release device after detach"),
            }
        }

        Ok(())
    }

    /// Poll the volume until its attachment to `node_id` is in `expected` state.
    ///
    /// A volume with no attachment counts as detached. Returns the matching
    /// attachment, or `None` when waiting for `Detached`.
    pub async fn wait_for_attachment_state(
        &self,
        volume_id: &str,
        node_id: &str,
        expected: AttachmentState,
        timeout: Duration,
    ) -> Result<Option<VolumeAttachment>> {
        match tokio::time::timeout(timeout, self.poll_attachment_state(volume_id, node_id, expected)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(volume_id, node = node_id, %expected, ?timeout, "Timed out waiting for attachment state");
                Err(CloudError::AttachmentTimeout {
                    volume_id: volume_id.to_string(),
                    node: node_id.to_string(),
                    expected,
                    timeout,
                })
            }
        }
    }

    async fn poll_attachment_state(
        &self,
        volume_id: &str,
        node_id: &str,
        expected: AttachmentState,
    ) -> Result<Option<VolumeAttachment>> {
        let expected_label = expected.to_string();
        let mut backoff = self.config.poll_initial.max(MIN_POLL_INTERVAL);

        loop {
            metrics::record_attachment_poll(&expected_label);
            let volume = self.describe_volume(volume_id).await?;

            let attachment = current_attachment(&volume, node_id);
            let state = attachment.map_or(AttachmentState::Detached, |a| a.state);
            if state == expected {
                return Ok(attachment.cloned());
            }

            debug!(volume_id, node = node_id, %state, %expected, backoff_ms = backoff.as_millis() as u64, "Waiting for attachment state");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.poll_max);
        }
    }

    async fn describe_volume(&self, volume_id: &str) -> Result<Volume> {
        let request = DescribeVolumesRequest {
            volume_ids: vec![volume_id.to_string()],
            ..Default::default()
        };

        let response = self.ec2.describe_volumes(request).await.map_err(|source| {
            if source.code == VOLUME_NOT_FOUND_CODE {
                CloudError::VolumeNotFound
            } else {
                CloudError::DescribeVolume {
                    volume_id: volume_id.to_string(),
                    source,
                }
            }
        })?;

        response
            .volumes
            .into_iter()
            .find(|v| v.volume_id == volume_id)
            .ok_or(CloudError::VolumeNotFound)
    }
}

/// The attachment of `volume` relevant to `node_id`: the one on that node if
/// present, otherwise whatever the cloud lists first.
fn current_attachment<'a>(volume: &'a Volume, node_id: &str) -> Option<&'a VolumeAttachment> {
    if volume.attachments.len() > 1 {
        warn!(volume_id = %volume.volume_id, count = volume.attachments.len(), "Found multiple attachments for volume");
    }
    volume
        .attachments
        .iter()
        .find(|a| a.instance_id == node_id)
        .or_else(|| volume.attachments.first())
}

fn verify_attachment(attachment: &VolumeAttachment, path: &str, volume_id: &str, node_id: &str) -> Result<()> {
    if attachment.device != path {
        return Err(CloudError::DeviceMismatch {
            volume_id: volume_id.to_string(),
            node: node_id.to_string(),
            requested: path.to_string(),
            found: attachment.device.clone(),
        });
    }
    if attachment.instance_id != node_id {
        return Err(CloudError::InstanceMismatch {
            volume_id: volume_id.to_string(),
            node: node_id.to_string(),
            found: attachment.instance_id.clone(),
        });
    }
    if attachment.volume_id != volume_id {
        return Err(CloudError::AttachedVolumeMismatch {
            volume_id: volume_id.to_string(),
            node: node_id.to_string(),
            found: attachment.volume_id.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(device: &str, instance: &str, volume: &str, state: AttachmentState) -> VolumeAttachment {
        VolumeAttachment {
            volume_id: volume.to_string(),
            instance_id: instance.to_string(),
            device: device.to_string(),
            state,
        }
    }

    #[test]
    fn test_verify_attachment_ok() {
        let a = attachment("/dev/xvdb", "i-1", "vol-1", AttachmentState::Attached);
        assert!(verify_attachment(&a, "/dev/xvdb", "vol-1", "i-1").is_ok());
    }

    #[test]
    fn test_verify_attachment_device_mismatch() {
        let a = attachment("/dev/xvdc", "i-1", "vol-1", AttachmentState::Attached);
        let err = verify_attachment(&a, "/dev/xvdb", "vol-1", "i-1").unwrap_err();
        assert!(matches!(err, CloudError::DeviceMismatch { ref found, .. } if found == "/dev/xvdc"));
    }

    #[test]
    fn test_verify_attachment_instance_mismatch() {
        let a = attachment("/dev/xvdb", "i-2", "vol-1", AttachmentState::Attached);
        let err = verify_attachment(&a, "/dev/xvdb", "vol-1", "i-1").unwrap_err();
        assert!(matches!(err, CloudError::InstanceMismatch { ref found, .. } if found == "i-2"));
    }

    #[test]
    fn test_current_attachment_prefers_node() {
        let volume = Volume {
            volume_id: "vol-1".to_string(),
            attachments: vec![
                attachment("/dev/xvdb", "i-2", "vol-1", AttachmentState::Detaching),
                attachment("/dev/xvdc", "i-1", "vol-1", AttachmentState::Attaching),
            ],
            ..Default::default()
        };
        let current = current_attachment(&volume, "i-1").unwrap();
        assert_eq!(current.instance_id, "i-1");

        let current = current_attachment(&volume, "i-3").unwrap();
        assert_eq!(current.instance_id, "i-2");

        assert!(current_attachment(&Volume::default(), "i-1").is_none());
    }
}

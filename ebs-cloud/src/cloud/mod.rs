//! EBS volume operations on top of the [`ComputeApi`] capability.
//!
//! [`Cloud`] owns the device manager and sequences device assignment with the
//! cloud's attach and detach calls. Disk lifecycle operations (create, delete,
//! lookup by name) live in `disk`.

mod attach;
mod disk;
pub mod error;

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{ComputeApi, DescribeInstancesRequest, Instance};
use crate::config::CloudConfig;
use crate::devicemanager::BlockDeviceManager;
use crate::types::Metadata;

pub use error::{CloudError, Result};

/// Error code returned by the cloud for unknown volumes
const VOLUME_NOT_FOUND_CODE: &str = "InvalidVolume.NotFound";

/// EBS operations for a single region.
pub struct Cloud {
    metadata: Metadata,
    config: CloudConfig,
    dm: BlockDeviceManager,
    ec2: Arc<dyn ComputeApi>,
}

impl Cloud {
    /// Create a new Cloud over the given API client.
    pub fn new(ec2: Arc<dyn ComputeApi>, metadata: Metadata, config: CloudConfig) -> Self {
        info!(
            instance_id = %metadata.instance_id,
            region = %metadata.region,
            availability_zone = %metadata.availability_zone,
            device_prefix = %config.device_prefix,
            allocator = %config.allocator,
            "Initializing EBS cloud"
        );
        let dm = config.device_manager();
        Self::with_device_manager(ec2, metadata, config, dm)
    }

    /// Create a new Cloud with an explicitly constructed device manager.
    pub fn with_device_manager(
        ec2: Arc<dyn ComputeApi>,
        metadata: Metadata,
        config: CloudConfig,
        dm: BlockDeviceManager,
    ) -> Self {
        Self {
            metadata,
            config,
            dm,
            ec2,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn device_manager(&self) -> &BlockDeviceManager {
        &self.dm
    }

    /// Describe a single instance, following pagination.
    pub async fn get_instance(&self, node_id: &str) -> Result<Instance> {
        let mut request = DescribeInstancesRequest {
            instance_ids: vec![node_id.to_string()],
            next_token: None,
        };

        let mut results = Vec::new();
        loop {
            let response = self
                .ec2
                .describe_instances(request.clone())
                .await
                .map_err(CloudError::ListInstances)?;
            results.extend(response.instances);

            match response.next_token {
                Some(token) if !token.is_empty() => request.next_token = Some(token),
                _ => break,
            }
        }

        if results.len() != 1 {
            return Err(CloudError::InstanceNotFound {
                node: node_id.to_string(),
                count: results.len(),
            });
        }

        let instance = results.remove(0);
        debug!(
            node = %node_id,
            devices = instance.block_device_mappings.len(),
            "Described instance"
        );
        Ok(instance)
    }

    /// Instance description used as the confirmed view of a node's devices.
    async fn devices_in_use(&self, node_id: &str) -> Result<Instance> {
        self.get_instance(node_id)
            .await
            .map_err(|e| CloudError::DevicesInUse {
                node: node_id.to_string(),
                source: Box::new(e),
            })
    }
}

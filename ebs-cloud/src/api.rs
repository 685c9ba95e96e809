//! Cloud compute API capability.
//!
//! [`ComputeApi`] is the narrow set of EC2 calls the driver makes. The real
//! HTTP client lives outside this crate; anything that answers these calls
//! (including an in-memory fake in tests) can be plugged into
//! [`Cloud`](crate::cloud::Cloud). Responses may be stale: the attachment list
//! of an instance lags behind attach and detach requests by several seconds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AttachmentState;

/// Opaque failure reported by the cloud API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A device attached to an instance, as listed in the instance description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBlockDeviceMapping {
    /// Device name as reported by the cloud (e.g. "/dev/xvdf" or "/dev/sdf")
    pub device_name: String,
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub block_device_mappings: Vec<InstanceBlockDeviceMapping>,
}

impl Instance {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            block_device_mappings: Vec::new(),
        }
    }

    /// Add a confirmed device mapping
    pub fn with_device(mut self, device_name: impl Into<String>, volume_id: impl Into<String>) -> Self {
        self.block_device_mappings.push(InstanceBlockDeviceMapping {
            device_name: device_name.into(),
            volume_id: volume_id.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
    pub state: AttachmentState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    /// Size in GiB
    pub size: i64,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub volume_type: String,
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A name/values filter, e.g. `tag:<key>` = `[value]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeInstancesRequest {
    pub instance_ids: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeInstancesResponse {
    pub instances: Vec<Instance>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeVolumesRequest {
    pub volume_ids: Vec<String>,
    pub filters: Vec<Filter>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeVolumesResponse {
    pub volumes: Vec<Volume>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub availability_zone: String,
    /// Size in GiB
    pub size: i64,
    pub volume_type: String,
    pub iops: Option<i64>,
    pub tags: HashMap<String, String>,
    /// Idempotency token for retried requests
    pub client_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachVolumeRequest {
    pub device: String,
    pub instance_id: String,
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachVolumeRequest {
    pub instance_id: String,
    pub volume_id: String,
}

/// The EC2 calls used by the driver.
#[tonic::async_trait]
pub trait ComputeApi: Send + Sync {
    async fn describe_instances(
        &self,
        request: DescribeInstancesRequest,
    ) -> Result<DescribeInstancesResponse, ApiError>;

    async fn describe_volumes(
        &self,
        request: DescribeVolumesRequest,
    ) -> Result<DescribeVolumesResponse, ApiError>;

    async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, ApiError>;

    async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), ApiError>;

    async fn attach_volume(&self, request: AttachVolumeRequest)
    -> Result<VolumeAttachment, ApiError>;

    async fn detach_volume(&self, request: DetachVolumeRequest)
    -> Result<VolumeAttachment, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_builder() {
        let instance = Instance::new("i-123")
            .with_device("/dev/xvdf", "vol-1")
            .with_device("/dev/sdg", "vol-2");

        assert_eq!(instance.instance_id, "i-123");
        assert_eq!(instance.block_device_mappings.len(), 2);
        assert_eq!(instance.block_device_mappings[1].device_name, "/dev/sdg");
        assert_eq!(instance.block_device_mappings[1].volume_id, "vol-2");
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new("InvalidVolume.NotFound", "volume vol-1 does not exist");
        assert_eq!(err.to_string(), "InvalidVolume.NotFound: volume vol-1 does not exist");
    }
}

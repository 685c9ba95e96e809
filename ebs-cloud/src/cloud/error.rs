use std::time::Duration;

use thiserror::Error;
use tonic::Status;

use crate::api::ApiError;
use crate::devicemanager::DeviceError;
use crate::types::{AttachmentState, VolumeTypeParseError};

#[derive(Error, Debug)]
pub enum CloudError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("could not retrieve devices in use for node {node}: {source}")]
    DevicesInUse {
        node: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("error listing AWS instances: {0}")]
    ListInstances(#[source] ApiError),

    #[error("expected 1 instance with ID {node:?}, got {count}")]
    InstanceNotFound { node: String, count: usize },

    #[error("could not attach volume {volume_id:?} to node {node:?}: {source}")]
    Attach {
        volume_id: String,
        node: String,
        #[source]
        source: ApiError,
    },

    #[error("could not detach volume {volume_id:?} from node {node:?}: {source}")]
    Detach {
        volume_id: String,
        node: String,
        #[source]
        source: ApiError,
    },

    #[error("timed out after {timeout:?} waiting for volume {volume_id:?} to be {expected} on node {node:?}")]
    AttachmentTimeout {
        volume_id: String,
        node: String,
        expected: AttachmentState,
        timeout: Duration,
    },

    #[error("could not describe volume {volume_id:?}: {source}")]
    DescribeVolume {
        volume_id: String,
        #[source]
        source: ApiError,
    },

    #[error("unexpected state: no attachment reported after attaching {volume_id:?} to {node:?}")]
    MissingAttachment { volume_id: String, node: String },

    #[error("disk attachment of {volume_id:?} to {node:?} failed: requested device {requested:?} but found {found:?}")]
    DeviceMismatch {
        volume_id: String,
        node: String,
        requested: String,
        found: String,
    },

    #[error("disk attachment of {volume_id:?} to {node:?} failed: requested instance {node:?} but found {found:?}")]
    InstanceMismatch {
        volume_id: String,
        node: String,
        found: String,
    },

    #[error("disk attachment to {node:?} failed: requested volume {volume_id:?} but found {found:?}")]
    AttachedVolumeMismatch {
        volume_id: String,
        node: String,
        found: String,
    },

    #[error(transparent)]
    InvalidVolumeType(#[from] VolumeTypeParseError),

    #[error("could not create volume in EC2: {0}")]
    CreateVolume(#[source] ApiError),

    #[error("volume ID was not returned by CreateVolume")]
    MissingVolumeId,

    #[error("disk size was not returned by CreateVolume")]
    MissingVolumeSize,

    #[error("DeleteDisk could not delete volume: {0}")]
    DeleteVolume(#[source] ApiError),

    #[error("Volume was not found")]
    VolumeNotFound,

    #[error("Multiple disks with same name")]
    MultipleDisks,

    #[error("There is already a disk with same name and different size")]
    DiskExistsDifferentSize,

    #[error("could not list volumes: {0}")]
    ListVolumes(#[source] ApiError),
}

pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    /// Short label for metrics.
    pub fn code(&self) -> &'static str {
        match self {
            CloudError::Device(DeviceError::TooManyVolumes { .. }) => "exhausted",
            CloudError::Device(_) => "device",
            CloudError::DevicesInUse { .. } | CloudError::ListInstances(_) => "describe",
            CloudError::InstanceNotFound { .. } | CloudError::VolumeNotFound => "not_found",
            CloudError::Attach { .. } => "attach",
            CloudError::Detach { .. } => "detach",
            CloudError::AttachmentTimeout { .. } => "timeout",
            CloudError::MissingAttachment { .. }
            | CloudError::DeviceMismatch { .. }
            | CloudError::InstanceMismatch { .. }
            | CloudError::AttachedVolumeMismatch { .. } => "verification",
            _ => "error",
        }
    }
}

impl From<CloudError> for Status {
    fn from(err: CloudError) -> Self {
        let message = err.to_string();
        match err {
            CloudError::Device(DeviceError::NilInstance) | CloudError::InvalidVolumeType(_) => {
                Status::invalid_argument(message)
            }
            CloudError::Device(DeviceError::TooManyVolumes { .. }) => {
                Status::resource_exhausted(message)
            }
            CloudError::Device(_) => Status::aborted(message),
            CloudError::DevicesInUse { .. } | CloudError::ListInstances(_) => {
                Status::unavailable(message)
            }
            CloudError::InstanceNotFound { .. } | CloudError::VolumeNotFound => {
                Status::not_found(message)
            }
            CloudError::AttachmentTimeout { .. } => Status::deadline_exceeded(message),
            CloudError::MissingAttachment { .. }
            | CloudError::DeviceMismatch { .. }
            | CloudError::InstanceMismatch { .. }
            | CloudError::AttachedVolumeMismatch { .. } => Status::failed_precondition(message),
            CloudError::MultipleDisks | CloudError::DiskExistsDifferentSize => {
                Status::already_exists(message)
            }
            _ => Status::internal(message),
        }
    }
}

//! Type-safe wrappers for volume parameters and cloud state.
//!
//! Each enum implements `FromStr` for parsing at API boundaries (StorageClass
//! parameters, cloud responses) and `Display` for the wire spelling.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default volume size: 1GiB
pub const DEFAULT_VOLUME_SIZE: i64 = 1024 * 1024 * 1024;

/// Tag key holding the CSI volume name
pub const VOLUME_NAME_TAG_KEY: &str = "com.amazon.aws.csi.volume";

/// Minimum total IOPS for provisioned-IOPS volumes
pub const MIN_TOTAL_IOPS: i64 = 100;
/// Maximum total IOPS for provisioned-IOPS volumes
pub const MAX_TOTAL_IOPS: i64 = 20000;

const GIB: i64 = 1024 * 1024 * 1024;

/// Convert bytes to GiB, rounding up so the volume is never smaller than requested.
pub fn bytes_to_gib(bytes: i64) -> i64 {
    if bytes <= 0 {
        return 0;
    }
    bytes / GIB + i64::from(bytes % GIB != 0)
}

// ============================================================================
// VolumeType
// ============================================================================

/// EBS volume type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeType {
    /// General purpose SSD (default)
    #[default]
    Gp2,
    /// Provisioned IOPS SSD
    Io1,
    /// Cold HDD
    Sc1,
    /// Throughput-optimized HDD
    St1,
}

impl VolumeType {
    /// True if the type takes an explicit IOPS value.
    pub const fn is_provisioned_iops(self) -> bool {
        matches!(self, VolumeType::Io1)
    }
}

impl Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeType::Gp2 => write!(f, "gp2"),
            VolumeType::Io1 => write!(f, "io1"),
            VolumeType::Sc1 => write!(f, "sc1"),
            VolumeType::St1 => write!(f, "st1"),
        }
    }
}

impl FromStr for VolumeType {
    type Err = VolumeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "gp2" => Ok(VolumeType::Gp2),
            "io1" => Ok(VolumeType::Io1),
            "sc1" => Ok(VolumeType::Sc1),
            "st1" => Ok(VolumeType::St1),
            _ => Err(VolumeTypeParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid volume type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid AWS VolumeType {0:?}")]
pub struct VolumeTypeParseError(pub String);

// ============================================================================
// AttachmentState
// ============================================================================

/// State of a volume attachment as reported by the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
    Busy,
}

impl Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentState::Attaching => write!(f, "attaching"),
            AttachmentState::Attached => write!(f, "attached"),
            AttachmentState::Detaching => write!(f, "detaching"),
            AttachmentState::Detached => write!(f, "detached"),
            AttachmentState::Busy => write!(f, "busy"),
        }
    }
}

// ============================================================================
// Disk
// ============================================================================

/// Options for creating a disk.
#[derive(Debug, Clone, Default)]
pub struct DiskOptions {
    pub capacity_bytes: i64,
    pub tags: HashMap<String, String>,
    /// Raw volume type parameter; empty selects the default type
    pub volume_type: String,
    pub iops_per_gb: i64,
}

impl DiskOptions {
    /// Total IOPS for `capacity_gib`, clamped to the provider limits.
    pub fn total_iops(&self, capacity_gib: i64) -> i64 {
        capacity_gib
            .saturating_mul(self.iops_per_gb)
            .clamp(MIN_TOTAL_IOPS, MAX_TOTAL_IOPS)
    }
}

/// A created or discovered disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub volume_id: String,
    pub capacity_gib: i64,
}

/// Identity of the instance the driver runs on, supplied by the host process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub instance_id: String,
    pub region: String,
    pub availability_zone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_type_from_str() {
        assert_eq!("gp2".parse::<VolumeType>().unwrap(), VolumeType::Gp2);
        assert_eq!("".parse::<VolumeType>().unwrap(), VolumeType::Gp2);
        assert_eq!("io1".parse::<VolumeType>().unwrap(), VolumeType::Io1);
        assert_eq!("sc1".parse::<VolumeType>().unwrap(), VolumeType::Sc1);
        assert_eq!("st1".parse::<VolumeType>().unwrap(), VolumeType::St1);
        assert!("gp9".parse::<VolumeType>().is_err());
    }

    #[test]
    fn test_volume_type_parse_error_message() {
        let err = "magnetic".parse::<VolumeType>().unwrap_err();
        assert_eq!(err.to_string(), "invalid AWS VolumeType \"magnetic\"");
    }

    #[test]
    fn test_volume_type_display() {
        assert_eq!(VolumeType::Gp2.to_string(), "gp2");
        assert_eq!(VolumeType::Io1.to_string(), "io1");
        assert!(VolumeType::Io1.is_provisioned_iops());
        assert!(!VolumeType::St1.is_provisioned_iops());
    }

    #[test]
    fn test_bytes_to_gib() {
        assert_eq!(bytes_to_gib(0), 0);
        assert_eq!(bytes_to_gib(1), 1);
        assert_eq!(bytes_to_gib(DEFAULT_VOLUME_SIZE), 1);
        assert_eq!(bytes_to_gib(DEFAULT_VOLUME_SIZE + 1), 2);
        assert_eq!(bytes_to_gib(10 * DEFAULT_VOLUME_SIZE), 10);
        assert_eq!(bytes_to_gib(i64::MAX), i64::MAX / DEFAULT_VOLUME_SIZE + 1);
    }

    #[test]
    fn test_total_iops_clamped() {
        let opts = DiskOptions {
            iops_per_gb: 10,
            ..Default::default()
        };
        assert_eq!(opts.total_iops(1), MIN_TOTAL_IOPS);
        assert_eq!(opts.total_iops(50), 500);
        assert_eq!(opts.total_iops(5000), MAX_TOTAL_IOPS);

        let huge = DiskOptions {
            iops_per_gb: i64::MAX,
            ..Default::default()
        };
        assert_eq!(huge.total_iops(i64::MAX), MAX_TOTAL_IOPS);
        assert_eq!(huge.total_iops(-2), MIN_TOTAL_IOPS);
    }

    #[test]
    fn test_attachment_state_serde() {
        let state: AttachmentState = serde_json::from_str("\"attached\"").unwrap();
        assert_eq!(state, AttachmentState::Attached);
        assert_eq!(serde_json::to_string(&AttachmentState::Detaching).unwrap(), "\"detaching\"");
        assert_eq!(AttachmentState::Busy.to_string(), "busy");
    }
}

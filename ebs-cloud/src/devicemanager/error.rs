use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("can't get ID from a nil instance")]
    NilInstance,

    #[error("too many EBS volumes attached to node {node}")]
    TooManyVolumes { node: String },

    #[error("release called for disk {volume_id:?} when attach not in progress")]
    NotInProgress { volume_id: String },

    #[error("release on device {path:?} assigned to different volume: {requested:?} vs {existing:?}")]
    VolumeMismatch {
        path: String,
        requested: String,
        existing: String,
    },
}

pub type Result<T> = std::result::Result<T, DeviceError>;

use crate::types::CoilAddress;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("write to {coil} failed: {reason}")]
    Write { coil: CoilAddress, reason: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Output collaborator for the effects controller. Implementations must tolerate
/// concurrent callers; the interlock serializes writes anyway.
pub trait HardwareOutputPort: Send + Sync {
    fn write_coil(&self, coil: CoilAddress, on: bool) -> Result<(), HardwareError>;

    /// Short human label for logs and status ("plc 10.0.0.5:502", "simulated").
    fn describe(&self) -> String;

    fn close(&self) {}
}

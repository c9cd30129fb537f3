//! Device ID validation.
//!
//! Device IDs become certificate CNs and archive file names, so they must be
//! usable as a single path component.

/// Upper bound on device ID length.
pub const MAX_DEVICE_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceIdError {
    #[error("device ID is empty")]
    Empty,

    #[error("device ID is longer than {MAX_DEVICE_ID_LEN} bytes")]
    TooLong,

    /// Contains a path separator, a control character or is a dot segment.
    #[error("device ID is not a safe path component")]
    Unsafe,
}

/// Check that `device_id` is a non-empty, filesystem-safe identifier.
pub fn validate_device_id(device_id: &str) -> Result<(), DeviceIdError> {
    if device_id.is_empty() {
        return Err(DeviceIdError::Empty);
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(DeviceIdError::TooLong);
    }
    if device_id == "." || device_id == ".." {
        return Err(DeviceIdError::Unsafe);
    }
    if device_id
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(DeviceIdError::Unsafe);
    }
    Ok(())
}

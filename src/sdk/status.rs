use thiserror::Error;

/// Non-success status codes reported by the camera SDK.
///
/// Success is not a variant: SDK calls return `Ok` on success, and a completed
/// frame carries `Result<(), SdkError>` as its status.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkError {
    #[error("unexpected camera fault")]
    CameraFault,
    #[error("unexpected fault in the SDK or driver")]
    InternalFault,
    #[error("camera handle is invalid")]
    BadHandle,
    #[error("bad parameter to API call")]
    BadParameter,
    #[error("sequence of API calls is incorrect")]
    BadSequence,
    #[error("camera or attribute not found")]
    NotFound,
    #[error("camera cannot be opened in the requested mode")]
    AccessDenied,
    #[error("camera was unplugged")]
    Unplugged,
    #[error("setup is invalid")]
    InvalidSetup,
    #[error("system or network resources unavailable")]
    Resources,
    #[error("insufficient bandwidth")]
    Bandwidth,
    #[error("too many frames on the queue")]
    QueueFull,
    #[error("frame buffer is too small")]
    BufferTooSmall,
    #[error("frame cancelled by user")]
    Cancelled,
    #[error("the data for the frame was lost")]
    DataLost,
    #[error("some data in the frame is missing")]
    DataMissing,
    #[error("timeout during wait")]
    Timeout,
    #[error("attribute value is out of the expected range")]
    OutOfRange,
    #[error("attribute is not this type")]
    WrongType,
    #[error("attribute write forbidden at this time")]
    Forbidden,
    #[error("attribute is not available at this time")]
    Unavailable,
    #[error("a firewall is blocking the traffic")]
    Firewall,
    #[error("unknown status code {0}")]
    Unknown(u32),
}

const CODES: [SdkError; 22] = [
    SdkError::CameraFault,
    SdkError::InternalFault,
    SdkError::BadHandle,
    SdkError::BadParameter,
    SdkError::BadSequence,
    SdkError::NotFound,
    SdkError::AccessDenied,
    SdkError::Unplugged,
    SdkError::InvalidSetup,
    SdkError::Resources,
    SdkError::Bandwidth,
    SdkError::QueueFull,
    SdkError::BufferTooSmall,
    SdkError::Cancelled,
    SdkError::DataLost,
    SdkError::DataMissing,
    SdkError::Timeout,
    SdkError::OutOfRange,
    SdkError::WrongType,
    SdkError::Forbidden,
    SdkError::Unavailable,
    SdkError::Firewall,
];

impl SdkError {
    /// Translates a raw SDK status code. Code 0 is success and maps to `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            n => Some(
                CODES
                    .get(n as usize - 1)
                    .copied()
                    .unwrap_or(SdkError::Unknown(n)),
            ),
        }
    }

    /// The raw status code this error was translated from.
    pub fn code(&self) -> u32 {
        match self {
            SdkError::Unknown(n) => *n,
            other => CODES
                .iter()
                .position(|c| c == other)
                .map(|i| i as u32 + 1)
                .unwrap_or(u32::MAX),
        }
    }

    /// Statuses that mean the device itself went away rather than a transient fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SdkError::Unplugged | SdkError::BadHandle)
    }
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_code() {
        assert_eq!(SdkError::from_code(0), None);
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(SdkError::from_code(1), Some(SdkError::CameraFault));
        assert_eq!(SdkError::from_code(7), Some(SdkError::AccessDenied));
        assert_eq!(SdkError::from_code(14), Some(SdkError::Cancelled));
        assert_eq!(SdkError::from_code(22), Some(SdkError::Firewall));
        assert_eq!(SdkError::Unplugged.code(), 8);
    }

    #[test]
    fn test_unknown_code_preserved() {
        let err = SdkError::from_code(4242).unwrap();
        assert_eq!(err, SdkError::Unknown(4242));
        assert_eq!(err.code(), 4242);
        assert_eq!(err.to_string(), "unknown status code 4242");
    }
}

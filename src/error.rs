use log::error;
use std::panic::Location;
use thiserror::Error;

use crate::sdk::SdkError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Failures of the capture layer, classified by where they happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The SDK library could not be initialised.
    #[error("Failed to initialize camera library: {0}")]
    Initialization(String),

    /// No attached device matches the request.
    #[error("Camera not found: {0}")]
    DeviceNotFound(String),

    /// Opening, closing or configuring the device handle failed.
    #[error("Camera handle error: {context}: {source}")]
    Handle { context: String, source: SdkError },

    /// Attribute access or a command failed while configuring or streaming.
    #[error("Stream error: {context}: {source}")]
    Stream { context: String, source: SdkError },

    /// A completed frame reported a failure status.
    #[error("Frame error: {context}: {source}")]
    Frame { context: String, source: SdkError },

    /// The hardware reports a pixel format without a conversion path.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),
}

/// Which part of the taxonomy an SDK failure belongs to at a given call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Handle,
    Stream,
    Frame,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }
}

impl CaptureError {
    pub fn initialization(msg: impl Into<String>) -> Self {
        CaptureError::Initialization(msg.into())
    }

    pub fn device_not_found(msg: impl Into<String>) -> Self {
        CaptureError::DeviceNotFound(msg.into())
    }

    pub fn handle(context: impl Into<String>, source: SdkError) -> Self {
        CaptureError::Handle {
            context: context.into(),
            source,
        }
    }

    pub fn stream(context: impl Into<String>, source: SdkError) -> Self {
        CaptureError::Stream {
            context: context.into(),
            source,
        }
    }

    pub fn frame(context: impl Into<String>, source: SdkError) -> Self {
        CaptureError::Frame {
            context: context.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<String>) -> Self {
        CaptureError::UnsupportedFormat(format.into())
    }

    /// Classifies an SDK failure. `NotFound` while opening becomes `DeviceNotFound`.
    pub fn from_sdk(kind: ErrorKind, context: impl Into<String>, source: SdkError) -> Self {
        let context = context.into();
        match kind {
            ErrorKind::Initialization => {
                CaptureError::Initialization(format!("{}: {}", context, source))
            }
            ErrorKind::Handle if source == SdkError::NotFound => {
                CaptureError::DeviceNotFound(format!("{}: {}", context, source))
            }
            ErrorKind::Handle => CaptureError::handle(context, source),
            ErrorKind::Stream => CaptureError::stream(context, source),
            ErrorKind::Frame => CaptureError::frame(context, source),
        }
    }

    /// The underlying SDK status, if the error came from the SDK.
    pub fn sdk_status(&self) -> Option<SdkError> {
        match self {
            CaptureError::Handle { source, .. }
            | CaptureError::Stream { source, .. }
            | CaptureError::Frame { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Turns SDK results into the capture error taxonomy.
///
/// `raise` is for lifecycle transitions, where the caller gets the error.
/// `check` is for best-effort paths: the failure is logged with the caller's
/// location and the operation is skipped.
pub trait SdkResultExt<T> {
    fn raise(self, kind: ErrorKind, context: &str) -> std::result::Result<T, CaptureError>;
    fn check(self, context: &str) -> Option<T>;
}

impl<T> SdkResultExt<T> for std::result::Result<T, SdkError> {
    fn raise(self, kind: ErrorKind, context: &str) -> std::result::Result<T, CaptureError> {
        self.map_err(|e| CaptureError::from_sdk(kind, context, e))
    }

    #[track_caller]
    fn check(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                let caller = Location::caller();
                error!(
                    "{} [{}:{}] {} (status {})",
                    context,
                    caller.file(),
                    caller.line(),
                    e,
                    e.code()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_on_open_is_device_not_found() {
        let err = CaptureError::from_sdk(ErrorKind::Handle, "open camera 7", SdkError::NotFound);
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        assert_eq!(err.sdk_status(), None);
    }

    #[test]
    fn test_handle_error_keeps_status() {
        let err = CaptureError::from_sdk(ErrorKind::Handle, "open camera 7", SdkError::AccessDenied);
        assert_eq!(err.sdk_status(), Some(SdkError::AccessDenied));
        assert!(err.to_string().contains("open camera 7"));
    }

    #[test]
    fn test_raise_and_check() {
        let failed: std::result::Result<u32, SdkError> = Err(SdkError::Forbidden);
        assert_eq!(
            failed.raise(ErrorKind::Stream, "set Width"),
            Err(CaptureError::stream("set Width", SdkError::Forbidden))
        );
        assert_eq!(failed.check("set Width"), None);
        assert_eq!(Ok::<u32, SdkError>(5).check("get Width"), Some(5));
    }
}

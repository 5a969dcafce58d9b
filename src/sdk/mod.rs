//! Boundary to the vendor camera SDK.
//!
//! The capture layer never talks to hardware directly. Everything it needs from
//! the driver goes through [`CameraSdk`], which keeps the session logic testable
//! against [`SimulatedSdk`].

mod sim;
mod status;

pub use sim::{SimulatedDevice, SimulatedSdk};
pub use status::{SdkError, SdkResult};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Unique numeric id the SDK assigns to an attached camera.
pub type DeviceId = u32;

/// Opaque handle to an opened camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdkHandle(pub u32);

impl fmt::Display for SdkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an attached camera as reported by the SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub unique_id: DeviceId,
    pub camera_name: String,
    pub model_name: String,
    pub serial_number: String,
    pub firmware_version: String,
}

/// Attach/detach notifications for the camera link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    Add,
    Remove,
}

/// Callback invoked by the SDK on its own notification thread.
pub type LinkCallback = Arc<dyn Fn(LinkEvent, DeviceId) + Send + Sync>;

/// Datatype of a named camera attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttrKind {
    Unknown,
    Command,
    Raw,
    String,
    Enum,
    Uint32,
    Float32,
    Int64,
    Boolean,
}

/// Access flags attached to an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrFlags {
    pub read: bool,
    pub write: bool,
    pub volatile: bool,
    pub constant: bool,
}

impl AttrFlags {
    pub const READ_ONLY: AttrFlags = AttrFlags {
        read: true,
        write: false,
        volatile: false,
        constant: false,
    };
    pub const READ_WRITE: AttrFlags = AttrFlags {
        read: true,
        write: true,
        volatile: false,
        constant: false,
    };
    pub const CONSTANT: AttrFlags = AttrFlags {
        read: true,
        write: false,
        volatile: false,
        constant: true,
    };
    pub const WRITE_ONLY: AttrFlags = AttrFlags {
        read: false,
        write: true,
        volatile: false,
        constant: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrInfo {
    pub kind: AttrKind,
    /// Slash separated category path, e.g. `/Controls/Exposure`.
    pub category: String,
    pub flags: AttrFlags,
}

/// Value of a named attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Uint32(u32),
    Float32(f32),
    Int64(i64),
    Enum(String),
    String(String),
    Boolean(bool),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Uint32(_) => AttrKind::Uint32,
            AttrValue::Float32(_) => AttrKind::Float32,
            AttrValue::Int64(_) => AttrKind::Int64,
            AttrValue::Enum(_) => AttrKind::Enum,
            AttrValue::String(_) => AttrKind::String,
            AttrValue::Boolean(_) => AttrKind::Boolean,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Uint32(v) => write!(f, "{}", v),
            AttrValue::Float32(v) => write!(f, "{}", v),
            AttrValue::Int64(v) => write!(f, "{}", v),
            AttrValue::Enum(v) | AttrValue::String(v) => f.write_str(v),
            AttrValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// Valid range of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrRange {
    Uint32 { min: u32, max: u32 },
    Float32 { min: f32, max: f32 },
    Int64 { min: i64, max: i64 },
    Enum(Vec<String>),
}

/// Raw frame buffer exchanged with the SDK capture queue.
#[derive(Debug)]
pub struct RawFrame {
    pub buffer: Vec<u8>,
    /// Completion status, filled in by the SDK when the frame is done.
    pub status: Result<(), SdkError>,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
}

impl RawFrame {
    pub fn with_size(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size],
            status: Ok(()),
            width: 0,
            height: 0,
            frame_count: 0,
        }
    }
}

/// Returned when the SDK refuses to queue a frame; hands the buffer back.
#[derive(Debug)]
pub struct QueueRejected {
    pub status: SdkError,
    pub frame: RawFrame,
}

/// The vendor SDK surface consumed by the capture layer.
///
/// All methods take `&self` so the SDK can be shared as `Arc<dyn CameraSdk>`
/// between the owner thread, the acquisition thread and the SDK's own
/// notification thread. Implementations use interior mutability.
pub trait CameraSdk: Send + Sync {
    fn initialize(&self) -> SdkResult<()>;
    fn uninitialize(&self);

    /// Live count of attached cameras.
    fn camera_count(&self) -> usize;
    fn camera_list(&self) -> Vec<CameraInfo>;

    /// Opens a camera for exclusive master access.
    fn open(&self, id: DeviceId) -> SdkResult<SdkHandle>;
    fn close(&self, handle: SdkHandle) -> SdkResult<()>;

    fn attr_list(&self, handle: SdkHandle) -> SdkResult<Vec<String>>;
    fn attr_info(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrInfo>;
    fn attr_get(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrValue>;
    fn attr_set(&self, handle: SdkHandle, name: &str, value: AttrValue) -> SdkResult<()>;
    fn attr_range(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrRange>;

    fn adjust_packet_size(&self, handle: SdkHandle, max_packet_size: u32) -> SdkResult<()>;

    fn capture_start(&self, handle: SdkHandle) -> SdkResult<()>;
    fn capture_end(&self, handle: SdkHandle) -> SdkResult<()>;

    /// Hands a frame buffer to the capture queue.
    fn queue_frame(&self, handle: SdkHandle, frame: RawFrame) -> Result<(), QueueRejected>;

    /// Blocks without timeout until the oldest queued frame completes.
    ///
    /// The frame comes back with its completion status set. Frames cancelled by
    /// [`CameraSdk::queue_clear`] come back with [`SdkError::Cancelled`].
    fn wait_for_frame_done(&self, handle: SdkHandle) -> SdkResult<RawFrame>;

    /// Cancels every queued frame and wakes any pending wait.
    fn queue_clear(&self, handle: SdkHandle) -> SdkResult<()>;

    fn command_run(&self, handle: SdkHandle, command: &str) -> SdkResult<()>;

    /// Registers the process-wide callback for one link event kind.
    ///
    /// Only one registration per kind is accepted.
    fn link_callback_register(&self, event: LinkEvent, callback: LinkCallback) -> SdkResult<()>;
    fn link_callback_unregister(&self, event: LinkEvent) -> SdkResult<()>;

    fn attr_u32(&self, handle: SdkHandle, name: &str) -> SdkResult<u32> {
        match self.attr_get(handle, name)? {
            AttrValue::Uint32(v) => Ok(v),
            _ => Err(SdkError::WrongType),
        }
    }

    fn set_attr_u32(&self, handle: SdkHandle, name: &str, value: u32) -> SdkResult<()> {
        self.attr_set(handle, name, AttrValue::Uint32(value))
    }

    fn attr_enum(&self, handle: SdkHandle, name: &str) -> SdkResult<String> {
        match self.attr_get(handle, name)? {
            AttrValue::Enum(v) => Ok(v),
            _ => Err(SdkError::WrongType),
        }
    }

    fn set_attr_enum(&self, handle: SdkHandle, name: &str, value: &str) -> SdkResult<()> {
        self.attr_set(handle, name, AttrValue::Enum(value.to_string()))
    }
}

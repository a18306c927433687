//! Common error types

use crate::usb_types::HandleId;
use thiserror::Error;

/// Code returned by [`Error::code`] for operations on a handle the session
/// does not own.
pub const INVALID_HANDLE_CODE: i32 = -100;

/// Platform-level USB error kinds
///
/// Mirrors the libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Input/output error
    #[error("input/output error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Insufficient permissions to open or claim
    #[error("access denied (insufficient permissions)")]
    AccessDenied,
    /// Device has been disconnected
    #[error("no such device (it may have been disconnected)")]
    NoDevice,
    /// Entity not found, or the device vanished mid-operation
    #[error("entity not found")]
    NotFound,
    /// Resource busy
    #[error("resource busy")]
    Busy,
    /// Operation timed out
    #[error("operation timed out")]
    Timeout,
    /// Device sent more data than requested
    #[error("overflow")]
    Overflow,
    /// Endpoint halted
    #[error("pipe error (endpoint stalled)")]
    Stall,
    /// System call interrupted
    #[error("system call interrupted")]
    Interrupted,
    /// Out of memory
    #[error("insufficient memory")]
    NoMem,
    /// Operation not supported by the platform
    #[error("operation not supported or unimplemented on this platform")]
    NotSupported,
    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl UsbError {
    /// The libusb error code for this kind
    pub fn code(&self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::AccessDenied => -3,
            UsbError::NoDevice => -4,
            UsbError::NotFound => -5,
            UsbError::Busy => -6,
            UsbError::Timeout => -7,
            UsbError::Overflow => -8,
            UsbError::Stall => -9,
            UsbError::Interrupted => -10,
            UsbError::NoMem => -11,
            UsbError::NotSupported => -12,
            UsbError::Other(_) => -99,
        }
    }

    /// Whether the error means the device behind a handle no longer exists
    pub fn is_gone(&self) -> bool {
        matches!(self, UsbError::NotFound | UsbError::NoDevice)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The platform session could not be created
    #[error("Failed to initialize USB context: {0}")]
    Initialization(UsbError),

    #[error("Handle {0} is not open in this session")]
    InvalidHandle(HandleId),

    #[error("Interface {interface} is not claimed on handle {handle}")]
    InterfaceNotClaimed { handle: HandleId, interface: u8 },

    #[error("Device filter is empty")]
    EmptyFilter,

    #[error("Hotplug is not supported on this platform")]
    Unsupported,

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Numeric code for callers that speak libusb-style return values
    ///
    /// Platform errors keep their libusb code; a handle the session does not
    /// own maps to [`INVALID_HANDLE_CODE`].
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidHandle(_) => INVALID_HANDLE_CODE,
            Error::Usb(e) | Error::Initialization(e) => e.code(),
            Error::Unsupported => UsbError::NotSupported.code(),
            Error::InterfaceNotClaimed { .. } | Error::EmptyFilter => UsbError::InvalidParam.code(),
            _ => UsbError::Other(String::new()).code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types and native status mapping

use std::ffi::CStr;
use std::fmt;
use std::sync::{Arc, OnceLock};

use libc::c_int;
use thiserror::Error;

use crate::backend::Backend;
use crate::version::LibraryVersion;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to create an acquisition context for driver: {0}")]
    InvalidDriver(String),
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("Payload of {size} bytes is not a multiple of the {element}-byte element size")]
    PayloadShape { size: usize, element: usize },
    #[error("Device table block is {actual} bytes, expected {expected}")]
    TableShape { expected: usize, actual: usize },
    #[error("Device table contains address 0x{0:08X} more than once")]
    DuplicateDevice(u32),
    #[error("String option did not fit in a {capacity}-byte buffer")]
    StringOverflow { capacity: usize },
    #[error("String value contains an interior nul byte")]
    InvalidString,
    #[error("liboni version {found} not supported, required >= {required}")]
    UnsupportedVersion {
        found: LibraryVersion,
        required: LibraryVersion,
    },
    #[error("Acquisition context has been released")]
    Released,
    #[error("Frame has been released")]
    FrameReleased,
    #[error("Context metadata unavailable after a failed refresh")]
    MetadataUnavailable,
    #[error("Native call succeeded without producing a frame")]
    NullFrame,
}

impl Error {
    /// Native status code, if this error came from liboni
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Native(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// A non-zero status returned by a native call.
///
/// The message is looked up through the backend that produced the code the
/// first time it is displayed, then cached.
pub struct NativeError {
    code: c_int,
    backend: Arc<dyn Backend>,
    message: OnceLock<String>,
}

impl NativeError {
    pub(crate) fn new(code: c_int, backend: Arc<dyn Backend>) -> Self {
        Self {
            code,
            backend,
            message: OnceLock::new(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable description from the native library
    pub fn message(&self) -> &str {
        self.message.get_or_init(|| {
            let ptr = self.backend.error_str(self.code);
            if ptr.is_null() {
                return format!("Unknown error {}", self.code);
            }
            // SAFETY: error_str returns a static, nul-terminated string.
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
        })
    }

    /// Whether the message has been fetched yet
    pub fn is_resolved(&self) -> bool {
        self.message.get().is_some()
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code)
    }
}

impl fmt::Debug for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeError")
            .field("code", &self.code)
            .field("message", &self.message.get())
            .finish()
    }
}

impl std::error::Error for NativeError {}

/// Map a native status to `Ok(())` or a `NativeError`.
///
/// Any non-zero value is a failure.
pub(crate) fn check(rc: c_int, backend: &Arc<dyn Backend>) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(NativeError::new(rc, Arc::clone(backend)).into())
    }
}

/// Like [`check`], for calls whose positive return carries a size
pub(crate) fn check_size(rc: c_int, backend: &Arc<dyn Backend>) -> Result<usize> {
    if rc < 0 {
        Err(NativeError::new(rc, Arc::clone(backend)).into())
    } else {
        Ok(rc as usize)
    }
}

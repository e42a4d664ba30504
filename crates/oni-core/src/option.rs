//! Option protocol
//!
//! Configuration, run control and device enumeration all travel through the
//! same get/set call shape. A getter first offers a buffer and a
//! `size_t`-sized length, the native side fills the buffer and writes back the
//! number of bytes it used. Setters pass a buffer and its exact length.
//!
//! Payload kinds implement [`OptionValue`]; raw blocks (the device table) go
//! through [`Options::get_block`].

use std::ffi::CString;
use std::sync::Arc;

use libc::{c_int, size_t};
use oni_sys::oni_ctx;
use tracing::trace;

use crate::backend::{Backend, OptionScope};
use crate::error::{check, Error, Result};

/// Buffer offered to string getters. liboni has no way to ask for the
/// required length first, so longer strings fail with
/// [`Error::StringOverflow`].
pub const STRING_OPTION_CAPACITY: usize = 1000;

/// Reserved context options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ContextOption {
    DeviceTable = oni_sys::ONI_OPT_DEVICETABLE,
    DeviceCount = oni_sys::ONI_OPT_NUMDEVICES,
    Running = oni_sys::ONI_OPT_RUNNING,
    Reset = oni_sys::ONI_OPT_RESET,
    SystemClockHz = oni_sys::ONI_OPT_SYSCLKHZ,
    AcquisitionClockHz = oni_sys::ONI_OPT_ACQCLKHZ,
    ResetAcquisitionCounter = oni_sys::ONI_OPT_RESETACQCOUNTER,
    HardwareAddress = oni_sys::ONI_OPT_HWADDRESS,
    MaxReadFrameSize = oni_sys::ONI_OPT_MAXREADFRAMESIZE,
    MaxWriteFrameSize = oni_sys::ONI_OPT_MAXWRITEFRAMESIZE,
    BlockReadSize = oni_sys::ONI_OPT_BLOCKREADSIZE,
    BlockWriteSize = oni_sys::ONI_OPT_BLOCKWRITESIZE,
}

/// Numeric option identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionId(pub c_int);

impl OptionId {
    /// First identifier of the implementation-specific region
    pub const CUSTOM_BEGIN: OptionId = OptionId(oni_sys::ONI_OPT_CUSTOMBEGIN);

    /// Implementation-specific option `index`, counted from [`OptionId::CUSTOM_BEGIN`]
    pub const fn custom(index: c_int) -> Self {
        Self(oni_sys::ONI_OPT_CUSTOMBEGIN + index)
    }

    pub fn is_custom(self) -> bool {
        self.0 >= oni_sys::ONI_OPT_CUSTOMBEGIN
    }
}

impl From<ContextOption> for OptionId {
    fn from(option: ContextOption) -> Self {
        Self(option as c_int)
    }
}

impl From<c_int> for OptionId {
    fn from(id: c_int) -> Self {
        Self(id)
    }
}

/// A payload kind that can be read or written as an option
pub trait OptionValue: Sized {
    /// Bytes offered to the native getter
    const CAPACITY: usize;

    /// Decode the bytes the native getter reported as used
    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Encode for a native setter; the length is passed verbatim
    fn encode(&self) -> Result<Vec<u8>>;
}

macro_rules! register_width_value {
    ($($ty:ty),*) => {$(
        impl OptionValue for $ty {
            const CAPACITY: usize = std::mem::size_of::<$ty>();

            fn decode(bytes: &[u8]) -> Result<Self> {
                let raw = bytes
                    .get(..Self::CAPACITY)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(Error::PayloadShape {
                        size: bytes.len(),
                        element: Self::CAPACITY,
                    })?;
                Ok(<$ty>::from_ne_bytes(raw))
            }

            fn encode(&self) -> Result<Vec<u8>> {
                Ok(self.to_ne_bytes().to_vec())
            }
        }
    )*};
}

register_width_value!(i32, u32);

impl OptionValue for String {
    const CAPACITY: usize = STRING_OPTION_CAPACITY;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let text = match bytes.iter().position(|&b| b == 0) {
            Some(end) => &bytes[..end],
            None if bytes.len() >= Self::CAPACITY => {
                return Err(Error::StringOverflow {
                    capacity: Self::CAPACITY,
                })
            }
            None => bytes,
        };
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let value = CString::new(self.as_str()).map_err(|_| Error::InvalidString)?;
        Ok(value.into_bytes_with_nul())
    }
}

/// Option access bound to one live context handle
pub(crate) struct Options<'a> {
    backend: &'a Arc<dyn Backend>,
    ctx: oni_ctx,
}

impl<'a> Options<'a> {
    pub(crate) fn new(backend: &'a Arc<dyn Backend>, ctx: oni_ctx) -> Self {
        Self { backend, ctx }
    }

    /// Fill `buf`, returning how many bytes the native side used
    fn get_raw(&self, option: OptionId, scope: OptionScope, buf: &mut [u8]) -> Result<usize> {
        let mut len: size_t = buf.len();
        // SAFETY: buf is valid for len bytes and ctx is held live by the caller.
        let rc = unsafe {
            self.backend
                .get_option(self.ctx, scope, option.0, buf.as_mut_ptr().cast(), &mut len)
        };
        check(rc, self.backend)?;
        trace!(option = option.0, ?scope, len, "Got option");
        Ok(len.min(buf.len()))
    }

    fn set_raw(&self, option: OptionId, scope: OptionScope, buf: &[u8]) -> Result<()> {
        // SAFETY: buf is valid for its length and ctx is held live by the caller.
        let rc = unsafe {
            self.backend
                .set_option(self.ctx, scope, option.0, buf.as_ptr().cast(), buf.len())
        };
        check(rc, self.backend)?;
        trace!(option = option.0, ?scope, len = buf.len(), "Set option");
        Ok(())
    }

    pub(crate) fn get<T: OptionValue>(&self, option: OptionId, scope: OptionScope) -> Result<T> {
        let mut buf = vec![0u8; T::CAPACITY];
        let used = self.get_raw(option, scope, &mut buf)?;
        T::decode(&buf[..used])
    }

    pub(crate) fn set<T: OptionValue>(
        &self,
        option: OptionId,
        value: &T,
        scope: OptionScope,
    ) -> Result<()> {
        self.set_raw(option, scope, &value.encode()?)
    }

    /// Read an opaque block of at most `size` bytes
    pub(crate) fn get_block(
        &self,
        option: OptionId,
        size: usize,
        scope: OptionScope,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let used = self.get_raw(option, scope, &mut buf)?;
        buf.truncate(used);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_ids() {
        assert_eq!(OptionId::custom(0), OptionId::CUSTOM_BEGIN);
        assert_eq!(OptionId::custom(3).0, 15);
        assert!(OptionId::custom(0).is_custom());
        assert!(!OptionId::from(ContextOption::BlockWriteSize).is_custom());
    }

    #[test]
    fn test_reserved_numbering() {
        assert_eq!(OptionId::from(ContextOption::DeviceTable).0, 0);
        assert_eq!(OptionId::from(ContextOption::ResetAcquisitionCounter).0, 6);
        assert_eq!(OptionId::from(ContextOption::BlockWriteSize).0, 11);
    }

    #[test]
    fn test_int_decode_needs_four_bytes() {
        assert_eq!(i32::decode(&(-7i32).to_ne_bytes()).unwrap(), -7);
        assert!(matches!(
            u32::decode(&[1, 2]),
            Err(Error::PayloadShape { size: 2, element: 4 })
        ));
    }

    #[test]
    fn test_string_decode() {
        assert_eq!(String::decode(b"ft600\0garbage").unwrap(), "ft600");
        assert_eq!(String::decode(b"short").unwrap(), "short");

        let full = vec![b'x'; STRING_OPTION_CAPACITY];
        assert!(matches!(
            String::decode(&full),
            Err(Error::StringOverflow { capacity: 1000 })
        ));
    }

    #[test]
    fn test_string_encode_appends_nul() {
        assert_eq!("abc".to_string().encode().unwrap(), b"abc\0");
        assert!(matches!(
            "a\0b".to_string().encode(),
            Err(Error::InvalidString)
        ));
    }
}

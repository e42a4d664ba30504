//! Frames: payloads backed by memory that liboni owns
//!
//! A [`Frame`] wraps one `oni_frame_t*`. The payload stays in native memory
//! until the frame is released; [`Frame::payload`] borrows it in place and
//! [`Frame::extract`] copies it out as typed samples. Release happens exactly
//! once, either through [`Frame::release`] or on drop.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oni_sys::oni_frame_t;
use tracing::trace;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::backend::Backend;
use crate::error::{Error, Result};

/// Plain-old-data element type for typed payload access
pub trait Sample: FromBytes + IntoBytes + Immutable + Copy {}

impl<T: FromBytes + IntoBytes + Immutable + Copy> Sample for T {}

/// Outstanding frames and the foreign bytes they pin
#[derive(Debug, Default)]
pub struct FrameLedger {
    frames: AtomicUsize,
    bytes: AtomicUsize,
}

impl FrameLedger {
    fn register(&self, bytes: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn retract(&self, bytes: usize) {
        self.frames.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// One delivery of payload bytes from, or to, a single device
pub struct Frame {
    raw: Option<NonNull<oni_frame_t>>,
    backend: Arc<dyn Backend>,
    ledger: Arc<FrameLedger>,
    accounted: usize,
}

// SAFETY: a frame is exclusively owned and liboni does not tie frame
// destruction to the creating thread.
unsafe impl Send for Frame {}

impl Frame {
    /// Take ownership of a frame handle produced by `backend`.
    ///
    /// # Safety
    /// `raw` must be a live frame from `backend` that nothing else will destroy.
    pub(crate) unsafe fn from_raw(
        raw: NonNull<oni_frame_t>,
        backend: Arc<dyn Backend>,
        ledger: Arc<FrameLedger>,
    ) -> Self {
        let accounted = raw.as_ref().data_sz as usize;
        ledger.register(accounted);
        Self {
            raw: Some(raw),
            backend,
            ledger,
            accounted,
        }
    }

    fn header(&self) -> Result<&oni_frame_t> {
        let raw = self.raw.ok_or(Error::FrameReleased)?;
        // SAFETY: the handle is live until release, which needs &mut self.
        Ok(unsafe { raw.as_ref() })
    }

    pub(crate) fn as_ptr(&self) -> Result<*const oni_frame_t> {
        self.raw
            .map(|raw| raw.as_ptr().cast_const())
            .ok_or(Error::FrameReleased)
    }

    /// Acquisition clock ticks when the frame was produced
    pub fn timestamp(&self) -> Result<u64> {
        Ok(self.header()?.time)
    }

    /// Fully-qualified address of the producing (or target) device
    pub fn device_address(&self) -> Result<u32> {
        Ok(self.header()?.dev_idx)
    }

    pub fn payload_size(&self) -> Result<u32> {
        Ok(self.header()?.data_sz)
    }

    /// Borrow the payload where it lies
    pub fn payload(&self) -> Result<&[u8]> {
        let header = self.header()?;
        if header.data_sz == 0 || header.data.is_null() {
            return Ok(&[]);
        }
        // SAFETY: liboni guarantees data_sz readable bytes at data while the
        // frame is live, and the returned slice borrows self.
        Ok(unsafe {
            std::slice::from_raw_parts(header.data.cast::<u8>(), header.data_sz as usize)
        })
    }

    /// Copy the payload out as `payload_size / size_of::<T>()` samples
    pub fn extract<T: Sample>(&self) -> Result<Vec<T>> {
        let bytes = self.payload()?;
        let element = std::mem::size_of::<T>();
        if element == 0 || bytes.len() % element != 0 {
            return Err(Error::PayloadShape {
                size: bytes.len(),
                element,
            });
        }

        let mut samples = vec![T::new_zeroed(); bytes.len() / element];
        samples.as_mut_slice().as_mut_bytes().copy_from_slice(bytes);
        Ok(samples)
    }

    /// Return the frame to liboni. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: taken out of self, so this is the only destroy.
            unsafe { self.backend.destroy_frame(raw.as_ptr()) };
            self.ledger.retract(self.accounted);
            trace!(bytes = self.accounted, "Released frame");
        }
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_none()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header() {
            Ok(h) => f
                .debug_struct("Frame")
                .field("time", &h.time)
                .field("device", &format_args!("0x{:X}", h.dev_idx))
                .field("size", &h.data_sz)
                .finish(),
            Err(_) => f.write_str("Frame(released)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;
    use crate::Context;

    fn open() -> (Arc<SimBackend>, Context) {
        let sim = Arc::new(SimBackend::new());
        let ctx = Context::with_backend(sim.clone(), "test", 0).unwrap();
        (sim, ctx)
    }

    #[test]
    fn test_read_frame_header() {
        let (_sim, ctx) = open();
        ctx.start(true).unwrap();

        let frame = ctx.read_frame().unwrap();
        let device = ctx.device_table().unwrap()[&frame.device_address().unwrap()];
        assert_eq!(frame.payload_size().unwrap(), device.read_size);
        assert_eq!(frame.payload().unwrap().len(), device.read_size as usize);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (sim, ctx) = open();
        ctx.start(false).unwrap();

        let mut frame = ctx.read_frame().unwrap();
        assert_eq!(sim.live_frames(), 1);
        assert_eq!(ctx.outstanding_frames(), 1);

        frame.release();
        frame.release();
        assert!(frame.is_released());
        assert_eq!(sim.live_frames(), 0);
        assert_eq!(sim.destroyed_frames(), 1);
        assert_eq!(ctx.outstanding_frames(), 0);
        assert_eq!(ctx.outstanding_frame_bytes(), 0);

        drop(frame);
        assert_eq!(sim.destroyed_frames(), 1);
    }

    #[test]
    fn test_access_after_release_fails() {
        let (_sim, ctx) = open();
        ctx.start(false).unwrap();

        let mut frame = ctx.read_frame().unwrap();
        frame.release();
        assert!(matches!(frame.timestamp(), Err(Error::FrameReleased)));
        assert!(matches!(frame.payload(), Err(Error::FrameReleased)));
        assert!(matches!(frame.extract::<u16>(), Err(Error::FrameReleased)));
    }

    #[test]
    fn test_extract_preserves_bytes() {
        let (_sim, ctx) = open();
        ctx.start(false).unwrap();

        let frame = ctx.read_frame().unwrap();
        let bytes = frame.payload().unwrap().to_vec();

        let words: Vec<u16> = frame.extract().unwrap();
        assert_eq!(words.len(), bytes.len() / 2);
        assert_eq!(words.as_bytes(), bytes.as_slice());

        let raw: Vec<u8> = frame.extract().unwrap();
        assert_eq!(raw, bytes);
    }

    #[test]
    fn test_extract_requires_divisible_size() {
        let sim = Arc::new(SimBackend::with_devices(vec![crate::sim::SimDevice::new(
            0x0100, 10, 1, 12, 0,
        )]));
        let ctx = Context::with_backend(sim, "test", 0).unwrap();
        ctx.start(false).unwrap();

        let frame = ctx.read_frame().unwrap();
        assert_eq!(frame.payload_size().unwrap(), 12);
        assert_eq!(frame.extract::<u32>().unwrap().len(), 3);
        assert!(matches!(
            frame.extract::<u64>(),
            Err(Error::PayloadShape {
                size: 12,
                element: 8
            })
        ));
    }

    #[test]
    fn test_frame_outlives_context() {
        let (sim, mut ctx) = open();
        ctx.start(false).unwrap();

        let frame = ctx.read_frame().unwrap();
        ctx.release().unwrap();
        assert!(frame.timestamp().is_ok());

        drop(frame);
        assert_eq!(sim.live_frames(), 0);
    }
}

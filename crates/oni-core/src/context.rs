//! Acquisition context
//!
//! A [`Context`] owns one native handle together with the metadata read from
//! it: clock rates, frame size limits and the device table. The metadata is
//! loaded as a whole at construction and on [`Context::refresh`]; callers
//! never see a partially populated snapshot.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::{Arc, RwLock};

use libc::{c_char, c_int};
use oni_sys::{oni_ctx, oni_ctx_impl};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use zerocopy::IntoBytes;

use crate::backend::{Backend, OptionScope};
use crate::device::{self, Device, DeviceTable};
use crate::error::{check, check_size, Error, Result};
use crate::frame::{Frame, FrameLedger, Sample};
use crate::option::{ContextOption, OptionId, OptionValue, Options};
use crate::version::LibraryVersion;

/// Let the driver pick the physical device
pub const DEFAULT_HOST_INDEX: i32 = -1;

/// `RESETACQCOUNTER` values
const RESET_COUNTER: u32 = 1;
const RESET_COUNTER_AND_RUN: u32 = 2;

/// Metadata loaded from a live context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub system_clock_hz: u32,
    pub acquisition_clock_hz: u32,
    pub max_read_frame_size: u32,
    pub max_write_frame_size: u32,
    pub devices: DeviceTable,
}

/// Hardware translation driver identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
    pub pre_release: Option<String>,
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}.{}", self.name, self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

struct RawContext(NonNull<oni_ctx_impl>);

// SAFETY: liboni contexts may be used from any thread; access is gated by the
// lock in ContextHandle.
unsafe impl Send for RawContext {}
unsafe impl Sync for RawContext {}

/// Shared between a context and its halt handles
struct ContextHandle {
    backend: Arc<dyn Backend>,
    raw: RwLock<Option<RawContext>>,
}

impl ContextHandle {
    /// Run `f` with the live handle. Release waits for `f` to return.
    fn with<T>(&self, f: impl FnOnce(oni_ctx) -> Result<T>) -> Result<T> {
        let guard = self.raw.read().unwrap_or_else(|e| e.into_inner());
        let raw = guard.as_ref().ok_or(Error::Released)?;
        f(raw.0.as_ptr())
    }

    fn options(&self, ctx: oni_ctx) -> Options<'_> {
        Options::new(&self.backend, ctx)
    }

    fn set_running(&self, running: bool) -> Result<()> {
        self.with(|ctx| {
            self.options(ctx).set(
                ContextOption::Running.into(),
                &u32::from(running),
                OptionScope::Context,
            )
        })
    }

    fn release(&self) -> Result<()> {
        let mut guard = self.raw.write().unwrap_or_else(|e| e.into_inner());
        let Some(raw) = guard.take() else {
            return Ok(());
        };
        // SAFETY: taken out of the slot, so this is the only destroy.
        let rc = unsafe { self.backend.destroy_context(raw.0.as_ptr()) };
        check(rc, &self.backend)?;
        debug!("Released acquisition context");
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.raw.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release acquisition context");
        }
    }
}

/// Stops acquisition on a context from another thread.
///
/// This is the only operation that may run concurrently with the owner of
/// the context; it is how a blocking [`Context::read_frame`] is broken out of.
#[derive(Clone)]
pub struct HaltHandle {
    handle: Arc<ContextHandle>,
}

impl HaltHandle {
    /// Issue the halt directive. Fails with [`Error::Released`] once the
    /// context is gone.
    pub fn stop(&self) -> Result<()> {
        self.handle.set_running(false)?;
        debug!("Halted acquisition");
        Ok(())
    }
}

impl fmt::Debug for HaltHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaltHandle")
            .field("released", &self.handle.is_released())
            .finish()
    }
}

/// One open session with the acquisition hardware
pub struct Context {
    handle: Arc<ContextHandle>,
    info: Option<ContextInfo>,
    ledger: Arc<FrameLedger>,
    // Send, but calls must be serialized by the owner
    _not_sync: PhantomData<Cell<()>>,
}

impl Context {
    /// Open a context through the installed liboni
    #[cfg(feature = "liboni")]
    pub fn new(driver: &str, index: i32) -> Result<Self> {
        Self::with_backend(Arc::new(crate::LibOni), driver, index)
    }

    /// Create, initialize and load a context on `backend`
    pub fn with_backend(backend: Arc<dyn Backend>, driver: &str, index: i32) -> Result<Self> {
        let version = backend.version().ensure_supported()?;

        let selector =
            CString::new(driver).map_err(|_| Error::InvalidDriver(driver.to_string()))?;
        let raw = NonNull::new(backend.create_context(&selector))
            .ok_or_else(|| Error::InvalidDriver(driver.to_string()))?;

        // From here on the handle is destroyed on every exit path
        let handle = Arc::new(ContextHandle {
            backend,
            raw: RwLock::new(Some(RawContext(raw))),
        });

        handle.with(|ctx| {
            // SAFETY: ctx was just created by this backend.
            let rc = unsafe { handle.backend.init_context(ctx, index) };
            check(rc, &handle.backend)
        })?;

        let info = handle.with(|ctx| load_info(&handle.backend, ctx))?;
        debug!(
            driver,
            index,
            %version,
            devices = info.devices.len(),
            "Opened acquisition context"
        );

        Ok(Self {
            handle,
            info: Some(info),
            ledger: Arc::new(FrameLedger::default()),
            _not_sync: PhantomData,
        })
    }

    pub fn library_version(&self) -> LibraryVersion {
        self.handle.backend.version()
    }

    /// Cached metadata
    pub fn info(&self) -> Result<&ContextInfo> {
        if self.handle.is_released() {
            return Err(Error::Released);
        }
        self.info.as_ref().ok_or(Error::MetadataUnavailable)
    }

    pub fn device_table(&self) -> Result<&DeviceTable> {
        Ok(&self.info()?.devices)
    }

    pub fn device(&self, address: u32) -> Result<Option<&Device>> {
        Ok(self.device_table()?.get(&address))
    }

    pub fn system_clock_hz(&self) -> Result<u32> {
        Ok(self.info()?.system_clock_hz)
    }

    pub fn acquisition_clock_hz(&self) -> Result<u32> {
        Ok(self.info()?.acquisition_clock_hz)
    }

    pub fn max_read_frame_size(&self) -> Result<u32> {
        Ok(self.info()?.max_read_frame_size)
    }

    pub fn max_write_frame_size(&self) -> Result<u32> {
        Ok(self.info()?.max_write_frame_size)
    }

    /// Reset the hardware and reload all metadata.
    ///
    /// On failure the metadata stays unavailable until a later refresh
    /// succeeds.
    pub fn refresh(&mut self) -> Result<()> {
        self.info = None;
        self.set_option(ContextOption::Reset, &1u32, OptionScope::Context)?;

        let info = self.handle.with(|ctx| load_info(&self.handle.backend, ctx))?;
        debug!(devices = info.devices.len(), "Refreshed device table");
        self.info = Some(info);
        Ok(())
    }

    /// Start acquisition. With `reset_clock`, zeroing the acquisition clock
    /// and starting are sent as one directive.
    pub fn start(&self, reset_clock: bool) -> Result<()> {
        if reset_clock {
            self.set_option(
                ContextOption::ResetAcquisitionCounter,
                &RESET_COUNTER_AND_RUN,
                OptionScope::Context,
            )?;
        } else {
            self.handle.set_running(true)?;
        }
        debug!(reset_clock, "Started acquisition");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.handle.set_running(false)?;
        debug!("Stopped acquisition");
        Ok(())
    }

    /// Zero the acquisition clock without touching the run state
    pub fn reset_frame_clock(&self) -> Result<()> {
        self.set_option(
            ContextOption::ResetAcquisitionCounter,
            &RESET_COUNTER,
            OptionScope::Context,
        )
    }

    pub fn running(&self) -> Result<bool> {
        let value: i32 = self.get_option(ContextOption::Running, OptionScope::Context)?;
        Ok(value > 0)
    }

    /// Role of this host in a multi-host synchronization topology
    pub fn hardware_address(&self) -> Result<u32> {
        self.get_option(ContextOption::HardwareAddress, OptionScope::Context)
    }

    pub fn set_hardware_address(&self, address: u32) -> Result<()> {
        self.set_option(ContextOption::HardwareAddress, &address, OptionScope::Context)
    }

    pub fn block_read_size(&self) -> Result<u32> {
        self.get_option(ContextOption::BlockReadSize, OptionScope::Context)
    }

    /// Not validated here; liboni rejects sizes below the maximum read frame
    pub fn set_block_read_size(&self, size: u32) -> Result<()> {
        self.set_option(ContextOption::BlockReadSize, &size, OptionScope::Context)
    }

    pub fn block_write_size(&self) -> Result<u32> {
        self.get_option(ContextOption::BlockWriteSize, OptionScope::Context)
    }

    pub fn set_block_write_size(&self, size: u32) -> Result<()> {
        self.set_option(ContextOption::BlockWriteSize, &size, OptionScope::Context)
    }

    /// Read any option as `T`
    pub fn get_option<T: OptionValue>(
        &self,
        option: impl Into<OptionId>,
        scope: OptionScope,
    ) -> Result<T> {
        let option = option.into();
        self.handle
            .with(|ctx| self.handle.options(ctx).get(option, scope))
    }

    /// Write any option from `T`
    pub fn set_option<T: OptionValue>(
        &self,
        option: impl Into<OptionId>,
        value: &T,
        scope: OptionScope,
    ) -> Result<()> {
        let option = option.into();
        self.handle
            .with(|ctx| self.handle.options(ctx).set(option, value, scope))
    }

    pub fn get_int_option(&self, option: impl Into<OptionId>, scope: OptionScope) -> Result<i32> {
        self.get_option(option, scope)
    }

    pub fn set_int_option(
        &self,
        option: impl Into<OptionId>,
        value: i32,
        scope: OptionScope,
    ) -> Result<()> {
        self.set_option(option, &value, scope)
    }

    /// Strings longer than [`crate::STRING_OPTION_CAPACITY`] fail with
    /// [`Error::StringOverflow`]
    pub fn get_string_option(
        &self,
        option: impl Into<OptionId>,
        scope: OptionScope,
    ) -> Result<String> {
        self.get_option(option, scope)
    }

    pub fn set_string_option(
        &self,
        option: impl Into<OptionId>,
        value: &str,
        scope: OptionScope,
    ) -> Result<()> {
        self.set_option(option, &value.to_string(), scope)
    }

    /// Read an opaque block of at most `size` bytes
    pub fn get_block_option(
        &self,
        option: impl Into<OptionId>,
        size: usize,
        scope: OptionScope,
    ) -> Result<Vec<u8>> {
        let option = option.into();
        self.handle
            .with(|ctx| self.handle.options(ctx).get_block(option, size, scope))
    }

    /// Implementation-specific option `index`, counted from the custom base
    pub fn get_custom_option<T: OptionValue>(&self, index: c_int, scope: OptionScope) -> Result<T> {
        self.get_option(OptionId::custom(index), scope)
    }

    pub fn set_custom_option<T: OptionValue>(
        &self,
        index: c_int,
        value: &T,
        scope: OptionScope,
    ) -> Result<()> {
        self.set_option(OptionId::custom(index), value, scope)
    }

    pub fn read_register(&self, device: u32, register: u32) -> Result<u32> {
        self.handle.with(|ctx| {
            let mut value = 0;
            // SAFETY: ctx is live under the read lock and value is a local.
            let rc = unsafe {
                self.handle
                    .backend
                    .read_register(ctx, device, register, &mut value)
            };
            check(rc, &self.handle.backend)?;
            trace!(device, register, value, "Read register");
            Ok(value)
        })
    }

    pub fn write_register(&self, device: u32, register: u32, value: u32) -> Result<()> {
        self.handle.with(|ctx| {
            // SAFETY: ctx is live under the read lock.
            let rc = unsafe {
                self.handle
                    .backend
                    .write_register(ctx, device, register, value)
            };
            check(rc, &self.handle.backend)?;
            trace!(device, register, value, "Wrote register");
            Ok(())
        })
    }

    /// Block until the next frame arrives. The payload is not copied.
    pub fn read_frame(&self) -> Result<Frame> {
        self.handle.with(|ctx| {
            let backend = &self.handle.backend;
            let mut raw = ptr::null_mut();
            // SAFETY: ctx is live under the read lock and raw is a local.
            let rc = unsafe { backend.read_frame(ctx, &mut raw) };
            check_size(rc, backend)?;

            let raw = NonNull::new(raw).ok_or(Error::NullFrame)?;
            // SAFETY: a successful read hands ownership of raw to the caller.
            let frame =
                unsafe { Frame::from_raw(raw, Arc::clone(backend), Arc::clone(&self.ledger)) };
            trace!(?frame, "Read frame");
            Ok(frame)
        })
    }

    /// Send one value to `device`
    pub fn write<T: Sample>(&self, device: u32, value: T) -> Result<()> {
        self.write_bytes(device, value.as_bytes())
    }

    /// Send a run of values to `device` in one frame
    pub fn write_slice<T: Sample>(&self, device: u32, values: &[T]) -> Result<()> {
        self.write_bytes(device, values.as_bytes())
    }

    /// Send raw bytes to `device`. The transient frame is released whether or
    /// not the write succeeds.
    pub fn write_bytes(&self, device: u32, data: &[u8]) -> Result<()> {
        self.handle.with(|ctx| {
            let backend = &self.handle.backend;
            let mut raw = ptr::null_mut();
            // SAFETY: data is valid for data.len() bytes; liboni copies it.
            let rc = unsafe {
                backend.create_frame(
                    ctx,
                    &mut raw,
                    device,
                    data.as_ptr().cast_mut().cast(),
                    data.len(),
                )
            };
            check_size(rc, backend)?;

            let raw = NonNull::new(raw).ok_or(Error::NullFrame)?;
            // SAFETY: create_frame handed ownership of raw to us.
            let frame =
                unsafe { Frame::from_raw(raw, Arc::clone(backend), Arc::clone(&self.ledger)) };

            // SAFETY: frame came from this context and is live until dropped.
            let rc = unsafe { backend.write_frame(ctx, frame.as_ptr()?) };
            check_size(rc, backend)?;
            trace!(device, size = data.len(), "Wrote frame");
            Ok(())
        })
    }

    /// Translation driver name and version
    pub fn driver_info(&self) -> Result<Option<DriverInfo>> {
        self.handle.with(|ctx| {
            // SAFETY: ctx is live; the record lives as long as the context.
            let Some(info) = (unsafe { self.handle.backend.driver_info(ctx).as_ref() }) else {
                return Ok(None);
            };
            // SAFETY: both strings are nul-terminated or null.
            let name = unsafe { owned_string(info.name) }.unwrap_or_default();
            let pre_release =
                unsafe { owned_string(info.pre_release) }.filter(|s| !s.is_empty());
            Ok(Some(DriverInfo {
                name,
                major: info.major,
                minor: info.minor,
                patch: info.patch,
                pre_release,
            }))
        })
    }

    /// Handle that can stop acquisition from another thread
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle {
            handle: Arc::clone(&self.handle),
        }
    }

    /// Frames from this context that have not been released
    pub fn outstanding_frames(&self) -> usize {
        self.ledger.frames()
    }

    /// Payload bytes pinned by outstanding frames
    pub fn outstanding_frame_bytes(&self) -> usize {
        self.ledger.bytes()
    }

    /// Destroy the native handle. Later calls do nothing; frames already
    /// read stay valid.
    pub fn release(&mut self) -> Result<()> {
        self.info = None;
        self.handle.release()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release() {
            warn!(error = %e, "Failed to release acquisition context");
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("released", &self.is_released())
            .field("info", &self.info)
            .field("outstanding_frames", &self.outstanding_frames())
            .finish()
    }
}

fn load_info(backend: &Arc<dyn Backend>, ctx: oni_ctx) -> Result<ContextInfo> {
    let options = Options::new(backend, ctx);
    let scalar = |option: ContextOption| options.get::<u32>(option.into(), OptionScope::Context);

    let info = ContextInfo {
        system_clock_hz: scalar(ContextOption::SystemClockHz)?,
        acquisition_clock_hz: scalar(ContextOption::AcquisitionClockHz)?,
        max_read_frame_size: scalar(ContextOption::MaxReadFrameSize)?,
        max_write_frame_size: scalar(ContextOption::MaxWriteFrameSize)?,
        devices: device::populate(backend, ctx)?,
    };
    debug!(
        system_clock_hz = info.system_clock_hz,
        acquisition_clock_hz = info.acquisition_clock_hz,
        max_read_frame_size = info.max_read_frame_size,
        max_write_frame_size = info.max_write_frame_size,
        "Loaded context metadata"
    );
    Ok(info)
}

/// # Safety
/// `ptr` must be null or point at a nul-terminated string.
unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

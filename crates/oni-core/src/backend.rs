//! The native entry points, as a trait
//!
//! Every call into the acquisition library goes through [`Backend`]. The
//! methods keep the C shapes (raw handles, out-pointers, status returns) so
//! that the safe layer above is the only place where ownership and error
//! mapping happen. [`crate::sim::SimBackend`] emulates the library in-process;
//! `LibOni` (feature `liboni`) forwards to the real one.

use std::ffi::CStr;

use libc::{c_char, c_int, c_void, size_t};
use oni_sys::{oni_ctx, oni_driver_info_t, oni_frame_t};

use crate::version::LibraryVersion;

/// Which option namespace a get/set call addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionScope {
    /// Options defined by liboni itself (`oni_get_opt` / `oni_set_opt`)
    #[default]
    Context,
    /// Options defined by the hardware translation driver
    Driver,
}

/// Native acquisition library surface.
///
/// # Safety
///
/// Implementations receive raw handles previously returned by the same
/// backend. Callers must uphold the liboni contract for each method: handles
/// are live, out-pointers are valid for writes, and `value` buffers are at
/// least as large as the size they are paired with.
pub trait Backend: Send + Sync + 'static {
    /// Library version, `oni_version`
    fn version(&self) -> LibraryVersion;

    /// `oni_create_ctx`; null for an unknown driver
    fn create_context(&self, driver: &CStr) -> oni_ctx;

    /// `oni_init_ctx`
    ///
    /// # Safety
    /// `ctx` must be a live handle from [`Backend::create_context`].
    unsafe fn init_context(&self, ctx: oni_ctx, host_index: c_int) -> c_int;

    /// `oni_destroy_ctx`
    ///
    /// # Safety
    /// `ctx` must be live and is dangling afterwards when this returns 0.
    unsafe fn destroy_context(&self, ctx: oni_ctx) -> c_int;

    /// `oni_get_opt` / `oni_get_driver_opt`
    ///
    /// # Safety
    /// `value` must be valid for `*len` bytes of writes.
    unsafe fn get_option(
        &self,
        ctx: oni_ctx,
        scope: OptionScope,
        option: c_int,
        value: *mut c_void,
        len: *mut size_t,
    ) -> c_int;

    /// `oni_set_opt` / `oni_set_driver_opt`
    ///
    /// # Safety
    /// `value` must be valid for `len` bytes of reads.
    unsafe fn set_option(
        &self,
        ctx: oni_ctx,
        scope: OptionScope,
        option: c_int,
        value: *const c_void,
        len: size_t,
    ) -> c_int;

    /// `oni_read_reg`
    ///
    /// # Safety
    /// `ctx` must be live and `value` valid for writes.
    unsafe fn read_register(
        &self,
        ctx: oni_ctx,
        device: u32,
        register: u32,
        value: *mut u32,
    ) -> c_int;

    /// `oni_write_reg`
    ///
    /// # Safety
    /// `ctx` must be live.
    unsafe fn write_register(&self, ctx: oni_ctx, device: u32, register: u32, value: u32)
        -> c_int;

    /// `oni_read_frame`; blocks until a frame is available.
    /// Returns a negative status or the total frame size.
    ///
    /// # Safety
    /// `ctx` must be live and `frame` valid for writes.
    unsafe fn read_frame(&self, ctx: oni_ctx, frame: *mut *mut oni_frame_t) -> c_int;

    /// `oni_create_frame`; copies `data_sz` bytes from `data`.
    ///
    /// # Safety
    /// `data` must be valid for `data_sz` bytes of reads.
    unsafe fn create_frame(
        &self,
        ctx: oni_ctx,
        frame: *mut *mut oni_frame_t,
        device: u32,
        data: *mut c_void,
        data_sz: size_t,
    ) -> c_int;

    /// `oni_write_frame`
    ///
    /// # Safety
    /// `frame` must come from [`Backend::create_frame`] on the same context.
    unsafe fn write_frame(&self, ctx: oni_ctx, frame: *const oni_frame_t) -> c_int;

    /// `oni_destroy_frame`
    ///
    /// # Safety
    /// `frame` must be live; it is dangling afterwards.
    unsafe fn destroy_frame(&self, frame: *mut oni_frame_t);

    /// `oni_get_driver_info`; the record lives as long as the context
    ///
    /// # Safety
    /// `ctx` must be live.
    unsafe fn driver_info(&self, ctx: oni_ctx) -> *const oni_driver_info_t;

    /// `oni_error_str`; returns a static string
    fn error_str(&self, code: c_int) -> *const c_char;
}

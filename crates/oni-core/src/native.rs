//! Backend that forwards to the installed liboni

use std::ffi::CStr;
use std::sync::OnceLock;

use libc::{c_char, c_int, c_void, size_t};
use oni_sys::{oni_ctx, oni_driver_info_t, oni_frame_t};
use tracing::debug;

use crate::backend::{Backend, OptionScope};
use crate::version::LibraryVersion;

/// Read once per process
static LIBRARY_VERSION: OnceLock<LibraryVersion> = OnceLock::new();

/// The real liboni, linked through `oni-sys`
#[derive(Debug, Clone, Copy, Default)]
pub struct LibOni;

impl Backend for LibOni {
    fn version(&self) -> LibraryVersion {
        *LIBRARY_VERSION.get_or_init(|| {
            let (mut major, mut minor, mut patch) = (0, 0, 0);
            unsafe { oni_sys::oni_version(&mut major, &mut minor, &mut patch) };
            let version = LibraryVersion::new(major, minor, patch);
            debug!(version = %version, "Loaded liboni");
            version
        })
    }

    fn create_context(&self, driver: &CStr) -> oni_ctx {
        unsafe { oni_sys::oni_create_ctx(driver.as_ptr()) }
    }

    unsafe fn init_context(&self, ctx: oni_ctx, host_index: c_int) -> c_int {
        oni_sys::oni_init_ctx(ctx, host_index)
    }

    unsafe fn destroy_context(&self, ctx: oni_ctx) -> c_int {
        oni_sys::oni_destroy_ctx(ctx)
    }

    unsafe fn get_option(
        &self,
        ctx: oni_ctx,
        scope: OptionScope,
        option: c_int,
        value: *mut c_void,
        len: *mut size_t,
    ) -> c_int {
        match scope {
            OptionScope::Context => oni_sys::oni_get_opt(ctx, option, value, len),
            OptionScope::Driver => oni_sys::oni_get_driver_opt(ctx, option, value, len),
        }
    }

    unsafe fn set_option(
        &self,
        ctx: oni_ctx,
        scope: OptionScope,
        option: c_int,
        value: *const c_void,
        len: size_t,
    ) -> c_int {
        match scope {
            OptionScope::Context => oni_sys::oni_set_opt(ctx, option, value, len),
            OptionScope::Driver => oni_sys::oni_set_driver_opt(ctx, option, value, len),
        }
    }

    unsafe fn read_register(
        &self,
        ctx: oni_ctx,
        device: u32,
        register: u32,
        value: *mut u32,
    ) -> c_int {
        oni_sys::oni_read_reg(ctx, device, register, value)
    }

    unsafe fn write_register(
        &self,
        ctx: oni_ctx,
        device: u32,
        register: u32,
        value: u32,
    ) -> c_int {
        oni_sys::oni_write_reg(ctx, device, register, value)
    }

    unsafe fn read_frame(&self, ctx: oni_ctx, frame: *mut *mut oni_frame_t) -> c_int {
        oni_sys::oni_read_frame(ctx, frame)
    }

    unsafe fn create_frame(
        &self,
        ctx: oni_ctx,
        frame: *mut *mut oni_frame_t,
        device: u32,
        data: *mut c_void,
        data_sz: size_t,
    ) -> c_int {
        oni_sys::oni_create_frame(ctx, frame, device, data, data_sz)
    }

    unsafe fn write_frame(&self, ctx: oni_ctx, frame: *const oni_frame_t) -> c_int {
        oni_sys::oni_write_frame(ctx, frame)
    }

    unsafe fn destroy_frame(&self, frame: *mut oni_frame_t) {
        oni_sys::oni_destroy_frame(frame)
    }

    unsafe fn driver_info(&self, ctx: oni_ctx) -> *const oni_driver_info_t {
        oni_sys::oni_get_driver_info(ctx)
    }

    fn error_str(&self, code: c_int) -> *const c_char {
        // liboni asserts on codes outside its table
        if code > 0 || code <= oni_sys::ONI_MINERRORNUM {
            return std::ptr::null();
        }
        unsafe { oni_sys::oni_error_str(code) }
    }
}

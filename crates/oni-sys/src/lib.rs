//! ONI Sys - Raw declarations of the liboni C API
//!
//! This crate mirrors `oni.h` and `onidefs.h`:
//! - Opaque context type and the public frame, device and driver-info records
//! - Reserved context option numbers
//! - Native status codes
//! - The `extern "C"` entry points (only with the `link` feature)
//!
//! Nothing here is safe to use directly; `oni-core` wraps it.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int};

/// Opaque acquisition context owned by liboni
#[repr(C)]
pub struct oni_ctx_impl {
    _private: [u8; 0],
}

/// Handle to an acquisition context
pub type oni_ctx = *mut oni_ctx_impl;

/// Fully-qualified `rsv.rsv.hub.idx` device address
pub type oni_dev_idx_t = u32;
/// Register address within a device
pub type oni_reg_addr_t = u32;
/// Register value
pub type oni_reg_val_t = u32;
/// Size type used for frame and table sizes
pub type oni_size_t = u32;

/// Public portion of a frame produced by `oni_read_frame` or `oni_create_frame`
#[repr(C)]
#[derive(Debug)]
pub struct oni_frame_t {
    /// Frame time in acquisition clock ticks
    pub time: u64,
    /// Address of the device that produced (or will consume) the frame
    pub dev_idx: oni_dev_idx_t,
    /// Size in bytes of `data`
    pub data_sz: oni_size_t,
    /// Payload, owned by liboni
    pub data: *mut c_char,
}

/// Device table entry, byte-packed on the wire
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct oni_device_t {
    pub idx: oni_dev_idx_t,
    pub id: i32,
    pub version: u32,
    pub read_size: u32,
    pub write_size: u32,
}

/// Driver translator information
#[repr(C)]
#[derive(Debug)]
pub struct oni_driver_info_t {
    pub name: *const c_char,
    pub major: c_int,
    pub minor: c_int,
    pub patch: c_int,
    pub pre_release: *const c_char,
}

// Context options
pub const ONI_OPT_DEVICETABLE: c_int = 0;
pub const ONI_OPT_NUMDEVICES: c_int = 1;
pub const ONI_OPT_RUNNING: c_int = 2;
pub const ONI_OPT_RESET: c_int = 3;
pub const ONI_OPT_SYSCLKHZ: c_int = 4;
pub const ONI_OPT_ACQCLKHZ: c_int = 5;
pub const ONI_OPT_RESETACQCOUNTER: c_int = 6;
pub const ONI_OPT_HWADDRESS: c_int = 7;
pub const ONI_OPT_MAXREADFRAMESIZE: c_int = 8;
pub const ONI_OPT_MAXWRITEFRAMESIZE: c_int = 9;
pub const ONI_OPT_BLOCKREADSIZE: c_int = 10;
pub const ONI_OPT_BLOCKWRITESIZE: c_int = 11;
pub const ONI_OPT_CUSTOMBEGIN: c_int = 12;

// Status codes
pub const ONI_ESUCCESS: c_int = 0;
pub const ONI_EPATHINVALID: c_int = -1;
pub const ONI_EDEVID: c_int = -2;
pub const ONI_EDEVIDX: c_int = -3;
pub const ONI_EWRITESIZE: c_int = -4;
pub const ONI_EREADFAILURE: c_int = -5;
pub const ONI_EWRITEFAILURE: c_int = -6;
pub const ONI_ENULLCTX: c_int = -7;
pub const ONI_ESEEKFAILURE: c_int = -8;
pub const ONI_EINVALSTATE: c_int = -9;
pub const ONI_EINVALOPT: c_int = -10;
pub const ONI_EINVALARG: c_int = -11;
pub const ONI_ECOBSPACK: c_int = -12;
pub const ONI_ERETRIG: c_int = -13;
pub const ONI_EBUFFERSIZE: c_int = -14;
pub const ONI_EBADDEVTABLE: c_int = -15;
pub const ONI_EBADALLOC: c_int = -16;
pub const ONI_ECLOSEFAIL: c_int = -17;
pub const ONI_EREADONLY: c_int = -18;
pub const ONI_EUNIMPL: c_int = -19;
pub const ONI_EINVALREADSIZE: c_int = -20;
pub const ONI_ENOREADDEV: c_int = -21;
pub const ONI_EINIT: c_int = -22;
pub const ONI_EWRITEONLY: c_int = -23;
pub const ONI_EINVALWRITESIZE: c_int = -24;
pub const ONI_ENOTWRITEDEV: c_int = -25;
pub const ONI_EDEVIDXREPEAT: c_int = -26;
pub const ONI_EPROTCONFIG: c_int = -27;
pub const ONI_EBADFRAME: c_int = -28;
pub const ONI_MINERRORNUM: c_int = -29;

#[cfg(feature = "link")]
extern "C" {
    pub fn oni_version(major: *mut c_int, minor: *mut c_int, patch: *mut c_int);
    pub fn oni_create_ctx(drv_name: *const c_char) -> oni_ctx;
    pub fn oni_init_ctx(ctx: oni_ctx, host_idx: c_int) -> c_int;
    pub fn oni_destroy_ctx(ctx: oni_ctx) -> c_int;
    pub fn oni_get_opt(
        ctx: oni_ctx,
        ctx_opt: c_int,
        value: *mut libc::c_void,
        option_len: *mut libc::size_t,
    ) -> c_int;
    pub fn oni_set_opt(
        ctx: oni_ctx,
        ctx_opt: c_int,
        value: *const libc::c_void,
        option_len: libc::size_t,
    ) -> c_int;
    pub fn oni_get_driver_opt(
        ctx: oni_ctx,
        drv_opt: c_int,
        value: *mut libc::c_void,
        option_len: *mut libc::size_t,
    ) -> c_int;
    pub fn oni_set_driver_opt(
        ctx: oni_ctx,
        drv_opt: c_int,
        value: *const libc::c_void,
        option_len: libc::size_t,
    ) -> c_int;
    pub fn oni_read_reg(
        ctx: oni_ctx,
        dev_idx: oni_dev_idx_t,
        addr: oni_reg_addr_t,
        value: *mut oni_reg_val_t,
    ) -> c_int;
    pub fn oni_write_reg(
        ctx: oni_ctx,
        dev_idx: oni_dev_idx_t,
        addr: oni_reg_addr_t,
        value: oni_reg_val_t,
    ) -> c_int;
    pub fn oni_read_frame(ctx: oni_ctx, frame: *mut *mut oni_frame_t) -> c_int;
    pub fn oni_create_frame(
        ctx: oni_ctx,
        frame: *mut *mut oni_frame_t,
        dev_idx: oni_dev_idx_t,
        data: *mut libc::c_void,
        data_sz: libc::size_t,
    ) -> c_int;
    pub fn oni_write_frame(ctx: oni_ctx, frame: *const oni_frame_t) -> c_int;
    pub fn oni_destroy_frame(frame: *mut oni_frame_t);
    pub fn oni_get_driver_info(ctx: oni_ctx) -> *const oni_driver_info_t;
    pub fn oni_error_str(err: c_int) -> *const c_char;
}

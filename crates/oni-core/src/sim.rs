//! In-process ONI controller
//!
//! [`SimBackend`] answers the native call surface without hardware: a device
//! table with per-device registers, one hub manager per hub, the reserved
//! context options, custom and driver options, and frame synthesis while
//! running. Counters expose what the safe layer did to it (live handles,
//! option directives, written frames) so tests can observe resource
//! accounting and protocol-level differences.

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use libc::{c_char, c_int, c_void, size_t};
use oni_sys::*;
use tracing::trace;

use crate::backend::{Backend, OptionScope};
use crate::device::{encode_table, Device};
use crate::hub::{self, HUB_MANAGER_INDEX};
use crate::version::LibraryVersion;

/// Driver selector the simulator answers to
pub const SIM_DRIVER: &str = "test";

const DEVICE_ID_TEST0: i32 = 10;
const DEFAULT_CLOCK_HZ: u32 = 200_000_000;
const DEFAULT_BLOCK_SIZE: u32 = 1024;
const TICKS_PER_FRAME: u64 = 200;

const REG_ENABLE: u32 = 0;
const REG_MESSAGE: u32 = 1;
const REG_DUMMY_WORDS: u32 = 2;
const REG_FRAME_RATE: u32 = 3;

const SIM_DRIVER_NAME: &CStr = c"test";
const SIM_DRIVER_PRE_RELEASE: &CStr = c"sim";

#[derive(Debug, Clone, Copy)]
struct Register {
    value: u32,
    writable: bool,
}

/// One simulated device and its register file
#[derive(Debug, Clone)]
pub struct SimDevice {
    device: Device,
    registers: BTreeMap<u32, Register>,
    faults: BTreeMap<u32, c_int>,
}

impl SimDevice {
    pub fn new(address: u32, id: i32, version: u32, read_size: u32, write_size: u32) -> Self {
        let device = Device {
            address,
            id,
            version,
            read_size,
            write_size,
        };
        let registers = BTreeMap::from([
            (REG_ENABLE, Register { value: 1, writable: true }),
            (REG_MESSAGE, Register { value: 0, writable: true }),
            (
                REG_DUMMY_WORDS,
                Register {
                    value: read_size / 2,
                    writable: false,
                },
            ),
            (REG_FRAME_RATE, Register { value: 0, writable: false }),
        ]);
        Self {
            device,
            registers,
            faults: BTreeMap::new(),
        }
    }

    /// Add or replace a register
    pub fn with_register(mut self, register: u32, value: u32, writable: bool) -> Self {
        self.registers.insert(register, Register { value, writable });
        self
    }

    /// Make every access to `register` fail with the native status `code`
    pub fn with_fault(mut self, register: u32, code: c_int) -> Self {
        self.faults.insert(register, code);
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// A successful option set, as the native side saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDirective {
    pub scope: OptionScope,
    pub option: c_int,
    pub value: Vec<u8>,
}

impl OptionDirective {
    /// The value as a register-width integer, if it is one
    pub fn as_u32(&self) -> Option<u32> {
        self.value.as_slice().try_into().ok().map(u32::from_ne_bytes)
    }
}

/// Payload handed to `write_frame`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFrame {
    pub device: u32,
    pub data: Vec<u8>,
}

/// Frame allocation; the public header comes first so the two pointers coincide
#[repr(C)]
struct SimFrame {
    public: oni_frame_t,
    storage: Vec<u8>,
}

#[derive(Debug, Clone)]
struct HubManager {
    hardware_id: u32,
    hardware_revision: u32,
    firmware_version: u32,
    clock_hz: u32,
    delay_ns: u32,
    faults: BTreeMap<u32, c_int>,
}

impl HubManager {
    fn register(&self, register: u32) -> Result<u32, c_int> {
        if let Some(&code) = self.faults.get(&register) {
            return Err(code);
        }
        let value = match register {
            hub::REG_HARDWARE_ID => Some(self.hardware_id),
            hub::REG_HARDWARE_REVISION => Some(self.hardware_revision),
            hub::REG_FIRMWARE_VERSION => Some(self.firmware_version),
            hub::REG_CLOCK_HZ => Some(self.clock_hz),
            hub::REG_DELAY_NS => Some(self.delay_ns),
            _ => None,
        };
        value.ok_or(ONI_EREADFAILURE)
    }
}

#[derive(Debug)]
struct SimState {
    initialized: bool,
    running: bool,
    counter: u64,
    halt_epoch: u64,
    next_reader: usize,
    sequence: u32,
    hardware_address: u32,
    block_read_size: u32,
    block_write_size: u32,
    devices: Vec<SimDevice>,
    hubs: BTreeMap<u8, HubManager>,
    custom: BTreeMap<c_int, Vec<u8>>,
    driver: BTreeMap<c_int, Vec<u8>>,
}

impl SimState {
    fn device(&self, address: u32) -> Option<&SimDevice> {
        self.devices.iter().find(|d| d.device.address == address)
    }

    fn device_mut(&mut self, address: u32) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.device.address == address)
    }

    fn max_read_size(&self) -> u32 {
        self.devices.iter().map(|d| d.device.read_size).max().unwrap_or(0)
    }

    fn max_write_size(&self) -> u32 {
        self.devices.iter().map(|d| d.device.write_size).max().unwrap_or(0)
    }

    fn stop(&mut self) {
        self.running = false;
        self.halt_epoch += 1;
    }
}

/// Answer forced onto a context option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionOverride {
    Fail(c_int),
    Value(u32),
}

fn hub_managers(
    devices: &[SimDevice],
    faults: &[(u8, u32, c_int)],
) -> BTreeMap<u8, HubManager> {
    let mut hubs: BTreeMap<u8, HubManager> = BTreeMap::new();
    for device in devices {
        let address = device.device.hub();
        hubs.entry(address).or_insert_with(|| HubManager {
            hardware_id: 5,
            hardware_revision: 0x0102,
            firmware_version: 1600,
            clock_hz: (address as u32 + 1) * 50_000_000,
            delay_ns: 628,
            faults: BTreeMap::new(),
        });
    }
    for &(hub, register, code) in faults {
        if let Some(manager) = hubs.get_mut(&hub) {
            manager.faults.insert(register, code);
        }
    }
    hubs
}

struct SimContext {
    state: Mutex<SimState>,
    wake: Condvar,
}

impl SimContext {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Emulated acquisition library
pub struct SimBackend {
    devices: Vec<SimDevice>,
    version: LibraryVersion,
    init_status: c_int,
    hub_faults: Vec<(u8, u32, c_int)>,
    live_contexts: AtomicUsize,
    live_frames: AtomicUsize,
    destroyed_frames: AtomicUsize,
    option_log: Mutex<Vec<OptionDirective>>,
    written: Mutex<Vec<WrittenFrame>>,
    pending_devices: Mutex<Option<Vec<SimDevice>>>,
    overrides: Mutex<BTreeMap<c_int, OptionOverride>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// Four test devices, each alone on its own hub
    pub fn new() -> Self {
        let devices = (0..4u32)
            .map(|i| SimDevice::new(i << 8, DEVICE_ID_TEST0, 1, 12 + 4 * i, 32))
            .collect();
        Self::with_devices(devices)
    }

    pub fn with_devices(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            version: LibraryVersion::new(4, 4, 0),
            init_status: ONI_ESUCCESS,
            hub_faults: Vec::new(),
            live_contexts: AtomicUsize::new(0),
            live_frames: AtomicUsize::new(0),
            destroyed_frames: AtomicUsize::new(0),
            option_log: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            pending_devices: Mutex::new(None),
            overrides: Mutex::new(BTreeMap::new()),
        }
    }

    /// Report a different library version
    pub fn with_version(mut self, version: LibraryVersion) -> Self {
        self.version = version;
        self
    }

    /// Make `init_context` return `code`
    pub fn with_init_status(mut self, code: c_int) -> Self {
        self.init_status = code;
        self
    }

    /// Make reads of manager register `register` on `hub` fail with `code`
    pub fn with_hub_fault(mut self, hub: u8, register: u32, code: c_int) -> Self {
        self.hub_faults.push((hub, register, code));
        self
    }

    /// Context handles created and not yet destroyed
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    /// Frames allocated and not yet destroyed
    pub fn live_frames(&self) -> usize {
        self.live_frames.load(Ordering::SeqCst)
    }

    pub fn destroyed_frames(&self) -> usize {
        self.destroyed_frames.load(Ordering::SeqCst)
    }

    /// Every successful option set, oldest first
    pub fn option_log(&self) -> Vec<OptionDirective> {
        self.option_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every frame passed to `write_frame`, oldest first
    pub fn written_frames(&self) -> Vec<WrittenFrame> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Topology that the next hardware reset on any context brings up
    pub fn set_pending_devices(&self, devices: Vec<SimDevice>) {
        *self
            .pending_devices
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(devices);
    }

    /// Make every get and set of context option `option` fail with `code`
    pub fn fail_option(&self, option: c_int, code: c_int) {
        self.lock_overrides()
            .insert(option, OptionOverride::Fail(code));
    }

    /// Make getters of context option `option` report `value`
    pub fn pin_option(&self, option: c_int, value: u32) {
        self.lock_overrides()
            .insert(option, OptionOverride::Value(value));
    }

    pub fn clear_option_overrides(&self) {
        self.lock_overrides().clear();
    }

    fn lock_overrides(&self) -> MutexGuard<'_, BTreeMap<c_int, OptionOverride>> {
        self.overrides.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn option_override(&self, scope: OptionScope, option: c_int) -> Option<OptionOverride> {
        match scope {
            OptionScope::Context => self.lock_overrides().get(&option).copied(),
            OptionScope::Driver => None,
        }
    }

    fn fresh_state(&self) -> SimState {
        let hubs = hub_managers(&self.devices, &self.hub_faults);
        let max_read = self.devices.iter().map(|d| d.device.read_size).max();
        let block = DEFAULT_BLOCK_SIZE.max(max_read.unwrap_or(0).next_multiple_of(4));

        SimState {
            initialized: false,
            running: false,
            counter: 0,
            halt_epoch: 0,
            next_reader: 0,
            sequence: 0,
            hardware_address: 0,
            block_read_size: block,
            block_write_size: block,
            devices: self.devices.clone(),
            hubs,
            custom: BTreeMap::new(),
            driver: BTreeMap::new(),
        }
    }

    fn allocate_frame(&self, time: u64, device: u32, mut storage: Vec<u8>) -> *mut oni_frame_t {
        let public = oni_frame_t {
            time,
            dev_idx: device,
            data_sz: storage.len() as u32,
            data: storage.as_mut_ptr().cast(),
        };
        self.live_frames.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(SimFrame { public, storage })).cast()
    }

    fn log_directive(&self, scope: OptionScope, option: c_int, value: &[u8]) {
        self.option_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(OptionDirective {
                scope,
                option,
                value: value.to_vec(),
            });
    }
}

/// # Safety
/// `ctx` must be a live handle from [`SimBackend::create_context`].
unsafe fn context<'a>(ctx: oni_ctx) -> Option<&'a SimContext> {
    ctx.cast::<SimContext>().as_ref()
}

/// Copy `bytes` out through a size-negotiated getter buffer
///
/// # Safety
/// `value` must be valid for `*len` bytes of writes.
unsafe fn answer(bytes: &[u8], value: *mut c_void, len: *mut size_t) -> c_int {
    if len.is_null() || value.is_null() {
        return ONI_EINVALARG;
    }
    if *len < bytes.len() {
        return ONI_EBUFFERSIZE;
    }
    ptr::copy_nonoverlapping(bytes.as_ptr(), value.cast::<u8>(), bytes.len());
    *len = bytes.len();
    ONI_ESUCCESS
}

fn word(bytes: &[u8]) -> Option<u32> {
    bytes.try_into().ok().map(u32::from_ne_bytes)
}

impl SimState {
    fn get_context_option(&self, option: c_int) -> Result<Vec<u8>, c_int> {
        let scalar = |v: u32| -> Result<Vec<u8>, c_int> { Ok(v.to_ne_bytes().to_vec()) };
        match option {
            ONI_OPT_DEVICETABLE => Ok(encode_table(self.devices.iter().map(|d| &d.device))),
            ONI_OPT_NUMDEVICES => scalar(self.devices.len() as u32),
            ONI_OPT_RUNNING => scalar(self.running as u32),
            ONI_OPT_RESET | ONI_OPT_RESETACQCOUNTER => Err(ONI_EWRITEONLY),
            ONI_OPT_SYSCLKHZ | ONI_OPT_ACQCLKHZ => scalar(DEFAULT_CLOCK_HZ),
            ONI_OPT_HWADDRESS => scalar(self.hardware_address),
            ONI_OPT_MAXREADFRAMESIZE => scalar(self.max_read_size()),
            ONI_OPT_MAXWRITEFRAMESIZE => scalar(self.max_write_size()),
            ONI_OPT_BLOCKREADSIZE => scalar(self.block_read_size),
            ONI_OPT_BLOCKWRITESIZE => scalar(self.block_write_size),
            custom if custom >= ONI_OPT_CUSTOMBEGIN => {
                self.custom.get(&custom).cloned().ok_or(ONI_EINVALOPT)
            }
            _ => Err(ONI_EINVALOPT),
        }
    }

    fn set_context_option(&mut self, option: c_int, bytes: &[u8]) -> Result<(), c_int> {
        if option >= ONI_OPT_CUSTOMBEGIN {
            self.custom.insert(option, bytes.to_vec());
            return Ok(());
        }

        match option {
            ONI_OPT_DEVICETABLE
            | ONI_OPT_NUMDEVICES
            | ONI_OPT_SYSCLKHZ
            | ONI_OPT_ACQCLKHZ
            | ONI_OPT_MAXREADFRAMESIZE
            | ONI_OPT_MAXWRITEFRAMESIZE => return Err(ONI_EREADONLY),
            ONI_OPT_RUNNING
            | ONI_OPT_RESET
            | ONI_OPT_RESETACQCOUNTER
            | ONI_OPT_HWADDRESS
            | ONI_OPT_BLOCKREADSIZE
            | ONI_OPT_BLOCKWRITESIZE => {}
            _ => return Err(ONI_EINVALOPT),
        }

        let value = word(bytes).ok_or(ONI_EBUFFERSIZE)?;
        match option {
            ONI_OPT_RUNNING if value != 0 => self.running = true,
            ONI_OPT_RUNNING => self.stop(),
            ONI_OPT_RESET => {
                if value != 0 {
                    self.stop();
                    self.counter = 0;
                }
            }
            ONI_OPT_RESETACQCOUNTER => match value {
                1 => self.counter = 0,
                2 => {
                    self.counter = 0;
                    self.running = true;
                }
                _ => return Err(ONI_EINVALARG),
            },
            ONI_OPT_HWADDRESS => self.hardware_address = value,
            ONI_OPT_BLOCKREADSIZE => {
                if self.running {
                    return Err(ONI_EINVALSTATE);
                }
                if value < self.max_read_size() || value % 4 != 0 {
                    return Err(ONI_EINVALREADSIZE);
                }
                self.block_read_size = value;
            }
            ONI_OPT_BLOCKWRITESIZE => {
                if self.running {
                    return Err(ONI_EINVALSTATE);
                }
                if value < self.max_write_size() || value % 4 != 0 {
                    return Err(ONI_EINVALWRITESIZE);
                }
                self.block_write_size = value;
            }
            _ => return Err(ONI_EINVALOPT),
        }
        Ok(())
    }

    fn read_register(&self, address: u32, register: u32) -> Result<u32, c_int> {
        if address & 0xFF == HUB_MANAGER_INDEX as u32 {
            return self
                .hubs
                .get(&hub::hub_sub_address(address))
                .ok_or(ONI_EREADFAILURE)
                .and_then(|m| m.register(register));
        }

        let device = self.device(address).ok_or(ONI_EDEVIDX)?;
        if let Some(&code) = device.faults.get(&register) {
            return Err(code);
        }
        device
            .registers
            .get(&register)
            .map(|r| r.value)
            .ok_or(ONI_EREADFAILURE)
    }

    fn write_register(&mut self, address: u32, register: u32, value: u32) -> Result<(), c_int> {
        if address & 0xFF == HUB_MANAGER_INDEX as u32 {
            // Hub managers are read-only
            if self.hubs.contains_key(&hub::hub_sub_address(address)) {
                return Err(ONI_EWRITEFAILURE);
            }
            return Err(ONI_EDEVIDX);
        }

        let device = self.device_mut(address).ok_or(ONI_EDEVIDX)?;
        if let Some(&code) = device.faults.get(&register) {
            return Err(code);
        }
        match device.registers.get_mut(&register) {
            Some(r) if r.writable => {
                r.value = value;
                Ok(())
            }
            _ => Err(ONI_EWRITEFAILURE),
        }
    }

    /// Next frame from the readable devices, in turn
    fn synthesize(&mut self) -> Option<(u64, u32, Vec<u8>)> {
        let readable: Vec<&Device> = self
            .devices
            .iter()
            .map(|d| &d.device)
            .filter(|d| d.is_readable())
            .collect();
        let device = **readable.get(self.next_reader % readable.len().max(1))?;
        self.next_reader = self.next_reader.wrapping_add(1);

        let time = self.counter;
        self.counter += TICKS_PER_FRAME;
        self.sequence = self.sequence.wrapping_add(1);

        let seed = self.sequence.to_le_bytes();
        let payload = (0..device.read_size as usize)
            .map(|i| seed[i % seed.len()].wrapping_add(i as u8))
            .collect();
        Some((time, device.address, payload))
    }
}

impl Backend for SimBackend {
    fn version(&self) -> LibraryVersion {
        self.version
    }

    fn create_context(&self, driver: &CStr) -> oni_ctx {
        if driver.to_bytes() != SIM_DRIVER.as_bytes() {
            return ptr::null_mut();
        }
        let ctx = Box::new(SimContext {
            state: Mutex::new(self.fresh_state()),
            wake: Condvar::new(),
        });
        self.live_contexts.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(ctx).cast()
    }

    unsafe fn init_context(&self, ctx: oni_ctx, host_index: c_int) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        if self.init_status != ONI_ESUCCESS {
            return self.init_status;
        }
        if host_index < -1 {
            return ONI_EINIT;
        }
        ctx.lock().initialized = true;
        ONI_ESUCCESS
    }

    unsafe fn destroy_context(&self, ctx: oni_ctx) -> c_int {
        if ctx.is_null() {
            return ONI_ENULLCTX;
        }
        drop(Box::from_raw(ctx.cast::<SimContext>()));
        self.live_contexts.fetch_sub(1, Ordering::SeqCst);
        ONI_ESUCCESS
    }

    unsafe fn get_option(
        &self,
        ctx: oni_ctx,
        scope: OptionScope,
        option: c_int,
        value: *mut c_void,
        len: *mut size_t,
    ) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        match self.option_override(scope, option) {
            Some(OptionOverride::Fail(code)) => return code,
            Some(OptionOverride::Value(v)) => return answer(&v.to_ne_bytes(), value, len),
            None => {}
        }

        let state = ctx.lock();
        let bytes = match scope {
            OptionScope::Context => state.get_context_option(option),
            OptionScope::Driver => state.driver.get(&option).cloned().ok_or(ONI_EINVALOPT),
        };
        match bytes {
            Ok(bytes) => answer(&bytes, value, len),
            Err(code) => code,
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
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        if value.is_null() && len > 0 {
            return ONI_EINVALARG;
        }
        let bytes = match len {
            0 => &[][..],
            n => std::slice::from_raw_parts(value.cast::<u8>(), n),
        };

        if let Some(OptionOverride::Fail(code)) = self.option_override(scope, option) {
            return code;
        }

        let mut state = ctx.lock();
        let rc = match scope {
            OptionScope::Context => state.set_context_option(option, bytes),
            OptionScope::Driver => {
                state.driver.insert(option, bytes.to_vec());
                Ok(())
            }
        };
        let reset = rc.is_ok()
            && scope == OptionScope::Context
            && option == ONI_OPT_RESET
            && word(bytes).is_some_and(|v| v != 0);
        if reset {
            let pending = self
                .pending_devices
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(devices) = pending {
                state.hubs = hub_managers(&devices, &self.hub_faults);
                state.devices = devices;
                state.next_reader = 0;
                let read = state.max_read_size().next_multiple_of(4);
                let write = state.max_write_size().next_multiple_of(4);
                state.block_read_size = state.block_read_size.max(read);
                state.block_write_size = state.block_write_size.max(write);
            }
        }
        drop(state);
        // Running may have changed
        ctx.wake.notify_all();

        match rc {
            Ok(()) => {
                self.log_directive(scope, option, bytes);
                ONI_ESUCCESS
            }
            Err(code) => code,
        }
    }

    unsafe fn read_register(
        &self,
        ctx: oni_ctx,
        device: u32,
        register: u32,
        value: *mut u32,
    ) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        if value.is_null() {
            return ONI_EINVALARG;
        }
        match ctx.lock().read_register(device, register) {
            Ok(v) => {
                *value = v;
                ONI_ESUCCESS
            }
            Err(code) => code,
        }
    }

    unsafe fn write_register(
        &self,
        ctx: oni_ctx,
        device: u32,
        register: u32,
        value: u32,
    ) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        match ctx.lock().write_register(device, register, value) {
            Ok(()) => ONI_ESUCCESS,
            Err(code) => code,
        }
    }

    unsafe fn read_frame(&self, ctx: oni_ctx, frame: *mut *mut oni_frame_t) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        if frame.is_null() {
            return ONI_EINVALARG;
        }

        let mut state = ctx.lock();
        if !state.initialized {
            return ONI_EINVALSTATE;
        }
        if state.max_read_size() == 0 {
            return ONI_ENOREADDEV;
        }

        // Block until running; a halt issued meanwhile aborts the read
        let epoch = state.halt_epoch;
        while !state.running {
            if state.halt_epoch != epoch {
                return ONI_EREADFAILURE;
            }
            state = ctx.wake.wait(state).unwrap_or_else(|e| e.into_inner());
        }

        let Some((time, device, payload)) = state.synthesize() else {
            return ONI_ENOREADDEV;
        };
        drop(state);

        let size = payload.len();
        *frame = self.allocate_frame(time, device, payload);
        trace!(device, size, "Simulated frame");
        (std::mem::size_of::<oni_frame_t>() + size) as c_int
    }

    unsafe fn create_frame(
        &self,
        ctx: oni_ctx,
        frame: *mut *mut oni_frame_t,
        device: u32,
        data: *mut c_void,
        data_sz: size_t,
    ) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        if frame.is_null() || (data.is_null() && data_sz > 0) {
            return ONI_EINVALARG;
        }

        let write_size = match ctx.lock().device(device) {
            Some(d) => d.device.write_size as usize,
            None => return ONI_EDEVIDX,
        };
        if write_size == 0 {
            return ONI_ENOTWRITEDEV;
        }
        if data_sz % write_size != 0 {
            return ONI_EWRITESIZE;
        }

        let storage = match data_sz {
            0 => Vec::new(),
            n => std::slice::from_raw_parts(data.cast::<u8>(), n).to_vec(),
        };
        *frame = self.allocate_frame(0, device, storage);
        (std::mem::size_of::<oni_frame_t>() + data_sz) as c_int
    }

    unsafe fn write_frame(&self, ctx: oni_ctx, frame: *const oni_frame_t) -> c_int {
        let Some(ctx) = context(ctx) else {
            return ONI_ENULLCTX;
        };
        let Some(frame) = frame.as_ref() else {
            return ONI_EINVALARG;
        };
        if !ctx.lock().initialized {
            return ONI_EINVALSTATE;
        }

        let data = match frame.data_sz {
            0 => Vec::new(),
            n => std::slice::from_raw_parts(frame.data.cast::<u8>(), n as usize).to_vec(),
        };
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(WrittenFrame {
                device: frame.dev_idx,
                data,
            });
        (2 * std::mem::size_of::<u32>() + frame.data_sz as usize) as c_int
    }

    unsafe fn destroy_frame(&self, frame: *mut oni_frame_t) {
        if frame.is_null() {
            return;
        }
        drop(Box::from_raw(frame.cast::<SimFrame>()));
        self.live_frames.fetch_sub(1, Ordering::SeqCst);
        self.destroyed_frames.fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn driver_info(&self, ctx: oni_ctx) -> *const oni_driver_info_t {
        static INFO: DriverInfoRecord = DriverInfoRecord(oni_driver_info_t {
            name: SIM_DRIVER_NAME.as_ptr(),
            major: 1,
            minor: 0,
            patch: 0,
            pre_release: SIM_DRIVER_PRE_RELEASE.as_ptr(),
        });
        if ctx.is_null() {
            return ptr::null();
        }
        &INFO.0
    }

    fn error_str(&self, code: c_int) -> *const c_char {
        let message: &'static CStr = match code {
            ONI_ESUCCESS => c"Success",
            ONI_EPATHINVALID => c"Invalid stream path",
            ONI_EDEVID => c"Invalid device ID",
            ONI_EDEVIDX => c"Invalid device index",
            ONI_EWRITESIZE => {
                c"Data size is not an integer multiple of the write size for the designated device"
            }
            ONI_EREADFAILURE => c"Failure to read from a stream or register",
            ONI_EWRITEFAILURE => c"Failure to write to a stream or register",
            ONI_ENULLCTX => c"Attempt to use a NULL context",
            ONI_ESEEKFAILURE => c"Failure to seek on stream",
            ONI_EINVALSTATE => c"Invalid operation for the current context run state",
            ONI_EINVALOPT => c"Invalid context option",
            ONI_EINVALARG => c"Invalid function arguments",
            ONI_ECOBSPACK => c"Invalid COBS packet",
            ONI_ERETRIG => c"Attempt to trigger an already triggered operation",
            ONI_EBUFFERSIZE => c"Supplied buffer is too small",
            ONI_EBADDEVTABLE => c"Badly formatted device table supplied by firmware",
            ONI_EBADALLOC => c"Bad dynamic memory allocation",
            ONI_ECLOSEFAIL => c"File descriptor close failure (check errno)",
            ONI_EREADONLY => {
                c"Attempted write to read only object (register, context option, etc)"
            }
            ONI_EUNIMPL => c"Unimplemented API feature",
            ONI_EINVALREADSIZE => c"Block read size is smaller than the maximal frame size",
            ONI_ENOREADDEV => {
                c"Frame read attempted when there are no readable devices in the device table"
            }
            ONI_EINIT => c"Hardware initialization failed",
            ONI_EWRITEONLY => {
                c"Attempted to read from a write only object (register, context option, etc)"
            }
            ONI_EINVALWRITESIZE => {
                c"Write buffer pre-allocation size is smaller than the maximal write frame size"
            }
            ONI_ENOTWRITEDEV => c"Frame allocation attempted for a non-writable device",
            ONI_EDEVIDXREPEAT => c"Device table contains repeated device indices",
            ONI_EPROTCONFIG => {
                c"Attempted to directly read or write a protected configuration option"
            }
            ONI_EBADFRAME => c"Received malformed frame",
            _ => c"Unknown error",
        };
        message.as_ptr()
    }
}

/// Static driver record; the pointers it holds are to static strings
struct DriverInfoRecord(oni_driver_info_t);

// SAFETY: the record is immutable and only points at 'static data.
unsafe impl Sync for DriverInfoRecord {}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sim: &SimBackend) -> oni_ctx {
        let ctx = sim.create_context(c"test");
        assert!(!ctx.is_null());
        assert_eq!(unsafe { sim.init_context(ctx, 0) }, ONI_ESUCCESS);
        ctx
    }

    fn get_u32(sim: &SimBackend, ctx: oni_ctx, option: c_int) -> Result<u32, c_int> {
        let mut value = 0u32;
        let mut len: size_t = 4;
        let rc = unsafe {
            sim.get_option(
                ctx,
                OptionScope::Context,
                option,
                (&mut value as *mut u32).cast(),
                &mut len,
            )
        };
        if rc == 0 {
            Ok(value)
        } else {
            Err(rc)
        }
    }

    fn set_u32(sim: &SimBackend, ctx: oni_ctx, option: c_int, value: u32) -> c_int {
        unsafe {
            sim.set_option(
                ctx,
                OptionScope::Context,
                option,
                (&value as *const u32).cast(),
                4,
            )
        }
    }

    #[test]
    fn test_unknown_driver_yields_null() {
        let sim = SimBackend::new();
        assert!(sim.create_context(c"riffa").is_null());
        assert_eq!(sim.live_contexts(), 0);
    }

    #[test]
    fn test_context_counting() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        assert_eq!(sim.live_contexts(), 1);
        assert_eq!(unsafe { sim.destroy_context(ctx) }, ONI_ESUCCESS);
        assert_eq!(sim.live_contexts(), 0);
    }

    #[test]
    fn test_default_topology() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_NUMDEVICES), Ok(4));
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_MAXREADFRAMESIZE), Ok(24));
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_MAXWRITEFRAMESIZE), Ok(32));
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_SYSCLKHZ), Ok(200_000_000));
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_option_access_direction() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_RESET), Err(ONI_EWRITEONLY));
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_NUMDEVICES, 2), ONI_EREADONLY);
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_BLOCKWRITESIZE, 30), ONI_EINVALWRITESIZE);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_CUSTOMBEGIN), Err(ONI_EINVALOPT));
        assert!(sim.option_log().is_empty());
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_short_getter_buffer() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        let mut buf = [0u8; 20];
        let mut len: size_t = buf.len();
        let rc = unsafe {
            sim.get_option(
                ctx,
                OptionScope::Context,
                ONI_OPT_DEVICETABLE,
                buf.as_mut_ptr().cast(),
                &mut len,
            )
        };
        assert_eq!(rc, ONI_EBUFFERSIZE);
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_reset_counter_directive_runs() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_RESETACQCOUNTER, 2), ONI_ESUCCESS);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_RUNNING), Ok(1));
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_RESETACQCOUNTER, 7), ONI_EINVALARG);

        let log = sim.option_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].option, ONI_OPT_RESETACQCOUNTER);
        assert_eq!(log[0].as_u32(), Some(2));
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_frames_cycle_readable_devices() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        set_u32(&sim, ctx, ONI_OPT_RUNNING, 1);

        let mut seen = Vec::new();
        let mut last_time = None;
        for _ in 0..4 {
            let mut frame = ptr::null_mut();
            let rc = unsafe { sim.read_frame(ctx, &mut frame) };
            assert!(rc > 0);
            let header = unsafe { &*frame };
            assert!(last_time.map_or(true, |t| header.time > t));
            last_time = Some(header.time);
            seen.push((header.dev_idx, header.data_sz));
            unsafe { sim.destroy_frame(frame) };
        }
        assert_eq!(seen, vec![(0x000, 12), (0x100, 16), (0x200, 20), (0x300, 24)]);
        assert_eq!(sim.live_frames(), 0);
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_no_readable_devices() {
        let sim = SimBackend::with_devices(vec![SimDevice::new(0x100, 1, 1, 0, 4)]);
        let ctx = open(&sim);
        let mut frame = ptr::null_mut();
        assert_eq!(unsafe { sim.read_frame(ctx, &mut frame) }, ONI_ENOREADDEV);
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_hub_manager_registers() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        let mut value = 0;
        let rc = unsafe { sim.read_register(ctx, 0x2FE, hub::REG_CLOCK_HZ, &mut value) };
        assert_eq!(rc, ONI_ESUCCESS);
        assert_eq!(value, 150_000_000);
        assert_eq!(
            unsafe { sim.write_register(ctx, 0x2FE, hub::REG_CLOCK_HZ, 1) },
            ONI_EWRITEFAILURE
        );
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_extra_register() {
        let device = SimDevice::new(0x100, 10, 1, 12, 0)
            .with_register(0x10, 0xBEEF, false)
            .with_register(0x11, 0, true);
        assert_eq!(device.device().address, 0x100);
        assert_eq!(device.device().read_size, 12);

        let sim = SimBackend::with_devices(vec![device]);
        let ctx = open(&sim);
        let mut value = 0;
        assert_eq!(
            unsafe { sim.read_register(ctx, 0x100, 0x10, &mut value) },
            ONI_ESUCCESS
        );
        assert_eq!(value, 0xBEEF);
        assert_eq!(
            unsafe { sim.write_register(ctx, 0x100, 0x10, 1) },
            ONI_EWRITEFAILURE
        );
        assert_eq!(
            unsafe { sim.write_register(ctx, 0x100, 0x11, 7) },
            ONI_ESUCCESS
        );
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_option_overrides() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        sim.pin_option(ONI_OPT_RUNNING, 3);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_RUNNING), Ok(3));

        sim.fail_option(ONI_OPT_RESET, ONI_EINIT);
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_RESET, 1), ONI_EINIT);

        sim.clear_option_overrides();
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_RUNNING), Ok(0));
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_RESET, 1), ONI_ESUCCESS);
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_reset_brings_up_pending_topology() {
        let sim = SimBackend::new();
        let ctx = open(&sim);
        sim.set_pending_devices(vec![SimDevice::new(0x0500, 11, 2, 2048, 0)]);

        // Nothing changes before the reset
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_NUMDEVICES), Ok(4));
        assert_eq!(set_u32(&sim, ctx, ONI_OPT_RESET, 1), ONI_ESUCCESS);
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_NUMDEVICES), Ok(1));
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_MAXREADFRAMESIZE), Ok(2048));
        assert_eq!(get_u32(&sim, ctx, ONI_OPT_BLOCKREADSIZE), Ok(2048));

        let mut value = 0;
        let rc = unsafe { sim.read_register(ctx, 0x5FE, hub::REG_CLOCK_HZ, &mut value) };
        assert_eq!(rc, ONI_ESUCCESS);
        assert_eq!(value, 300_000_000);
        unsafe { sim.destroy_context(ctx) };
    }

    #[test]
    fn test_error_strings() {
        let sim = SimBackend::new();
        let text = |code| unsafe { CStr::from_ptr(sim.error_str(code)) }.to_str().unwrap();
        assert_eq!(text(ONI_EDEVIDX), "Invalid device index");
        assert_eq!(text(ONI_EBADFRAME), "Received malformed frame");
        assert_eq!(text(-100), "Unknown error");
    }
}

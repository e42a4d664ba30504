//! ONI Core - Safe acquisition contexts for Open Neuro Interface hardware
//!
//! This crate wraps the liboni C API:
//! - Acquisition context lifecycle, run control and register access
//! - A typed option protocol for context and driver options
//! - Device table decoding and hub addressing
//! - Frames that own native payload memory until released
//! - An in-process simulated controller for use without hardware

pub mod backend;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod hub;
#[cfg(feature = "liboni")]
mod native;
pub mod option;
pub mod sim;
pub mod version;

pub use backend::{Backend, OptionScope};
pub use context::{Context, ContextInfo, DriverInfo, HaltHandle, DEFAULT_HOST_INDEX};
pub use device::{Device, DeviceTable, DEVICE_RECORD_SIZE};
pub use error::{Error, NativeError, Result};
pub use frame::{Frame, Sample};
pub use hub::{hub_manager_address, hub_metadata, hub_sub_address, Hub};
#[cfg(feature = "liboni")]
pub use native::LibOni;
pub use option::{ContextOption, OptionId, OptionValue, STRING_OPTION_CAPACITY};
pub use sim::{SimBackend, SimDevice};
pub use version::{LibraryVersion, MIN_SUPPORTED};

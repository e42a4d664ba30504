//! Hub addressing and manager registers
//!
//! Devices that share a transmission path sit behind one hub. The hub is the
//! second byte of a device address, and each hub answers register reads at a
//! reserved manager device (index 254 within the hub).

use serde::{Deserialize, Serialize};

use tracing::warn;

use crate::context::Context;
use crate::error::{Error, Result};

/// Device index of the manager within every hub
pub const HUB_MANAGER_INDEX: u8 = 254;

pub const REG_HARDWARE_ID: u32 = 0;
pub const REG_HARDWARE_REVISION: u32 = 1;
pub const REG_FIRMWARE_VERSION: u32 = 2;
pub const REG_CLOCK_HZ: u32 = 3;
pub const REG_DELAY_NS: u32 = 4;

/// Hub byte of a fully-qualified device address
pub fn hub_sub_address(device_address: u32) -> u8 {
    ((device_address >> 8) & 0xFF) as u8
}

/// Address of the manager device of `hub`
pub fn hub_manager_address(hub: u8) -> u32 {
    (u32::from(hub) << 8) | u32::from(HUB_MANAGER_INDEX)
}

/// Hub identity and timing, read fresh on every query
///
/// A register the manager could not answer is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub address: u8,
    pub hardware_id: Option<u32>,
    pub hardware_revision: Option<u32>,
    pub firmware_version: Option<u32>,
    pub clock_hz: Option<u32>,
    pub delay_ns: Option<u32>,
}

impl Hub {
    /// Hardware revision as `(major, minor)`
    pub fn revision(&self) -> Option<(u8, u8)> {
        self.hardware_revision
            .map(|rev| (((rev & 0xFF00) >> 8) as u8, (rev & 0xFF) as u8))
    }
}

struct Field(Option<u32>);

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{}", value),
            None => f.write_str("?"),
        }
    }
}

impl std::fmt::Display for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hub 0x{:02X}: hardware id {}, revision ",
            self.address,
            Field(self.hardware_id)
        )?;
        match self.revision() {
            Some((major, minor)) => write!(f, "{}.{}", major, minor)?,
            None => f.write_str("?")?,
        }
        write!(
            f,
            ", firmware {}, clock {} Hz, delay {} ns",
            Field(self.firmware_version),
            Field(self.clock_hz),
            Field(self.delay_ns)
        )
    }
}

/// Query the manager of the hub that `device_address` belongs to
///
/// A register read that liboni rejects leaves that field empty. Any other
/// failure, such as a released context, is returned.
pub fn hub_metadata(context: &Context, device_address: u32) -> Result<Hub> {
    let address = hub_sub_address(device_address);
    let manager = hub_manager_address(address);
    let read = |register, name: &str| match context.read_register(manager, register) {
        Ok(value) => Ok(Some(value)),
        Err(Error::Native(e)) => {
            warn!(hub = address, register = name, error = %e, "Hub register unavailable");
            Ok(None)
        }
        Err(e) => Err(e),
    };

    Ok(Hub {
        address,
        hardware_id: read(REG_HARDWARE_ID, "hardware_id")?,
        hardware_revision: read(REG_HARDWARE_REVISION, "hardware_revision")?,
        firmware_version: read(REG_FIRMWARE_VERSION, "firmware_version")?,
        clock_hz: read(REG_CLOCK_HZ, "clock_hz")?,
        delay_ns: read(REG_DELAY_NS, "delay_ns")?,
    })
}

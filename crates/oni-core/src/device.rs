//! Device table types and decoding

use std::collections::BTreeMap;
use std::sync::Arc;

use oni_sys::oni_ctx;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::backend::{Backend, OptionScope};
use crate::error::{Error, Result};
use crate::option::{ContextOption, Options};

/// Immutable snapshot of one device in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Fully-qualified `rsv.rsv.hub.idx` address
    pub address: u32,
    /// Device type identifier
    pub id: i32,
    /// Firmware/gateware version
    pub version: u32,
    /// Device to host frame size in bytes
    pub read_size: u32,
    /// Host to device frame size in bytes
    pub write_size: u32,
}

impl Device {
    /// Hub sub-address (second byte of the address)
    pub fn hub(&self) -> u8 {
        crate::hub::hub_sub_address(self.address)
    }

    /// Index of the device within its hub
    pub fn index(&self) -> u8 {
        (self.address & 0xFF) as u8
    }

    pub fn is_readable(&self) -> bool {
        self.read_size > 0
    }

    pub fn is_writable(&self) -> bool {
        self.write_size > 0
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:X}: id {}, version {}, read size {}, write size {}",
            self.address, self.id, self.version, self.read_size, self.write_size
        )
    }
}

/// Wire layout of one table entry. Packed: no padding between fields.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable)]
pub(crate) struct DeviceRecord {
    address: u32,
    id: i32,
    version: u32,
    read_size: u32,
    write_size: u32,
}

/// Bytes per table entry
pub const DEVICE_RECORD_SIZE: usize = std::mem::size_of::<DeviceRecord>();

const _: () = assert!(DEVICE_RECORD_SIZE == std::mem::size_of::<oni_sys::oni_device_t>());

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Self {
            address: record.address,
            id: record.id,
            version: record.version,
            read_size: record.read_size,
            write_size: record.write_size,
        }
    }
}

impl From<&Device> for DeviceRecord {
    fn from(device: &Device) -> Self {
        Self {
            address: device.address,
            id: device.id,
            version: device.version,
            read_size: device.read_size,
            write_size: device.write_size,
        }
    }
}

/// Devices keyed and ordered by address
pub type DeviceTable = BTreeMap<u32, Device>;

/// Decode `count` records laid end to end in `block`
pub fn decode_table(block: &[u8], count: usize) -> Result<DeviceTable> {
    let expected = count * DEVICE_RECORD_SIZE;
    if block.len() != expected {
        return Err(Error::TableShape {
            expected,
            actual: block.len(),
        });
    }

    let mut table = DeviceTable::new();
    for chunk in block.chunks_exact(DEVICE_RECORD_SIZE) {
        let record = DeviceRecord::read_from_bytes(chunk).map_err(|_| Error::TableShape {
            expected: DEVICE_RECORD_SIZE,
            actual: chunk.len(),
        })?;
        let device = Device::from(record);
        if table.insert(device.address, device).is_some() {
            return Err(Error::DuplicateDevice(device.address));
        }
    }
    Ok(table)
}

/// Encode devices in the native table layout
pub fn encode_table<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Vec<u8> {
    devices
        .into_iter()
        .flat_map(|d| DeviceRecord::from(d).as_bytes().to_vec())
        .collect()
}

/// Ask for the device count, then fetch and decode the whole table
pub(crate) fn populate(backend: &Arc<dyn Backend>, ctx: oni_ctx) -> Result<DeviceTable> {
    let options = Options::new(backend, ctx);

    let count: u32 = options.get(ContextOption::DeviceCount.into(), OptionScope::Context)?;
    let count = count as usize;
    if count == 0 {
        debug!("Device table is empty");
        return Ok(DeviceTable::new());
    }

    let block = options.get_block(
        ContextOption::DeviceTable.into(),
        count * DEVICE_RECORD_SIZE,
        OptionScope::Context,
    )?;
    let table = decode_table(&block, count)?;

    debug!(devices = table.len(), "Populated device table");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(fields: [u32; 5]) -> Vec<u8> {
        fields.iter().flat_map(|f| f.to_ne_bytes()).collect()
    }

    #[test]
    fn test_decode_two_records() {
        let mut block = record_bytes([0x0100, 5, 1, 64, 0]);
        block.extend(record_bytes([0x0101, 7, 2, 0, 32]));

        let table = decode_table(&block, 2).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[&0x0100],
            Device {
                address: 0x0100,
                id: 5,
                version: 1,
                read_size: 64,
                write_size: 0
            }
        );
        assert_eq!(
            table[&0x0101],
            Device {
                address: 0x0101,
                id: 7,
                version: 2,
                read_size: 0,
                write_size: 32
            }
        );
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_table(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_decode_wrong_size() {
        let block = record_bytes([0x0100, 5, 1, 64, 0]);
        assert!(matches!(
            decode_table(&block[..19], 1),
            Err(Error::TableShape {
                expected: 20,
                actual: 19
            })
        ));
    }

    #[test]
    fn test_decode_duplicate_address() {
        let mut block = record_bytes([0x0200, 1, 1, 8, 0]);
        block.extend(record_bytes([0x0200, 2, 1, 8, 0]));
        assert!(matches!(
            decode_table(&block, 2),
            Err(Error::DuplicateDevice(0x0200))
        ));
    }

    #[test]
    fn test_encode_decode_table() {
        let devices: Vec<Device> = (0..5)
            .map(|i| Device {
                address: i << 8,
                id: 10,
                version: 1,
                read_size: 12 + 4 * i,
                write_size: 32,
            })
            .collect();

        let block = encode_table(&devices);
        assert_eq!(block.len(), 5 * DEVICE_RECORD_SIZE);

        let table = decode_table(&block, devices.len()).unwrap();
        assert_eq!(table.values().copied().collect::<Vec<_>>(), devices);
    }

    #[test]
    fn test_address_fields() {
        let device = Device {
            address: 0x0003_0207,
            id: 1,
            version: 1,
            read_size: 0,
            write_size: 4,
        };
        assert_eq!(device.hub(), 0x02);
        assert_eq!(device.index(), 0x07);
        assert!(!device.is_readable());
        assert!(device.is_writable());
    }

    #[test]
    fn test_device_json() {
        let device = Device {
            address: 0x0100,
            id: 5,
            version: 1,
            read_size: 64,
            write_size: 0,
        };
        let value = serde_json::to_value(device).unwrap();
        assert_eq!(value["address"], 256);
        assert_eq!(value["read_size"], 64);
        assert_eq!(serde_json::from_value::<Device>(value).unwrap(), device);
    }
}

//! Console and JSON output

use anyhow::Result;
use oni_core::{hub_metadata, Context, Frame, Hub};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Serialize)]
struct ContextReport<'a> {
    library: String,
    driver: Option<oni_core::DriverInfo>,
    #[serde(flatten)]
    info: &'a oni_core::ContextInfo,
    hubs: Vec<Hub>,
}

/// Hub metadata for every hub in the table
fn hubs(ctx: &Context) -> Result<Vec<Hub>> {
    let addresses: BTreeSet<u8> = ctx.device_table()?.values().map(|d| d.hub()).collect();
    let mut hubs = Vec::with_capacity(addresses.len());
    for address in addresses {
        hubs.push(hub_metadata(ctx, u32::from(address) << 8)?);
    }
    Ok(hubs)
}

pub fn device_table_json(ctx: &Context) -> Result<String> {
    let report = ContextReport {
        library: ctx.library_version().to_string(),
        driver: ctx.driver_info()?,
        info: ctx.info()?,
        hubs: hubs(ctx)?,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn print_context(ctx: &Context) -> Result<()> {
    let info = ctx.info()?;
    println!("liboni {}", ctx.library_version());
    if let Some(driver) = ctx.driver_info()? {
        println!("Driver: {}", driver);
    }
    println!("System clock: {} Hz", info.system_clock_hz);
    println!("Acquisition clock: {} Hz", info.acquisition_clock_hz);
    println!("Max read frame size: {} bytes", info.max_read_frame_size);
    println!("Max write frame size: {} bytes", info.max_write_frame_size);
    println!("Block read size: {} bytes", ctx.block_read_size()?);
    println!("Block write size: {} bytes", ctx.block_write_size()?);

    println!("Device table ({} devices):", info.devices.len());
    for device in info.devices.values() {
        println!("  {}", device);
    }

    for hub in hubs(ctx)? {
        println!("  {}", hub);
    }
    Ok(())
}

pub fn frame_line(frame: &Frame, clock_hz: u32) -> Result<String> {
    let time = frame.timestamp()?;
    let words: Vec<u16> = frame.extract().unwrap_or_default();
    Ok(format!(
        "[{:.6} s] 0x{:X}: {} bytes {:04X?}",
        time as f64 / f64::from(clock_hz.max(1)),
        frame.device_address()?,
        frame.payload_size()?,
        words
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oni_core::SimBackend;
    use std::sync::Arc;

    fn open() -> Context {
        Context::with_backend(Arc::new(SimBackend::new()), "test", 0).unwrap()
    }

    #[test]
    fn test_json_lists_devices_and_hubs() {
        let ctx = open();
        let json: serde_json::Value = serde_json::from_str(&device_table_json(&ctx).unwrap()).unwrap();

        assert_eq!(json["system_clock_hz"], 200_000_000);
        assert_eq!(json["devices"].as_object().unwrap().len(), 4);
        assert_eq!(json["devices"]["256"]["read_size"], 16);
        assert_eq!(json["hubs"].as_array().unwrap().len(), 4);
        assert_eq!(json["driver"]["name"], "test");
    }

    #[test]
    fn test_faulted_hub_register_is_null() {
        let sim =
            SimBackend::new().with_hub_fault(2, oni_core::hub::REG_DELAY_NS, oni_sys::ONI_EREADFAILURE);
        let ctx = Context::with_backend(Arc::new(sim), "test", 0).unwrap();
        let json: serde_json::Value = serde_json::from_str(&device_table_json(&ctx).unwrap()).unwrap();

        let hubs = json["hubs"].as_array().unwrap();
        assert_eq!(hubs.len(), 4);
        assert!(hubs[2]["delay_ns"].is_null());
        assert_eq!(hubs[2]["hardware_id"], 5);
        assert_eq!(hubs[1]["delay_ns"], 628);
    }

    #[test]
    fn test_frame_line() {
        let ctx = open();
        ctx.start(true).unwrap();
        let frame = ctx.read_frame().unwrap();
        let line = frame_line(&frame, 200_000_000).unwrap();
        assert!(line.starts_with("[0.000000 s] 0x0: 12 bytes"));
    }
}

//! ONI Host - Sample acquisition program
//!
//! Opens a context, reports the device table and hubs, then streams a
//! bounded number of frames.

mod config;
mod report;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use oni_core::{Backend, Context, SimBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{BackendKind, Config};

#[derive(Parser, Debug)]
#[command(name = "oni-host")]
#[command(about = "Open Neuro Interface acquisition host")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "oni.toml")]
    config: PathBuf,

    /// Backend (sim, liboni)
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Hardware translation driver
    #[arg(short, long)]
    driver: Option<String>,

    /// Physical host index
    #[arg(short, long, allow_negative_numbers = true)]
    index: Option<i32>,

    /// Number of frames to read
    #[arg(short, long)]
    frames: Option<u64>,

    /// Print the device table as JSON and exit
    #[arg(long)]
    json: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("ONI host v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(backend) = args.backend {
        config.context.backend = backend;
    }
    if let Some(driver) = args.driver {
        config.context.driver = driver;
    }
    if let Some(index) = args.index {
        config.context.index = index;
    }
    if let Some(frames) = args.frames {
        config.acquisition.frames = frames;
    }

    info!(
        backend = ?config.context.backend,
        driver = %config.context.driver,
        index = config.context.index,
        "Configuration loaded"
    );

    let mut ctx = open(&config)?;

    if args.json {
        println!("{}", report::device_table_json(&ctx)?);
    } else {
        report::print_context(&ctx)?;
        acquire(&ctx, &config)?;
    }

    ctx.release()
        .context("Failed to release acquisition context")?;
    Ok(())
}

fn backend(kind: BackendKind) -> Result<Arc<dyn Backend>> {
    match kind {
        BackendKind::Sim => Ok(Arc::new(SimBackend::new())),
        #[cfg(feature = "liboni")]
        BackendKind::Liboni => Ok(Arc::new(oni_core::LibOni)),
        #[cfg(not(feature = "liboni"))]
        BackendKind::Liboni => bail!("oni-host was built without the liboni feature"),
    }
}

/// Open the context and apply the optional context settings
fn open(config: &Config) -> Result<Context> {
    let settings = &config.context;
    let ctx = Context::with_backend(backend(settings.backend)?, &settings.driver, settings.index)
        .with_context(|| format!("Failed to open context for driver {}", settings.driver))?;

    if let Some(address) = settings.hardware_address {
        ctx.set_hardware_address(address)?;
    }
    if let Some(size) = settings.block_read_size {
        ctx.set_block_read_size(size)?;
    }
    if let Some(size) = settings.block_write_size {
        ctx.set_block_write_size(size)?;
    }
    Ok(ctx)
}

/// Read the configured number of frames, then stop
fn acquire(ctx: &Context, config: &Config) -> Result<()> {
    let settings = &config.acquisition;
    if settings.frames == 0 {
        return Ok(());
    }

    let clock_hz = ctx.acquisition_clock_hz()?;
    ctx.start(settings.reset_clock)?;
    info!(frames = settings.frames, reset_clock = settings.reset_clock, "Acquisition started");

    let mut bytes = 0u64;
    let mut last_time = 0;
    for n in 0..settings.frames {
        let frame = match ctx.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // Never continue past a failed read
                if let Err(stop) = ctx.stop() {
                    warn!(error = %stop, "Failed to stop acquisition");
                }
                bail!("Frame read failed: {e}");
            }
        };

        bytes += u64::from(frame.payload_size()?);
        last_time = frame.timestamp()?;

        if settings.display_every > 0 && n % settings.display_every == 0 {
            println!("{}", report::frame_line(&frame, clock_hz)?);
        }
    }

    ctx.stop()?;
    info!(
        frames = settings.frames,
        bytes,
        elapsed_s = last_time as f64 / f64::from(clock_hz.max(1)),
        "Acquisition stopped"
    );
    Ok(())
}

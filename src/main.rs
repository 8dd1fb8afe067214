//! GPIO Bridge
//!
//! Drive and sample a single GPIO line on a Raspberry Pi through
//! memory-mapped registers.
//!
//! # Usage
//!
//! ```bash
//! # List known GPIO controllers
//! gpio-bridge profiles list
//!
//! # Show register layout for a controller
//! gpio-bridge profiles show bcm2837
//!
//! # Blink GPIO17 once, holding it high for two seconds (needs root for /dev/mem)
//! sudo gpio-bridge blink --pin 17
//!
//! # Drive device instance 0 high, then read it back
//! sudo gpio-bridge write 0 1
//! sudo gpio-bridge read 0
//!
//! # Same against the simulated controller
//! gpio-bridge --simulate write 0 1
//!
//! # Validate a configuration file
//! gpio-bridge --config gpio-bridge.toml check
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use rpi_gpio_bridge::hal::{regs, HardwareDescription, MapProvider, PinIndex, SimulatedController};
use rpi_gpio_bridge::{BridgeConfig, DriverContext};

/// GPIO Bridge
///
/// Single-pin GPIO control through memory-mapped registers
#[derive(Parser)]
#[command(name = "gpio-bridge")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Single-pin GPIO control through memory-mapped registers")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-process simulated controller instead of /dev/mem
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable verbose output (register traffic)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Controller register tables
    #[command(subcommand)]
    Profiles(ProfileCommands),

    /// Toggle a pin high then low
    Blink {
        /// GPIO line number
        #[arg(short, long, default_value_t = 4)]
        pin: u32,

        /// Time to hold the pin high and low, in milliseconds
        #[arg(long, default_value_t = 2000)]
        hold_ms: u64,

        /// Number of high/low cycles
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Read a device instance through the bridge
    Read {
        /// Device instance (minor number)
        #[arg(default_value_t = 0)]
        minor: usize,
    },

    /// Write '0' or '1' to a device instance through the bridge
    Write {
        /// Device instance (minor number)
        minor: usize,

        /// Value to write
        value: String,
    },

    /// Validate the configuration and print the resolved settings
    Check,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List known controllers
    List,

    /// Show a controller's register layout
    Show {
        /// Generation or board alias (e.g., bcm2837, rpi3, rpi4)
        generation: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    match cli.command {
        Commands::Profiles(cmd) => handle_profiles(cmd),
        Commands::Blink {
            pin,
            hold_ms,
            count,
        } => handle_blink(&config, cli.simulate, pin, Duration::from_millis(hold_ms), count),
        Commands::Read { minor } => handle_read(&config, cli.simulate, minor),
        Commands::Write { minor, value } => handle_write(&config, cli.simulate, minor, &value),
        Commands::Check => handle_check(&config, cli.simulate),
    }
}

fn build_provider(
    config: &BridgeConfig,
    hw: &HardwareDescription,
    simulate: bool,
) -> Result<Box<dyn MapProvider>> {
    if simulate {
        info!("using simulated {} controller", hw.generation);
        return Ok(Box::new(SimulatedController::new(hw)));
    }

    #[cfg(unix)]
    {
        Ok(Box::new(config.dev_mem()))
    }

    #[cfg(not(unix))]
    {
        let _ = config;
        bail!("memory-mapped GPIO needs a Unix host; use --simulate")
    }
}

fn attach(config: &BridgeConfig, simulate: bool) -> Result<DriverContext> {
    let hw = config.hardware()?;
    let provider = build_provider(config, &hw, simulate)?;
    Ok(config.attach(provider)?)
}

fn handle_profiles(cmd: ProfileCommands) -> Result<()> {
    match cmd {
        ProfileCommands::List => {
            println!("{}", "=".repeat(60));
            println!("{}", "Known GPIO Controllers".cyan().bold());
            println!("{}", "=".repeat(60));

            for name in regs::generation_names() {
                if let Some(hw) = regs::lookup(name) {
                    println!("\n  {}: {}", name.white().bold(), hw.boards);
                    println!("    GPIO base: 0x{:08X}", hw.gpio_base());
                    println!("    Pins: {}", hw.pin_count);
                }
            }

            println!("\n{}", "=".repeat(60));
            println!(
                "Use {} to see the register layout",
                "gpio-bridge profiles show <generation>".cyan()
            );
        }

        ProfileCommands::Show { generation } => {
            let hw = regs::lookup(&generation).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown controller: {}. Use 'gpio-bridge profiles list' to see available controllers.",
                    generation
                )
            })?;
            print_hardware(hw);
        }
    }

    Ok(())
}

fn print_hardware(hw: &HardwareDescription) {
    println!("{}", "=".repeat(60));
    println!("{}", format!("Controller: {}", hw.generation).cyan().bold());
    println!("{}", "=".repeat(60));

    println!("\n{}", "Addresses:".white().bold());
    println!("  Boards: {}", hw.boards);
    println!("  Peripheral base: 0x{:08X}", hw.peripheral_base);
    println!("  GPIO offset: 0x{:08X}", hw.gpio_offset);
    println!("  GPIO base: 0x{:08X}", hw.gpio_base());
    println!("  Mapped length: 0x{:X}", hw.block_length);
    println!("  Pins: 0-{}", hw.pin_count - 1);

    println!("\n{}", "Registers:".white().bold());
    let rows = [
        ("GPFSEL0", hw.offsets.function_select, "function select, 3 bits x 10 pins"),
        ("GPSET0", hw.offsets.output_set, "output set, write 1 to drive high"),
        ("GPCLR0", hw.offsets.output_clear, "output clear, write 1 to drive low"),
        ("GPLEV0", hw.offsets.level, "pin level"),
    ];
    for (name, offset, description) in rows {
        println!(
            "  {:<8} +0x{:04X}  0x{:08X}  {}",
            name.cyan(),
            offset,
            hw.gpio_base() + offset as u64,
            description.dimmed()
        );
    }

    println!("\n{}", "=".repeat(60));
}

fn print_level(ctx: &DriverContext, pin: PinIndex) -> Result<()> {
    let (addr, value) = ctx.with_pin(pin, |p| p.level_register())?;
    println!("  REG [0x{:08X}] = 0x{:08X}", addr, value);
    Ok(())
}

fn handle_blink(
    config: &BridgeConfig,
    simulate: bool,
    pin: u32,
    hold: Duration,
    count: u32,
) -> Result<()> {
    let hw = config.hardware()?;
    let provider = build_provider(config, &hw, simulate)?;
    let ctx = DriverContext::attach(
        config.bridge.name.clone(),
        hw,
        provider,
        &[pin],
        config.bridge.write_policy,
    )?;
    let pin = ctx.pin(0).context("no pin bound")?;

    ctx.with_pin(pin, |p| p.configure_as_output())
        .with_context(|| format!("Failed to configure {}", pin))?;
    println!("{} {} configured as output", "[*]".cyan().bold(), pin);

    for cycle in 1..=count {
        ctx.with_pin(pin, |p| p.set_high())?;
        println!("{} {} high ({}/{})", "[SET]".green().bold(), pin, cycle, count);
        print_level(&ctx, pin)?;
        thread::sleep(hold);

        ctx.with_pin(pin, |p| p.set_low())?;
        println!("{} {} low", "[CLR]".yellow().bold(), pin);
        print_level(&ctx, pin)?;
        if cycle < count {
            thread::sleep(hold);
        }
    }

    ctx.detach();
    Ok(())
}

fn handle_read(config: &BridgeConfig, simulate: bool, minor: usize) -> Result<()> {
    let ctx = attach(config, simulate)?;
    let mut dev = ctx.device(minor)?;

    dev.open()
        .with_context(|| format!("Failed to open device {}", minor))?;
    let mut buf = [0u8; 1];
    let result = dev.read(&mut buf);
    dev.release();
    let n = result?;

    if n == 1 {
        println!("{}", buf[0] as char);
    }
    ctx.detach();
    Ok(())
}

fn handle_write(config: &BridgeConfig, simulate: bool, minor: usize, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("Nothing to write");
    }

    let ctx = attach(config, simulate)?;
    let mut dev = ctx.device(minor)?;

    dev.open()
        .with_context(|| format!("Failed to open device {}", minor))?;
    let written = dev.write(value.as_bytes());
    let mut buf = [0u8; 1];
    let read_back = written.is_ok().then(|| dev.read(&mut buf));
    dev.release();

    written.with_context(|| format!("Failed to write {:?} to device {}", value, minor))?;
    if let Some(result) = read_back {
        result?;
        println!(
            "{} {} ({}) = {}",
            "[OK]".green().bold(),
            minor,
            dev.pin(),
            buf[0] as char
        );
    }
    ctx.detach();
    Ok(())
}

fn handle_check(config: &BridgeConfig, simulate: bool) -> Result<()> {
    let hw = config.hardware()?;
    config.validate()?;

    println!("{}", "Configuration OK".green().bold());
    println!("  Controller: {} (GPIO base 0x{:08X})", hw.generation, hw.gpio_base());
    if simulate {
        println!("  Access: simulated");
    } else {
        println!(
            "  Access: {} (file base 0x{:08X})",
            config.access.device.display(),
            config.access.file_base
        );
    }
    println!("  Write policy: {:?}", config.bridge.write_policy);
    for (minor, pin) in config.bridge.pins.iter().enumerate() {
        println!("  {}{} -> GPIO{}", config.bridge.name, minor, pin);
    }
    Ok(())
}

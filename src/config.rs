//! Bridge configuration file
//!
//! ```toml
//! [hardware]
//! generation = "bcm2837"
//! peripheral_base = 0x3F000000   # optional override
//!
//! [access]
//! device = "/dev/mem"
//!
//! [bridge]
//! write_policy = "strict"
//! pins = [4, 17]
//! ```
//!
//! Every section and key is optional.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bridge::{DriverContext, WritePolicy};
use crate::error::ConfigError;
use crate::hal::{regs, HardwareDescription, MapProvider, PinIndex, PAGE_SIZE};

/// Controller selection and address overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSection {
    /// Generation name or board alias (see `regs::lookup`)
    pub generation: String,
    pub peripheral_base: Option<u64>,
    pub gpio_offset: Option<u64>,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            generation: "bcm2837".to_string(),
            peripheral_base: None,
            gpio_offset: None,
        }
    }
}

/// Memory device used for mappings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSection {
    pub device: PathBuf,
    /// Physical address at file offset 0 (GPIO base for `/dev/gpiomem`)
    pub file_base: u64,
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/mem"),
            file_base: 0,
        }
    }
}

/// Device instances and wire-protocol policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Driver name used in log lines
    pub name: String,
    pub write_policy: WritePolicy,
    /// One pin per device instance, indexed by minor number
    pub pins: Vec<u32>,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            name: "gpio".to_string(),
            write_policy: WritePolicy::default(),
            pins: vec![4],
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub hardware: HardwareSection,
    pub access: AccessSection,
    pub bridge: BridgeSection,
}

impl BridgeConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the controller, its base address, and every pin
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hw = self.hardware()?;
        if self.bridge.pins.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        for &pin in &self.bridge.pins {
            PinIndex::new(pin, &hw)?;
        }
        Ok(())
    }

    /// Hardware table with overrides applied
    pub fn hardware(&self) -> Result<HardwareDescription, ConfigError> {
        let base = regs::lookup(&self.hardware.generation)
            .ok_or_else(|| ConfigError::UnknownGeneration(self.hardware.generation.clone()))?;

        let mut hw = base.clone();
        if let Some(peripheral_base) = self.hardware.peripheral_base {
            hw = hw.with_peripheral_base(peripheral_base);
        }
        if let Some(gpio_offset) = self.hardware.gpio_offset {
            hw = hw.with_gpio_offset(gpio_offset);
        }
        if hw.gpio_base() % PAGE_SIZE as u64 != 0 {
            return Err(ConfigError::MisalignedBase(hw.gpio_base()));
        }
        Ok(hw)
    }

    /// Build the driver context on top of `provider`
    pub fn attach(&self, provider: Box<dyn MapProvider>) -> Result<DriverContext, ConfigError> {
        let ctx = DriverContext::attach(
            self.bridge.name.clone(),
            self.hardware()?,
            provider,
            &self.bridge.pins,
            self.bridge.write_policy,
        )?;
        Ok(ctx)
    }

    /// `/dev/mem` style provider for the configured device
    #[cfg(unix)]
    pub fn dev_mem(&self) -> crate::hal::DevMem {
        crate::hal::DevMem::new(&self.access.device).with_file_base(self.access.file_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpioError;
    use crate::hal::{Generation, SimulatedController};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config, BridgeConfig::default());

        let hw = config.hardware().unwrap();
        assert_eq!(hw.generation, Generation::Bcm2837);
        assert_eq!(hw.gpio_base(), 0x3F20_0000);
        assert_eq!(config.bridge.pins, vec![4]);
        assert_eq!(config.bridge.write_policy, WritePolicy::Lenient);
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[hardware]
generation = "rpi4"

[access]
device = "/dev/gpiomem"
file_base = 0xFE200000

[bridge]
name = "led"
write_policy = "strict"
pins = [4, 17, 57]
"#;
        let config = BridgeConfig::parse(content).unwrap();
        assert_eq!(config.hardware().unwrap().generation, Generation::Bcm2711);
        assert_eq!(config.access.file_base, 0xFE20_0000);
        assert_eq!(config.bridge.name, "led");
        assert_eq!(config.bridge.write_policy, WritePolicy::Strict);
        assert_eq!(config.bridge.pins, vec![4, 17, 57]);
    }

    #[test]
    fn test_base_override() {
        let content = r#"
[hardware]
generation = "bcm2837"
peripheral_base = 0x20000000
"#;
        let hw = BridgeConfig::parse(content).unwrap().hardware().unwrap();
        assert_eq!(hw.gpio_base(), 0x2020_0000);
        assert_eq!(hw.offsets.level, 0x34);
    }

    #[test]
    fn test_misaligned_override_rejected() {
        let content = r#"
[hardware]
gpio_offset = 0x200010
"#;
        assert!(matches!(
            BridgeConfig::parse(content),
            Err(ConfigError::MisalignedBase(0x3F20_0010))
        ));
    }

    #[test]
    fn test_unknown_generation() {
        let content = "[hardware]\ngeneration = \"bcm9999\"\n";
        assert!(matches!(
            BridgeConfig::parse(content),
            Err(ConfigError::UnknownGeneration(_))
        ));
    }

    #[test]
    fn test_invalid_pin_rejected_on_load() {
        let content = "[bridge]\npins = [4, 54]\n";
        assert!(matches!(
            BridgeConfig::parse(content),
            Err(ConfigError::Gpio(GpioError::InvalidPinIndex { index: 54, .. }))
        ));
    }

    #[test]
    fn test_attach_rejects_invalid_pin_before_mapping() {
        let config = BridgeConfig {
            bridge: BridgeSection {
                pins: vec![4, 64],
                ..Default::default()
            },
            ..Default::default()
        };
        let sim = SimulatedController::new(&config.hardware().unwrap());

        let result = config.attach(Box::new(sim.clone()));
        assert!(matches!(
            result,
            Err(ConfigError::Gpio(GpioError::InvalidPinIndex {
                index: 64,
                pin_count: 54
            }))
        ));
        assert!(sim.accesses().is_empty());
        assert_eq!(sim.total_mappings(), 0);
    }

    #[test]
    fn test_empty_pin_list_rejected() {
        let content = "[bridge]\npins = []\n";
        assert!(matches!(
            BridgeConfig::parse(content),
            Err(ConfigError::NoDevices)
        ));
    }

    #[test]
    fn test_bad_policy_is_parse_error() {
        let content = "[bridge]\nwrite_policy = \"loose\"\n";
        assert!(matches!(
            BridgeConfig::parse(content),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[bridge]\npins = [4, 17]").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        let sim = SimulatedController::new(&config.hardware().unwrap());
        let ctx = config.attach(Box::new(sim)).unwrap();
        assert_eq!(ctx.device_count(), 2);
        assert_eq!(ctx.name(), "gpio");
    }

    #[test]
    fn test_missing_file() {
        let result = BridgeConfig::load(Path::new("/nonexistent/gpio-bridge.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

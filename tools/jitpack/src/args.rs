//! Command line parsing.
//!
//! ```text
//! jitpack <module-dir> <out-image> [key=value...]
//! ```
//!
//! | key         | value                                               |
//! |-------------|-----------------------------------------------------|
//! | `nic`       | `3c509b`, `3c515`, `vortex`, `boomerang`, `cyclone`, `tornado` |
//! | `cpu`       | `8086`, `286`, `386`, `486`, `pentium`              |
//! | `io`        | I/O base                                            |
//! | `irq`       | hardware IRQ                                        |
//! | `dma`       | ISA DMA channel or `none`                           |
//! | `mac`       | `00:20:af:01:02:03`                                 |
//! | `chipset`   | raw chipset flag byte                               |
//! | `clflush`   | CPU has `CLFLUSH` (boolean)                         |
//! | `busmaster` | bus mastering enabled (boolean)                     |
//! | `bounce`    | bounce buffers needed (boolean)                     |
//! | `vds`       | VDS available (boolean)                             |
//! | `wb`        | write-back cache (boolean)                          |
//! | `cacheline` | cache line size in bytes                            |
//! | `int`       | packet driver API interrupt                         |
//!
//! Numbers are decimal or `0x`-prefixed hex; booleans are `0`/`1`,
//! `no`/`yes` or `false`/`true`.

use driver_jit::config::ConfigError;
use driver_jit::{BuildConfig, ChipsetFlags, HwValues, SystemFacts};
use module_abi::{CpuTier, NicType};
use std::path::PathBuf;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("usage: jitpack <module-dir> <out-image> [key=value...]")]
    Usage,
    #[error("expected key=value, got {0:?}")]
    NotAKeyValue(String),
    #[error("unknown key {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for {key}")]
    BadValue { key: String, value: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything one run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub module_dir: PathBuf,
    pub out: PathBuf,
    pub facts: SystemFacts,
    pub hw: HwValues,
    pub config: BuildConfig,
}

impl Options {
    /// Parse the arguments following the program name.
    ///
    /// # Errors
    /// Any [`ArgError`].
    pub fn parse<I>(args: I) -> Result<Self, ArgError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let module_dir = args.next().ok_or(ArgError::Usage)?.into();
        let out = args.next().ok_or(ArgError::Usage)?.into();

        let mut opts = Self {
            module_dir,
            out,
            facts: SystemFacts::default(),
            hw: HwValues::default(),
            config: BuildConfig::default(),
        };
        for arg in args {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| ArgError::NotAKeyValue(arg.clone()))?;
            opts.set(key, value)?;
        }
        Ok(opts)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ArgError> {
        let bad = || ArgError::BadValue {
            key: key.into(),
            value: value.into(),
        };
        match key {
            "nic" => {
                let nic = parse_nic(value).ok_or_else(bad)?;
                self.facts.nic_type = Some(nic);
                self.hw.nic_type = nic;
            }
            "cpu" => {
                let tier = parse_cpu(value).ok_or_else(bad)?;
                self.facts.cpu_tier = tier;
                self.hw.cpu_tier = tier;
            }
            "io" => self.hw.io_base = parse_num(value).ok_or_else(bad)?,
            "irq" => self.hw.irq = parse_num(value).ok_or_else(bad)?,
            "dma" => {
                self.hw.dma_channel = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(parse_num(value).ok_or_else(bad)?)
                };
            }
            "mac" => self.hw.mac = parse_mac(value).ok_or_else(bad)?,
            "chipset" => {
                self.facts.chipset = ChipsetFlags::from_bits(parse_num(value).ok_or_else(bad)?);
            }
            "clflush" => {
                let on = parse_bool(value).ok_or_else(bad)?;
                self.facts.cpu_features = self.facts.cpu_features.with_clflush(on);
                if on {
                    self.facts.cpu_features = self.facts.cpu_features.with_cpuid(true);
                }
            }
            "busmaster" => {
                let on = parse_bool(value).ok_or_else(bad)?;
                self.facts.busmaster_enabled = on;
                self.hw.flags = self.hw.flags.with_busmaster_capable(on);
            }
            "bounce" => self.facts.bounce_buffers_needed = parse_bool(value).ok_or_else(bad)?,
            "vds" => {
                let on = parse_bool(value).ok_or_else(bad)?;
                self.facts.vds_available = on;
                self.hw.flags = self.hw.flags.with_vds_available(on);
            }
            "wb" => {
                let on = parse_bool(value).ok_or_else(bad)?;
                self.hw.flags = self.hw.flags.with_write_back_cache(on);
            }
            "cacheline" => self.hw.cache_line_size = parse_num(value).ok_or_else(bad)?,
            "int" => self.config = BuildConfig::new(parse_num(value).ok_or_else(bad)?)?,
            _ => return Err(ArgError::UnknownKey(key.into())),
        }
        Ok(())
    }
}

fn parse_num<T>(value: &str) -> Option<T>
where
    T: TryFrom<u32>,
{
    let raw = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => value.parse().ok()?,
    };
    T::try_from(raw).ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn parse_nic(value: &str) -> Option<NicType> {
    let nic = match value.to_ascii_lowercase().as_str() {
        "3c509b" | "etherlink3" => NicType::Etherlink3,
        "3c515" | "corkscrew" => NicType::Corkscrew,
        "vortex" | "3c59x" => NicType::Vortex,
        "boomerang" | "3c90x" => NicType::Boomerang,
        "cyclone" | "3c90xb" => NicType::Cyclone,
        "tornado" | "3c90xc" => NicType::Tornado,
        _ => return None,
    };
    Some(nic)
}

fn parse_cpu(value: &str) -> Option<CpuTier> {
    let tier = match value.to_ascii_lowercase().as_str() {
        "8086" | "8088" => CpuTier::Cpu8086,
        "286" | "80286" => CpuTier::Cpu80286,
        "386" | "80386" => CpuTier::Cpu80386,
        "486" | "80486" => CpuTier::Cpu80486,
        "pentium" | "586" => CpuTier::Pentium,
        _ => return None,
    };
    Some(tier)
}

fn parse_mac(value: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = value.split([':', '-']);
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

//! Memory subsystem settings, read once from environment-style variables.
//!
//! Each setting is looked up under several names, most specific first; the first name
//! that is present wins. Sizes accept the binary suffixes `kb`, `mb`, `gb` and `tb`
//! (case-insensitive), e.g. `NETMEM_MX=256mb`.

use std::time::Duration;

use netmem_accounting::Limits;
use netmem_common::{Error, Result};

pub const KIBIBYTE: u64 = 1024;
pub const MEBIBYTE: u64 = 1024 * KIBIBYTE;
pub const GIBIBYTE: u64 = 1024 * MEBIBYTE;
pub const TEBIBYTE: u64 = 1024 * GIBIBYTE;

/// Upper bound for the default hard limit.
pub const MAX_DIRECT_MEMORY_DEFAULT: u64 = 64 * MEBIBYTE;

pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(15);

pub const HARD_LIMIT_VARS: &[&str] = &[
    "NETMEM_MAX_DIRECT_MEMORY_SIZE",
    "MAX_DIRECT_MEMORY_SIZE",
    "NETMEM_MX",
    "MX",
];

pub const SOFT_LIMIT_VARS: &[&str] = &[
    "NETMEM_SOFT_DIRECT_MEMORY_SIZE",
    "SOFT_DIRECT_MEMORY_SIZE",
    "NETMEM_MS",
    "MS",
];

pub const BLOCK_SIZE_VARS: &[&str] = &[
    "NETMEM_BLOCK_SIZE",
    "BLOCK_SIZE",
    "NETMEM_BLOCKSIZE",
    "BLOCKSIZE",
    "NETMEM_BS",
];

pub const COLLECT_TIMEOUT_VARS: &[&str] = &["NETMEM_COLLECT_TIMEOUT_MS"];

/// Limits and pool sizing for a [`MemoryContext`](crate::MemoryContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    hard_limit: u64,
    soft_limit: u64,
    block_size: usize,
    collect_timeout: Duration,
}

impl MemoryConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Malformed values are logged and replaced by their defaults.
    pub fn from_env() -> MemoryConfig {
        let lookup = |name: &str| std::env::var(name).ok();
        match MemoryConfig::from_lookup(lookup) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring malformed memory settings: {e}");
                MemoryConfig::default()
            }
        }
    }

    /// Builds the configuration from an arbitrary name-to-value lookup.
    ///
    /// A value of zero for any setting selects its default.
    pub fn from_lookup<F>(lookup: F) -> Result<MemoryConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hard_limit = match lookup_size(&lookup, HARD_LIMIT_VARS)? {
            Some(n) if n != 0 => n,
            _ => default_hard_limit(),
        };
        let soft_limit = match lookup_size(&lookup, SOFT_LIMIT_VARS)? {
            Some(n) if n != 0 => n.min(hard_limit),
            _ => hard_limit,
        };
        let block_size = match lookup_size(&lookup, BLOCK_SIZE_VARS)? {
            Some(n) if n != 0 => usize::try_from(n)
                .map_err(|_| Error::invalid_arg("block_size", format!("{n} is too large")))?,
            _ => DEFAULT_BLOCK_SIZE,
        };
        let collect_timeout = match lookup_first(&lookup, COLLECT_TIMEOUT_VARS) {
            Some((name, value)) => {
                let ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| Error::invalid_arg(name, format!("'{value}': {e}")))?;
                if ms == 0 {
                    DEFAULT_COLLECT_TIMEOUT
                } else {
                    Duration::from_millis(ms)
                }
            }
            None => DEFAULT_COLLECT_TIMEOUT,
        };
        Ok(MemoryConfig {
            hard_limit,
            soft_limit,
            block_size,
            collect_timeout,
        })
    }

    pub fn with_hard_limit(mut self, hard_limit: u64) -> Self {
        self.hard_limit = hard_limit;
        self.soft_limit = self.soft_limit.min(hard_limit);
        self
    }

    /// Sets the soft limit; values above the hard limit are clamped.
    pub fn with_soft_limit(mut self, soft_limit: u64) -> Self {
        self.soft_limit = soft_limit.min(self.hard_limit);
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_collect_timeout(mut self, collect_timeout: Duration) -> Self {
        self.collect_timeout = collect_timeout;
        self
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    pub fn soft_limit(&self) -> u64 {
        self.soft_limit
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn collect_timeout(&self) -> Duration {
        self.collect_timeout
    }

    pub fn limits(&self) -> Limits {
        Limits::new(self.hard_limit, self.soft_limit, self.collect_timeout)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let hard_limit = default_hard_limit();
        MemoryConfig {
            hard_limit,
            soft_limit: hard_limit,
            block_size: DEFAULT_BLOCK_SIZE,
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
        }
    }
}

/// The lesser of installed physical memory and [`MAX_DIRECT_MEMORY_DEFAULT`].
pub fn default_hard_limit() -> u64 {
    netmem_raw_alloc::malloc::physical_memory()
        .map_or(MAX_DIRECT_MEMORY_DEFAULT, |m| m.min(MAX_DIRECT_MEMORY_DEFAULT))
}

/// Parses a byte size with an optional binary suffix (`kb`, `mb`, `gb`, `tb`).
///
/// ```
/// use netmem::config::parse_size;
///
/// assert_eq!(parse_size("512").unwrap(), 512);
/// assert_eq!(parse_size(" 32KB ").unwrap(), 32 * 1024);
/// assert_eq!(parse_size("2mb").unwrap(), 2 * 1024 * 1024);
/// assert!(parse_size("lots").is_err());
/// ```
pub fn parse_size(value: &str) -> Result<u64> {
    let v = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = [
        ("tb", TEBIBYTE),
        ("gb", GIBIBYTE),
        ("mb", MEBIBYTE),
        ("kb", KIBIBYTE),
    ]
    .iter()
    .find_map(|&(suffix, m)| v.strip_suffix(suffix).map(|d| (d, m)))
    .unwrap_or((v.as_str(), 1));

    let n = digits
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::invalid_arg("size", format!("'{value}': {e}")))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| Error::invalid_arg("size", format!("'{value}' overflows")))
}

fn lookup_first<'n, F>(lookup: &F, names: &[&'n str]) -> Option<(&'n str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|&name| lookup(name).map(|value| (name, value)))
}

fn lookup_size<F>(lookup: &F, names: &[&str]) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_first(lookup, names)
        .map(|(name, value)| {
            parse_size(&value).map_err(|e| Error::invalid_arg(name, e.to_string()))
        })
        .transpose()
}

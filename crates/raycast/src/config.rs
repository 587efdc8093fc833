//! TOML configuration for creating an [`IntersectionApi`](crate::IntersectionApi).
//!
//! ```toml
//! device = 0
//! enable_gpu = false
//!
//! [host]
//! num_threads = 4
//! num_queues = 2
//!
//! [options]
//! "acc.type" = "hlbvh"
//! ```

use raycast_calc::{CalcConfig, HostConfig};
use raycast_kernel::Options;
use serde::Deserialize;

use crate::error::Result;

/// Host backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostSection {
    /// Kernel worker threads; 0 uses the available parallelism.
    pub num_threads: usize,
    /// Number of command queues.
    pub num_queues: u32,
}

impl Default for HostSection {
    fn default() -> Self {
        let host = HostConfig::default();
        Self {
            num_threads: host.num_threads,
            num_queues: host.num_queues,
        }
    }
}

/// Everything needed to enumerate devices and set up one of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RaycastConfig {
    /// Index of the device to create.
    pub device: usize,
    /// Probe GPU adapters.
    pub enable_gpu: bool,
    /// Host backend settings.
    pub host: HostSection,
    /// Runtime options, see [`Options`].
    pub options: toml::Table,
}

impl Default for RaycastConfig {
    fn default() -> Self {
        Self {
            device: 0,
            enable_gpu: true,
            host: HostSection::default(),
            options: toml::Table::new(),
        }
    }
}

impl RaycastConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Device enumeration settings.
    pub fn calc_config(&self) -> CalcConfig {
        CalcConfig {
            enable_gpu: self.enable_gpu,
            host: HostConfig {
                num_threads: self.host.num_threads,
                num_queues: self.host.num_queues,
            },
        }
    }

    /// Runtime options applied over the defaults.
    pub fn options(&self) -> Result<Options> {
        Ok(Options::from_table(&self.options)?)
    }
}

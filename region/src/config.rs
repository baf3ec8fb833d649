use serde::Deserialize;
use serde::Serialize;

use crate::error::RegionError;
use crate::error::Result;

/// Sizes are logical units; `unit_bytes` converts them to backing bytes.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub total_size: usize,
    pub os_reserved: usize,
    pub unit_bytes: usize,
    pub auto_compact_threshold: f64,
}

impl RegionConfig {
    pub const DEFAULT_TOTAL_SIZE: usize = 1024;
    pub const DEFAULT_OS_RESERVED: usize = 256;
    pub const DEFAULT_UNIT_BYTES: usize = 1024;
    pub const DEFAULT_AUTO_COMPACT_THRESHOLD: f64 = 30.0;

    pub fn new(total_size: usize, os_reserved: usize) -> Self {
        Self {
            total_size,
            os_reserved,
            ..Self::default()
        }
    }

    pub fn with_unit_bytes(mut self, unit_bytes: usize) -> Self {
        self.unit_bytes = unit_bytes;
        self
    }

    pub fn user_size(&self) -> usize {
        self.total_size - self.os_reserved
    }

    pub fn validate(&self) -> Result<()> {
        if self.os_reserved >= self.total_size {
            return Err(RegionError::InvalidConfig(
                "os_reserved must be smaller than total_size",
            ));
        }
        if self.unit_bytes == 0 {
            return Err(RegionError::InvalidConfig("unit_bytes must be non-zero"));
        }
        if !(0.0..=100.0).contains(&self.auto_compact_threshold) {
            return Err(RegionError::InvalidConfig(
                "auto_compact_threshold must be a percentage",
            ));
        }
        Ok(())
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            total_size: Self::DEFAULT_TOTAL_SIZE,
            os_reserved: Self::DEFAULT_OS_RESERVED,
            unit_bytes: Self::DEFAULT_UNIT_BYTES,
            auto_compact_threshold: Self::DEFAULT_AUTO_COMPACT_THRESHOLD,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{BYTES_PER_KB, PERCENT_100};
use crate::unique::constants::*;
use crate::unique::cost::CostParams;
use crate::unique::error::{UniqueError, UniqueResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniqueConfig {
    pub memory_budget_bytes: usize,
    /// When set, the budget is this share of total system memory instead.
    pub memory_usage_percent: Option<f64>,
    pub temp_directory: PathBuf,
    pub io_buffer_size_kb: usize,
    pub merge_fan_in: usize,
    pub collapse_threshold: usize,
    pub tree_element_overhead: usize,
    pub cost: CostParams,
}

impl Default for UniqueConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_KB * BYTES_PER_KB,
            memory_usage_percent: None,
            temp_directory: std::env::temp_dir(),
            io_buffer_size_kb: DISK_BUFFER_SIZE_KB,
            merge_fan_in: MERGE_FAN_IN,
            collapse_threshold: COLLAPSE_THRESHOLD,
            tree_element_overhead: TREE_ELEMENT_OVERHEAD,
            cost: CostParams::default(),
        }
    }
}

impl UniqueConfig {
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self.memory_usage_percent = None;
        self
    }

    pub fn with_temp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_directory = dir.into();
        self
    }

    pub fn from_file(path: &Path) -> UniqueResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> UniqueResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> UniqueResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> UniqueResult<()> {
        if let Some(percent) = self.memory_usage_percent {
            if !(MIN_MEMORY_USAGE_PERCENT..=MAX_MEMORY_USAGE_PERCENT).contains(&percent) {
                return Err(UniqueError::InvalidConfig(format!(
                    "Memory usage percent must be between {} and {}",
                    MIN_MEMORY_USAGE_PERCENT, MAX_MEMORY_USAGE_PERCENT
                )));
            }
        } else if self.memory_budget_bytes < MIN_MEMORY_BUDGET_BYTES {
            return Err(UniqueError::InvalidConfig(format!(
                "Memory budget must be at least {} bytes",
                MIN_MEMORY_BUDGET_BYTES
            )));
        }

        if self.io_buffer_size_kb == 0 {
            return Err(UniqueError::InvalidConfig(
                "I/O buffer size must be positive".to_string(),
            ));
        }

        if self.merge_fan_in < MIN_MERGE_FAN_IN {
            return Err(UniqueError::InvalidConfig(format!(
                "Merge fan-in must be at least {}",
                MIN_MERGE_FAN_IN
            )));
        }

        if self.collapse_threshold < self.merge_fan_in {
            return Err(UniqueError::InvalidConfig(format!(
                "Collapse threshold {} must not be below merge fan-in {}",
                self.collapse_threshold, self.merge_fan_in
            )));
        }

        self.cost.validate()
    }

    pub fn memory_budget(&self) -> usize {
        match self.memory_usage_percent {
            Some(percent) => {
                use sysinfo::System;
                let mut system = System::new();
                system.refresh_memory();

                let total_memory = system.total_memory() as f64;
                ((total_memory * percent / PERCENT_100) as usize).max(MIN_MEMORY_BUDGET_BYTES)
            }
            None => self.memory_budget_bytes,
        }
    }

    pub fn io_buffer_size_bytes(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }

    /// Cost parameters with the merge shape taken from this engine config.
    pub fn cost_params(&self) -> CostParams {
        CostParams {
            merge_fan_in: self.merge_fan_in,
            collapse_threshold: self.collapse_threshold,
            tree_element_overhead: self.tree_element_overhead,
            ..self.cost.clone()
        }
    }
}

/// Bytes one tree entry is charged: overhead plus key, rounded to alignment.
pub fn element_size(tree_element_overhead: usize, key_size: usize) -> usize {
    let raw = tree_element_overhead + key_size;
    raw.div_ceil(ELEMENT_ALIGNMENT) * ELEMENT_ALIGNMENT
}

/// Elements a single tree may hold within `budget` bytes.
pub fn max_elements_for(budget: usize, tree_element_overhead: usize, key_size: usize) -> usize {
    budget / element_size(tree_element_overhead, key_size)
}

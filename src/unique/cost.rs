//! Cost of deduplicating through the unique engine, in disk-seek units.
//!
//! The optimizer compares these numbers against other plans, so what matters
//! is that they rank workloads the way the real algorithm would: more keys
//! never get cheaper and more memory never gets dearer.

use serde::{Deserialize, Serialize};
use std::f64::consts::{E, LN_2, PI};

use crate::unique::config::max_elements_for;
use crate::unique::constants::*;
use crate::unique::error::{UniqueError, UniqueResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParams {
    /// Bytes moved per disk seek.
    pub io_size: usize,
    /// Key comparisons that cost as much as one seek.
    pub compare_unit: f64,
    pub disk_seek_base_cost: f64,
    pub merge_fan_in: usize,
    pub collapse_threshold: usize,
    pub tree_element_overhead: usize,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            io_size: IO_SIZE,
            compare_unit: TIME_FOR_COMPARE_ROWID,
            disk_seek_base_cost: DISK_SEEK_BASE_COST,
            merge_fan_in: MERGE_FAN_IN,
            collapse_threshold: COLLAPSE_THRESHOLD,
            tree_element_overhead: TREE_ELEMENT_OVERHEAD,
        }
    }
}

impl CostParams {
    pub fn validate(&self) -> UniqueResult<()> {
        if self.io_size == 0 {
            return Err(UniqueError::InvalidConfig("Cost io_size must be positive".to_string()));
        }
        if !(self.compare_unit > 0.0) {
            return Err(UniqueError::InvalidConfig(
                "Cost compare_unit must be positive".to_string(),
            ));
        }
        if self.disk_seek_base_cost < 0.0 {
            return Err(UniqueError::InvalidConfig(
                "Cost disk_seek_base_cost must not be negative".to_string(),
            ));
        }
        if self.merge_fan_in < MIN_MERGE_FAN_IN || self.collapse_threshold < self.merge_fan_in {
            return Err(UniqueError::InvalidConfig(
                "Cost merge shape needs fan-in >= 2 and threshold >= fan-in".to_string(),
            ));
        }
        Ok(())
    }

    fn fan_in(&self) -> usize {
        self.merge_fan_in.max(MIN_MERGE_FAN_IN)
    }

    fn io_bytes(&self, elems: f64, key_size: usize) -> f64 {
        elems * key_size as f64 / self.io_size.max(1) as f64
    }
}

/// `log2(x!)` by Stirling's formula, `0` for `x <= 1`.
pub fn log2_n_fact(x: f64) -> f64 {
    if x <= 1.0 {
        return 0.0;
    }
    ((2.0 * PI * x).ln() / 2.0 + x * (x / E).ln()).max(0.0) / LN_2
}

/// Trees (and so runs) the engine builds for `n` distinct keys.
pub fn tree_count(n: u64, key_size: usize, memory_budget: usize, params: &CostParams) -> u64 {
    if n == 0 {
        return 0;
    }
    let per_tree = max_elements_for(memory_budget, params.tree_element_overhead, key_size).max(1);
    n.div_ceil(per_tree as u64)
}

/// Comparisons to build the trees, plus writing them out when there is
/// more than one.
///
/// Keys are modelled as spread evenly over the trees; each insert into a
/// tree of `m` keys costs about `2 * log2(m + 1)` comparisons.
pub fn cost_of_build(n: u64, key_size: usize, memory_budget: usize, params: &CostParams) -> f64 {
    let trees = tree_count(n, key_size, memory_budget, params);
    if trees == 0 {
        return 0.0;
    }
    let per_tree = n as f64 / trees as f64;
    let mut cost = 2.0 * trees as f64 * log2_n_fact(per_tree + 1.0) / params.compare_unit;

    if trees > 1 {
        // sequential writes; each run may end in a partial block
        cost += params.disk_seek_base_cost * (params.io_bytes(n as f64, key_size) + trees as f64);
    }
    cost
}

/// Collapse passes the multi-pass merger makes before its final merge of
/// `runs` runs.
///
/// While the last run index reaches the collapse threshold, runs are merged
/// in groups of `merge_fan_in` and the trailing group takes the leftovers.
/// The run count after a pass depends only on the count before it.
pub fn collapse_passes(runs: u64, params: &CostParams) -> u32 {
    let fan_in = params.fan_in() as u64;
    let threshold = params.collapse_threshold.max(params.fan_in()) as u64;
    let full_group_reach = fan_in * 3 / 2;

    let mut runs = runs;
    let mut passes = 0;
    while runs > 1 && runs - 1 >= threshold {
        let last = runs - 1;
        let full_groups = if last >= full_group_reach {
            (last - full_group_reach) / fan_in + 1
        } else {
            0
        };
        runs = full_groups + 1;
        passes += 1;
    }
    passes
}

/// Cost of merging `runs` runs holding `total_keys` keys in all down to one
/// sorted stream.
///
/// Every pass, collapse or final, reads and writes all the bytes once.
/// Comparisons are charged once for the whole merge: each key climbs about
/// `log2(runs)` heap levels at two comparisons per level, however the
/// passes group the runs.
pub fn cost_of_merging(runs: u64, total_keys: f64, key_size: usize, params: &CostParams) -> f64 {
    if runs <= 1 {
        return 0.0;
    }
    let passes = collapse_passes(runs, params) as f64 + 1.0;
    let io_cost = passes * 2.0 * params.io_bytes(total_keys, key_size);
    let compare_cost = 2.0 * total_keys * (runs as f64).log2() / params.compare_unit;
    io_cost + compare_cost
}

/// [`cost_of_merging`] for runs of the given sizes.
pub fn cost_of_merge(run_sizes: &[f64], key_size: usize, params: &CostParams) -> f64 {
    let total: f64 = run_sizes.iter().sum();
    cost_of_merging(run_sizes.len() as u64, total, key_size, params)
}

/// Reading the merged result back; free when everything stayed in memory.
pub fn cost_of_final_scan(n: u64, key_size: usize, trees: u64, params: &CostParams) -> f64 {
    if trees <= 1 {
        return 0.0;
    }
    params.io_bytes(n as f64, key_size).ceil()
}

/// Total cost of running `n` keys of `key_size` bytes through the engine
/// with `memory_budget` bytes, using explicit parameters.
pub fn estimate_cost_with(n: u64, key_size: usize, memory_budget: usize, params: &CostParams) -> f64 {
    let trees = tree_count(n, key_size, memory_budget, params);
    let mut cost = cost_of_build(n, key_size, memory_budget, params);
    if trees <= 1 {
        return cost;
    }

    cost += cost_of_merging(trees, n as f64, key_size, params);
    cost += cost_of_final_scan(n, key_size, trees, params);
    cost
}

/// [`estimate_cost_with`] using the stock parameters.
pub fn estimate_cost(n: u64, key_size: usize, memory_budget: usize) -> f64 {
    estimate_cost_with(n, key_size, memory_budget, &CostParams::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log2_n_fact_tracks_exact_values() {
        let exact = |n: u64| (1..=n).map(|k| (k as f64).log2()).sum::<f64>();
        for n in [5u64, 10, 50, 200] {
            let approx = log2_n_fact(n as f64);
            assert!((approx - exact(n)).abs() / exact(n) < 0.01, "n = {}", n);
        }
        assert_eq!(log2_n_fact(1.0), 0.0);
        assert_eq!(log2_n_fact(0.0), 0.0);
    }

    #[test]
    fn test_single_tree_is_comparisons_only() {
        let params = CostParams::default();
        let n = 1000;
        let cost = estimate_cost_with(n, 8, 1 << 20, &params);
        let expected = 2.0 * log2_n_fact(n as f64 + 1.0) / params.compare_unit;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_keys_cost_nothing() {
        assert_eq!(estimate_cost(0, 8, 4096), 0.0);
        assert_eq!(tree_count(0, 8, 4096, &CostParams::default()), 0);
    }

    #[test]
    fn test_tree_count_uses_element_size() {
        let params = CostParams::default();
        // 32-byte elements, 2 per tree
        assert_eq!(tree_count(5, 4, 64, &params), 3);
        // a budget below one element still builds one-key trees
        assert_eq!(tree_count(5, 4, 8, &params), 5);
    }

    #[test]
    fn test_merge_of_one_run_is_free() {
        assert_eq!(cost_of_merge(&[1000.0], 8, &CostParams::default()), 0.0);
        assert_eq!(cost_of_merge(&[], 8, &CostParams::default()), 0.0);
    }

    #[test]
    fn test_collapse_pass_adds_io() {
        let params = CostParams {
            compare_unit: f64::INFINITY,
            ..CostParams::default()
        };
        let io_per_pass = 2.0 * 16.0 * 1000.0 * 8.0 / params.io_size as f64;

        // 15 runs merge in one pass, 16 need a collapse pass first
        let fifteen = cost_of_merge(&[1000.0; 15], 8, &params);
        let sixteen = cost_of_merge(&[1000.0; 16], 8, &params);
        assert!((fifteen - io_per_pass * 15.0 / 16.0).abs() < 1e-9);
        assert!((sixteen - 2.0 * io_per_pass).abs() < 1e-9);
    }

    #[test]
    fn test_collapse_pass_counts() {
        let params = CostParams::default();
        assert_eq!(collapse_passes(0, &params), 0);
        assert_eq!(collapse_passes(15, &params), 0);
        assert_eq!(collapse_passes(16, &params), 1);
        assert_eq!(collapse_passes(1_000_000, &params), 6);

        let pairs = CostParams {
            merge_fan_in: 2,
            collapse_threshold: 2,
            ..CostParams::default()
        };
        // up to five runs: one pair plus a trailing group, then the final merge
        assert_eq!(collapse_passes(3, &pairs), 1);
        assert_eq!(collapse_passes(5, &pairs), 1);
        assert_eq!(collapse_passes(6, &pairs), 2);
    }

    #[test]
    fn test_huge_inputs_need_no_per_run_state() {
        // tens of billions of one-key runs
        let n = u32::MAX as u64 * 4;
        let cost = estimate_cost(n, 8, 64);
        assert!(cost.is_finite());
        assert!(cost > estimate_cost(n, 8, 1 << 30));
        assert!(collapse_passes(n, &CostParams::default()) < 16);
    }

    #[test]
    fn test_run_sizes_only_matter_in_total() {
        let params = CostParams::default();
        let even = cost_of_merge(&[500.0; 20], 8, &params);
        let mut skewed = vec![1.0; 19];
        skewed.push(10_000.0 - 19.0);
        let skewed = cost_of_merge(&skewed, 8, &params);
        assert!((even - skewed).abs() < 1e-9);
        assert!((even - cost_of_merging(20, 10_000.0, 8, &params)).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_parameters_stay_finite() {
        let params = CostParams {
            io_size: 1,
            compare_unit: 1e-6,
            disk_seek_base_cost: 1e6,
            merge_fan_in: 2,
            collapse_threshold: 2,
            tree_element_overhead: 0,
        };
        let cost = estimate_cost_with(100_000, 16, 256, &params);
        assert!(cost.is_finite());
        assert!(cost > estimate_cost_with(100_000, 16, 256, &CostParams::default()));
    }

    #[test]
    fn test_params_validation() {
        assert!(CostParams::default().validate().is_ok());
        let bad = CostParams {
            compare_unit: 0.0,
            ..CostParams::default()
        };
        assert!(bad.validate().is_err());
        let bad = CostParams {
            merge_fan_in: 1,
            ..CostParams::default()
        };
        assert!(bad.validate().is_err());
    }
}

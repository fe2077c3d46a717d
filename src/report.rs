// In: src/report.rs

//! Per-unit statistics and their reduction into one run-level report.
//!
//! Workers only ever produce `UnitReport`s and send them back to the coordinator.
//! Everything that needs the full picture (such as the cross-warehouse group check)
//! happens in a `ReportReducer` after the pool has joined, so the reduction strategy
//! can change without touching per-block code.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::BloarkError;
use crate::pool::UnitOutcome;
use crate::warehouse::WarehouseSummary;

/// Statistics of one successfully processed unit.
///
/// `blocks_in == blocks_out + blocks_dropped + blocks_skipped` always holds.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: PathBuf,
    pub blocks_in: u64,
    pub blocks_out: u64,
    /// Dropped on purpose by a profile, including blocks of dropped groups.
    pub blocks_dropped: u64,
    pub groups_dropped: u64,
    /// Lost to block-scoped errors (malformed revisions, failing profiles).
    pub blocks_skipped: u64,
    pub profile_errors: u64,
    pub warehouses: Vec<WarehouseSummary>,
}

impl UnitReport {
    pub fn new(unit: impl Into<PathBuf>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedUnit {
    pub unit: PathBuf,
    pub error: String,
}

/// The outcome of a whole Builder or Modifier run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: Vec<FailedUnit>,
    pub units_not_run: Vec<PathBuf>,
    pub warehouses: Vec<WarehouseSummary>,
    pub blocks_in: u64,
    pub blocks_out: u64,
    pub blocks_dropped: u64,
    pub groups_dropped: u64,
    pub blocks_skipped: u64,
    pub profile_errors: u64,
    /// Grouping keys found in more than one output warehouse.
    pub duplicate_groups: Vec<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.units_failed.is_empty() && self.units_not_run.is_empty() && self.duplicate_groups.is_empty()
    }

    /// Units worth handing to a fresh run: everything that failed or never started.
    pub fn retry_units(&self) -> Vec<PathBuf> {
        let mut units: Vec<PathBuf> = self.units_failed.iter().map(|f| f.unit.clone()).collect();
        units.extend(self.units_not_run.iter().cloned());
        units.sort();
        units
    }

    pub fn to_json(&self) -> Result<String, BloarkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn log_summary(&self, label: &str) {
        log::info!(
            "{} finished in {:.1}s: {}/{} units succeeded, {} failed, {} not run",
            label,
            self.elapsed.as_secs_f64(),
            self.units_succeeded,
            self.units_total,
            self.units_failed.len(),
            self.units_not_run.len()
        );
        log::info!(
            "{} warehouses written; blocks in={} out={} dropped={} skipped={} (profile errors={}), groups dropped={}",
            self.warehouses.len(),
            self.blocks_in,
            self.blocks_out,
            self.blocks_dropped,
            self.blocks_skipped,
            self.profile_errors,
            self.groups_dropped
        );
        for failed in &self.units_failed {
            log::error!("Failed unit {}: {}", failed.unit.display(), failed.error);
        }
    }
}

/// Combines per-unit outcomes into a run report.
pub trait ReportReducer: Send + Sync {
    fn merge(&self, outcomes: Vec<UnitOutcome<UnitReport>>) -> RunReport;
}

/// Sums the partial reports and checks that no grouping key landed in two warehouses.
#[derive(Debug, Clone, Copy)]
pub struct DefaultReducer {
    pub verify_group_uniqueness: bool,
}

impl Default for DefaultReducer {
    fn default() -> Self {
        Self {
            verify_group_uniqueness: true,
        }
    }
}

impl ReportReducer for DefaultReducer {
    fn merge(&self, outcomes: Vec<UnitOutcome<UnitReport>>) -> RunReport {
        let mut report = RunReport {
            units_total: outcomes.len(),
            ..RunReport::default()
        };

        for outcome in outcomes {
            match outcome {
                UnitOutcome::Succeeded { value, .. } => {
                    report.units_succeeded += 1;
                    report.blocks_in += value.blocks_in;
                    report.blocks_out += value.blocks_out;
                    report.blocks_dropped += value.blocks_dropped;
                    report.groups_dropped += value.groups_dropped;
                    report.blocks_skipped += value.blocks_skipped;
                    report.profile_errors += value.profile_errors;
                    report.warehouses.extend(value.warehouses);
                }
                UnitOutcome::Failed { unit, error } => report.units_failed.push(FailedUnit {
                    unit,
                    error: error.to_string(),
                }),
                UnitOutcome::NotRun { unit } => report.units_not_run.push(unit),
            }
        }
        report.warehouses.sort_by(|a, b| a.path.cmp(&b.path));

        if self.verify_group_uniqueness {
            report.duplicate_groups = find_duplicate_groups(&report.warehouses);
        }
        report
    }
}

fn find_duplicate_groups(warehouses: &[WarehouseSummary]) -> Vec<String> {
    let mut homes: BTreeMap<&str, BTreeSet<&PathBuf>> = BTreeMap::new();
    for warehouse in warehouses {
        for key in &warehouse.group_keys {
            homes.entry(key.as_str()).or_default().insert(&warehouse.path);
        }
    }

    homes
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(key, paths)| {
            log::error!(
                "Group '{}' is split across {} warehouses: {:?}",
                key,
                paths.len(),
                paths
            );
            key.to_string()
        })
        .collect()
}

//! Computed-value registry.
//!
//! Elements publish named scalars here so other elements can refer to them by
//! name instead of by wiring. Each key has at most one master writer; writes
//! from anyone else are rejected and recorded as a conflict.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::circuit::ElementId;
use crate::error::{Result, SimError};

/// A live registry entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedEntry {
    pub value: f64,
    /// Timestep count at the last accepted write
    pub last_written_step: u64,
}

/// Two elements claiming the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MastershipConflict {
    pub key: String,
    pub master: ElementId,
    pub claimant: ElementId,
}

impl MastershipConflict {
    pub fn to_error(&self) -> SimError {
        SimError::MastershipConflict {
            key: self.key.clone(),
            master: self.master,
            claimant: self.claimant,
        }
    }
}

/// Keyed store of computed values with single-writer ownership.
#[derive(Debug, Default)]
pub struct ComputedValues {
    values: HashMap<String, ComputedEntry>,
    converged: HashMap<String, f64>,
    masters: HashMap<String, ElementId>,
    computed_this_step: HashSet<String>,
    conflicts: BTreeSet<(String, ElementId, ElementId)>,
    current_step: u64,
}

impl ComputedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim mastership of `key`. Claiming a key you already own is a no-op.
    pub fn claim_master(&mut self, key: &str, candidate: ElementId) -> Result<()> {
        match self.masters.get(key) {
            Some(&master) if master != candidate => {
                let conflict = self.record_conflict(key, master, candidate);
                Err(conflict.to_error())
            }
            Some(_) => Ok(()),
            None => {
                self.masters.insert(key.to_string(), candidate);
                Ok(())
            }
        }
    }

    /// Whether `candidate` is the master writer of `key`.
    pub fn is_master(&self, key: &str, candidate: ElementId) -> bool {
        self.masters.get(key) == Some(&candidate)
    }

    pub fn master_of(&self, key: &str) -> Option<ElementId> {
        self.masters.get(key).copied()
    }

    /// Drop every ownership claim. Topology analysis re-claims from scratch.
    pub fn clear_masters(&mut self) {
        self.masters.clear();
        self.conflicts.clear();
    }

    /// Write a value. The first writer of an unowned key becomes its master;
    /// a write by anyone else is rejected.
    pub fn set_computed_value(&mut self, key: &str, value: f64, writer: ElementId) -> Result<()> {
        self.claim_master(key, writer)?;
        let step = self.current_step;
        self.values
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value;
                e.last_written_step = step;
            })
            .or_insert(ComputedEntry {
                value,
                last_written_step: step,
            });
        Ok(())
    }

    /// Latest value of `key`, if anything wrote it this run.
    pub fn get_computed_value(&self, key: &str) -> Option<f64> {
        self.values.get(key).map(|e| e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&ComputedEntry> {
        self.values.get(key)
    }

    /// Value of `key` at the end of the last committed timestep.
    pub fn get_converged_value(&self, key: &str) -> Option<f64> {
        self.converged.get(key).copied()
    }

    pub fn mark_computed_this_step(&mut self, key: &str) {
        if !self.computed_this_step.contains(key) {
            self.computed_this_step.insert(key.to_string());
        }
    }

    pub fn was_computed_this_step(&self, key: &str) -> bool {
        self.computed_this_step.contains(key)
    }

    /// Start a new timestep: forget which keys were computed.
    pub fn begin_timestep(&mut self, step: u64) {
        self.current_step = step;
        self.computed_this_step.clear();
    }

    /// Snapshot every live value as the converged state.
    pub fn commit_converged(&mut self) {
        for (key, entry) in &self.values {
            match self.converged.get_mut(key) {
                Some(v) => *v = entry.value,
                None => {
                    self.converged.insert(key.clone(), entry.value);
                }
            }
        }
    }

    /// Forget all values. Ownership claims are kept since they follow topology.
    pub fn clear(&mut self) {
        self.values.clear();
        self.converged.clear();
        self.computed_this_step.clear();
        self.current_step = 0;
    }

    /// Recorded ownership conflicts, ordered by key.
    pub fn conflicts(&self) -> Vec<MastershipConflict> {
        self.conflicts
            .iter()
            .map(|(key, master, claimant)| MastershipConflict {
                key: key.clone(),
                master: *master,
                claimant: *claimant,
            })
            .collect()
    }

    /// Sorted key names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn record_conflict(&mut self, key: &str, master: ElementId, claimant: ElementId) -> MastershipConflict {
        if self
            .conflicts
            .insert((key.to_string(), master, claimant))
        {
            warn!(key, %master, %claimant, "computed value claimed by two elements");
        }
        MastershipConflict {
            key: key.to_string(),
            master,
            claimant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_round_trip() {
        let mut values = ComputedValues::new();
        values.set_computed_value("GDP", 42.5, ElementId(1)).unwrap();
        assert_eq!(values.get_computed_value("GDP"), Some(42.5));
        assert!(values.is_master("GDP", ElementId(1)));
        assert!(!values.is_master("GDP", ElementId(2)));
    }

    #[test]
    fn test_second_writer_rejected() {
        let mut values = ComputedValues::new();
        values.set_computed_value("M", 1.0, ElementId(1)).unwrap();

        let err = values.set_computed_value("M", 9.0, ElementId(2)).unwrap_err();
        assert!(matches!(err, SimError::MastershipConflict { .. }));
        assert_eq!(values.get_computed_value("M"), Some(1.0));

        let conflicts = values.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "M");
        assert_eq!(conflicts[0].master, ElementId(1));
        assert_eq!(conflicts[0].claimant, ElementId(2));

        // Repeated rejections are recorded once
        let _ = values.set_computed_value("M", 9.0, ElementId(2));
        assert_eq!(values.conflicts().len(), 1);
    }

    #[test]
    fn test_absent_reads() {
        let values = ComputedValues::new();
        assert_eq!(values.get_computed_value("missing"), None);
        assert_eq!(values.get_converged_value("missing"), None);
        assert!(!values.was_computed_this_step("missing"));
    }

    #[test]
    fn test_converged_snapshot_lags_live_value() {
        let mut values = ComputedValues::new();
        values.set_computed_value("x", 1.0, ElementId(0)).unwrap();
        values.commit_converged();
        values.set_computed_value("x", 2.0, ElementId(0)).unwrap();

        assert_eq!(values.get_computed_value("x"), Some(2.0));
        assert_eq!(values.get_converged_value("x"), Some(1.0));
    }

    #[test]
    fn test_computed_this_step_cleared_per_timestep() {
        let mut values = ComputedValues::new();
        values.begin_timestep(3);
        values.set_computed_value("y", 0.0, ElementId(4)).unwrap();
        values.mark_computed_this_step("y");
        assert!(values.was_computed_this_step("y"));
        assert_eq!(values.entry("y").map(|e| e.last_written_step), Some(3));

        values.begin_timestep(4);
        assert!(!values.was_computed_this_step("y"));
        assert_eq!(values.get_computed_value("y"), Some(0.0));
    }

    #[test]
    fn test_clear_keeps_masters() {
        let mut values = ComputedValues::new();
        values.claim_master("k", ElementId(7)).unwrap();
        values.set_computed_value("k", 3.0, ElementId(7)).unwrap();
        values.clear();
        assert!(values.is_empty());
        assert!(values.is_master("k", ElementId(7)));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Weighted job progress
//!
//! Each partition contributes [`PARTITION_UNITS`] units split across its
//! pipeline steps. One extra unit is only granted by [`ProgressTracker::finish`],
//! so the fraction reaches 1.0 exactly when the whole job is done.

/// Pipeline steps that carry progress weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Backup,
    Transform,
    Format,
    Mount,
    Restore,
    Cleanup,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Backup,
        Step::Transform,
        Step::Format,
        Step::Mount,
        Step::Restore,
        Step::Cleanup,
    ];

    /// Copy steps dominate elapsed time
    pub fn weight(self) -> u32 {
        match self {
            Step::Backup => 40,
            Step::Transform => 10,
            Step::Format => 10,
            Step::Mount => 2,
            Step::Restore => 35,
            Step::Cleanup => 3,
        }
    }
}

pub const PARTITION_UNITS: u32 = 100;

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_units: f64,
    done_units: f64,
    partition_start: f64,
    step_start: f64,
}

impl ProgressTracker {
    pub fn new(partitions: usize) -> Self {
        Self {
            total_units: (partitions as f64) * f64::from(PARTITION_UNITS) + 1.0,
            done_units: 0.0,
            partition_start: 0.0,
            step_start: 0.0,
        }
    }

    fn fraction(&self) -> f64 {
        (self.done_units / self.total_units).min(1.0)
    }

    /// Start the next partition
    pub fn begin_partition(&mut self) {
        self.partition_start = self.done_units;
        self.step_start = self.done_units;
    }

    /// Fraction while `step` is `within` (0..=1) done
    pub fn within(&mut self, step: Step, within: f64) -> f64 {
        let reached = self.step_start + f64::from(step.weight()) * within.clamp(0.0, 1.0);
        self.done_units = self.done_units.max(reached);
        self.fraction()
    }

    /// Fraction once `step` is complete
    pub fn complete(&mut self, step: Step) -> f64 {
        let fraction = self.within(step, 1.0);
        self.step_start = self.done_units;
        fraction
    }

    /// Fraction once the current partition is complete, whichever steps ran
    pub fn complete_partition(&mut self) -> f64 {
        self.done_units = self
            .done_units
            .max(self.partition_start + f64::from(PARTITION_UNITS));
        self.partition_start = self.done_units;
        self.step_start = self.done_units;
        self.fraction()
    }

    pub fn finish(&mut self) -> f64 {
        self.done_units = self.total_units;
        1.0
    }
}

//! Progress aggregation - completion percentages per sub-block, block and routine

use std::collections::HashMap;

use crate::routine::Routine;

use super::CompletionStore;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubBlockProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u32,
    pub is_completed: bool,
    pub is_in_progress: bool,
}

impl SubBlockProgress {
    fn new(completed: usize, total: usize) -> Self {
        Self {
            completed,
            total,
            percent: percent(completed, total),
            is_completed: total > 0 && completed == total,
            is_in_progress: completed > 0 && completed < total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub global_percent: u32,
    pub per_block: HashMap<String, u32>,
    pub per_sub_block: HashMap<String, SubBlockProgress>,
}

impl Progress {
    pub fn sub_block(&self, sub_block_id: &str) -> SubBlockProgress {
        self.per_sub_block.get(sub_block_id).copied().unwrap_or_default()
    }

    pub fn block_percent(&self, block_id: &str) -> u32 {
        self.per_block.get(block_id).copied().unwrap_or(0)
    }

    pub fn is_routine_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Rounded percentage, 0 for an empty denominator
pub fn percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 * 100.0) / total as f64).round() as u32
}

/// Reduce a routine and its completion map into percentages.
///
/// Denominators count elements (sets or superset rounds per exercise), not
/// exercises. Pass a routine filtered to one block to scope the global figure.
pub fn aggregate(routine: &Routine, completion: &CompletionStore) -> Progress {
    let mut progress = Progress::default();

    for block in &routine.blocks {
        let mut block_completed = 0;
        let mut block_total = 0;

        for sub_block in &block.sub_blocks {
            let elements = sub_block.elements();
            let total = elements.len();
            let completed = elements.iter().filter(|el| completion.is_completed(el)).count();

            progress
                .per_sub_block
                .insert(sub_block.id.clone(), SubBlockProgress::new(completed, total));
            block_completed += completed;
            block_total += total;
        }

        progress
            .per_block
            .insert(block.id.clone(), percent(block_completed, block_total));
        progress.completed += block_completed;
        progress.total += block_total;
    }

    progress.global_percent = percent(progress.completed, progress.total);
    progress
}

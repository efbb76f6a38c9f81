/// Result of an integrity walk over one arena.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub errors_found: usize,
    /// Blocks whose size is zero or runs past the frontier.
    pub partition_errors: usize,
    /// Two free blocks side by side, or a free block touching the frontier.
    pub uncoalesced_blocks: usize,
    /// Free blocks missing from their list, or list entries that are not free blocks.
    pub free_list_errors: usize,
    /// Header counters that disagree with the walk.
    pub counter_mismatches: usize,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.errors_found == 0
    }

    pub(crate) fn partition_error(&mut self) {
        self.partition_errors += 1;
        self.errors_found += 1;
    }

    pub(crate) fn uncoalesced(&mut self) {
        self.uncoalesced_blocks += 1;
        self.errors_found += 1;
    }

    pub(crate) fn free_list_error(&mut self) {
        self.free_list_errors += 1;
        self.errors_found += 1;
    }

    pub(crate) fn counter_mismatch(&mut self) {
        self.counter_mismatches += 1;
        self.errors_found += 1;
    }
}

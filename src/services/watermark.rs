/// Highest block whose logs have all been applied to the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkTracker {
    last_checked_block: u64,
}

impl WatermarkTracker {
    pub fn new(last_checked_block: u64) -> Self {
        Self { last_checked_block }
    }

    /// Starting point for a fresh process: the observed head, or an explicit
    /// earlier block when one is configured. Never ahead of the head.
    pub fn starting_at(head: u64, start_block: Option<u64>) -> Self {
        Self::new(start_block.map_or(head, |block| block.min(head)))
    }

    pub fn get(&self) -> u64 {
        self.last_checked_block
    }

    /// Moves the watermark forward. Returns `false` and leaves the value
    /// untouched when `to` is behind the current watermark.
    pub fn advance(&mut self, to: u64) -> bool {
        if to < self.last_checked_block {
            tracing::warn!(
                watermark = self.last_checked_block,
                requested = to,
                "Refusing to move watermark backwards"
            );
            return false;
        }
        self.last_checked_block = to;
        true
    }
}

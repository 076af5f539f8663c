//! Ingestion cursor: tracks how far the event log has been applied.

use serde::{Deserialize, Serialize};

use crate::types::LogPosition;

/// The listener's position in the contract's event log.
///
/// The cursor knows:
/// - The last log whose effects were durably applied (if any)
/// - The configured start block, used while nothing has been applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    last_applied: Option<LogPosition>,
    start_block: u64,
}

impl Cursor {
    /// A cursor that has applied nothing; scanning begins at `start_block`.
    pub fn new(start_block: u64) -> Self {
        Self {
            last_applied: None,
            start_block,
        }
    }

    /// A cursor resumed from a persisted position.
    pub fn resume(position: LogPosition, start_block: u64) -> Self {
        Self {
            last_applied: Some(position),
            start_block,
        }
    }

    /// Advance to `position`. Never moves backwards.
    pub fn advance(&mut self, position: LogPosition) {
        match self.last_applied {
            Some(last) if last >= position => {}
            _ => self.last_applied = Some(position),
        }
    }

    /// Last applied position, `None` if nothing was applied yet.
    pub fn last_applied(&self) -> Option<LogPosition> {
        self.last_applied
    }

    /// Last applied block number, `None` if nothing was applied yet.
    pub fn block_number(&self) -> Option<u64> {
        self.last_applied.map(|p| p.block_number)
    }

    /// First block a pull-mode scan must request.
    ///
    /// The last applied block is requested again: it may have been applied
    /// only partially, and re-applying its earlier logs is a no-op.
    pub fn fetch_from(&self) -> u64 {
        match self.last_applied {
            Some(p) => p.block_number.max(self.start_block),
            None => self.start_block,
        }
    }

    /// Returns `true` if `position` is at or before the last applied log.
    pub fn covers(&self, position: LogPosition) -> bool {
        self.last_applied.is_some_and(|last| position <= last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cursor_starts_at_start_block() {
        let cursor = Cursor::new(500);
        assert_eq!(cursor.fetch_from(), 500);
        assert!(cursor.last_applied().is_none());
        assert!(!cursor.covers(LogPosition::new(0, 0)));
    }

    #[test]
    fn cursor_advance_is_monotonic() {
        let mut cursor = Cursor::new(0);
        cursor.advance(LogPosition::new(11, 2));
        cursor.advance(LogPosition::new(10, 7)); // late log, ignored
        assert_eq!(cursor.last_applied(), Some(LogPosition::new(11, 2)));
        cursor.advance(LogPosition::new(11, 3));
        assert_eq!(cursor.block_number(), Some(11));
    }

    #[test]
    fn fetch_from_rescans_last_block() {
        let cursor = Cursor::resume(LogPosition::new(11, 0), 5);
        assert_eq!(cursor.fetch_from(), 11);
        assert!(cursor.covers(LogPosition::new(11, 0)));
        assert!(!cursor.covers(LogPosition::new(11, 1)));
        assert!(!cursor.covers(LogPosition::new(12, 0)));
    }

    #[test]
    fn start_block_wins_over_older_checkpoint() {
        let cursor = Cursor::resume(LogPosition::new(3, 0), 100);
        assert_eq!(cursor.fetch_from(), 100);
    }
}

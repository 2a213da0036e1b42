use std::collections::VecDeque;

use crate::limits::HISTORY_CAPACITY;

/// Bounded undo/redo over deep-copied snapshots.
///
/// `cursor` points at the snapshot matching the live state; `None` means
/// nothing has been recorded yet. Recording after an undo discards the
/// redo branch. Past `capacity`, the oldest snapshot is evicted.
#[derive(Debug, Clone)]
pub struct History<S> {
    entries: VecDeque<S>,
    cursor: Option<usize>,
    capacity: usize,
}

impl<S: Clone> Default for History<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone> History<S> {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, snapshot: S) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        } else {
            self.entries.clear();
        }
        self.entries.push_back(snapshot);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }

    /// Step back. `None` when already at the oldest snapshot.
    pub fn undo(&mut self) -> Option<&S> {
        let cursor = self.cursor.filter(|c| *c > 0)? - 1;
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }

    /// Step forward. `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<&S> {
        let cursor = self.cursor.filter(|c| c + 1 < self.entries.len())? + 1;
        self.cursor = Some(cursor);
        self.entries.get(cursor)
    }
}

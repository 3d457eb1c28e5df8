//! Lock-protected sequence of pending operations.

use parking_lot::RwLock;

use super::operation::Operation;

/// Pending operations awaiting the next flush.
///
/// Every mutation takes the write lock. [`PendingQueue::drain_all`] is the
/// single hand-off point to the flush engine: an item is either returned by
/// exactly one drain or still pending, never both.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: RwLock<Vec<Operation>>,
}

impl PendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation. Returns the size after the append.
    pub fn push(&self, operation: Operation) -> usize {
        let mut items = self.items.write();
        items.push(operation);
        items.len()
    }

    /// Append many operations under one lock acquisition. Returns the size
    /// after the append.
    pub fn extend<I>(&self, operations: I) -> usize
    where
        I: IntoIterator<Item = Operation>,
    {
        let mut items = self.items.write();
        items.extend(operations);
        items.len()
    }

    /// Current number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Take every pending operation, leaving the queue empty.
    #[must_use]
    pub fn drain_all(&self) -> Vec<Operation> {
        std::mem::take(&mut *self.items.write())
    }

    /// Discard every pending operation. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items.write();
        let dropped = items.len();
        items.clear();
        dropped
    }
}

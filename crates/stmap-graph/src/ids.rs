//! Block and edge identities

use std::fmt;

/// Task block identity, unique within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

/// Edge identity, unique within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u32);

impl TaskId {
    /// Wrap a raw id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl EdgeId {
    /// Wrap a raw id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Monotonic id source shared by the blocks and edges of one graph.
///
/// Ids are never reused during the allocator's lifetime. `reset` is only
/// meant for starting a fresh graph; `observe` keeps the allocator ahead of
/// ids that were assigned externally.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Allocator starting at 0
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocator whose first id is `first`
    pub const fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Next id that will be handed out
    pub const fn peek(&self) -> u32 {
        self.next
    }

    /// Hand out a fresh task id
    pub fn task(&mut self) -> TaskId {
        TaskId(self.bump())
    }

    /// Hand out a fresh edge id
    pub fn edge(&mut self) -> EdgeId {
        EdgeId(self.bump())
    }

    /// Make sure `id` will never be handed out
    pub fn observe(&mut self, id: u32) {
        self.next = self.next.max(id.saturating_add(1));
    }

    /// Restart from 0
    pub fn reset(&mut self) {
        self.next = 0;
    }

    fn bump(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_shared_and_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.task(), TaskId::new(0));
        assert_eq!(ids.edge(), EdgeId::new(1));
        assert_eq!(ids.task(), TaskId::new(2));
    }

    #[test]
    fn test_observe_skips_external_ids() {
        let mut ids = IdAllocator::new();
        ids.observe(41);
        assert_eq!(ids.task().raw(), 42);
        ids.observe(10);
        assert_eq!(ids.peek(), 43);
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskId::new(7).to_string(), "T7");
        assert_eq!(EdgeId::new(3).to_string(), "E3");
    }
}

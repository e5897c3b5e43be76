//! Stack-discipline allocation tracking.
//!
//! Transient solver resources (connection indices, diagonals, scratch
//! buffers) must be released in exactly the reverse order of their
//! allocation. Rather than leaving that to caller discipline, allocations are
//! registered in a [`StackArena`] which hands out move-only [`ArenaSlot`]
//! handles and panics on any out-of-order or repeated release, turning a
//! silent corruption into an immediate hard failure.

/// Handle of one registered allocation. Move-only: releasing consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct ArenaSlot {
    id: u64,
    len: usize,
}

impl ArenaSlot {
    /// Registered length of the allocation.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the registered allocation is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// LIFO registry of live allocations.
#[derive(Debug, Default)]
pub struct StackArena {
    stack: Vec<u64>,
    next_id: u64,
    used: usize,
}

impl StackArena {
    /// New empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an allocation of `len` elements; returns its slot handle.
    pub fn alloc(&mut self, len: usize) -> ArenaSlot {
        let id = self.next_id;
        self.next_id += 1;
        self.stack.push(id);
        self.used += len;
        ArenaSlot { id, len }
    }

    /// Release the most recent live allocation.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not the top of the stack: releases must happen in
    /// exactly reverse order of allocation.
    pub fn release(&mut self, slot: ArenaSlot) {
        match self.stack.last() {
            Some(&top) if top == slot.id => {
                self.stack.pop();
                self.used -= slot.len;
            }
            _ => panic!(
                "out-of-order arena release: slot {} is not the most recent allocation",
                slot.id
            ),
        }
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.stack.len()
    }

    /// Total registered length of live allocations.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Whether no allocations are live.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_release() {
        let mut arena = StackArena::new();
        let a = arena.alloc(10);
        let b = arena.alloc(20);
        assert_eq!(arena.live(), 2);
        assert_eq!(arena.used(), 30);
        arena.release(b);
        arena.release(a);
        assert!(arena.is_empty());
        assert_eq!(arena.used(), 0);
    }

    #[test]
    #[should_panic(expected = "out-of-order arena release")]
    fn test_out_of_order_release_panics() {
        let mut arena = StackArena::new();
        let a = arena.alloc(10);
        let _b = arena.alloc(20);
        arena.release(a);
    }

    #[test]
    fn test_interleaved_scopes() {
        let mut arena = StackArena::new();
        let a = arena.alloc(5);
        let b = arena.alloc(7);
        arena.release(b);
        let c = arena.alloc(3);
        arena.release(c);
        arena.release(a);
        assert!(arena.is_empty());
    }
}

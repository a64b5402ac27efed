//! Indexed binary min-heap.
//!
//! The heap stores slot ids, not values. Priorities and back-pointers live
//! in an arena that the heap reaches through `HeapArena`: every time an
//! entry moves, the arena is told its new position. With that position
//! cached, removing or re-keying an arbitrary entry is O(log n) instead of
//! a linear search.

/// Storage the heap orders and reports positions back to.
pub trait HeapArena {
    type Priority: Ord;

    fn priority(&self, slot: usize) -> Self::Priority;

    fn set_heap_index(&mut self, slot: usize, index: usize);
}

#[derive(Debug, Clone, Default)]
pub struct IndexedHeap {
    slots: Vec<usize>,
}

impl IndexedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot stored at heap position `index`.
    pub fn get(&self, index: usize) -> Option<usize> {
        self.slots.get(index).copied()
    }

    /// Slot with the smallest priority.
    pub fn peek_min(&self) -> Option<usize> {
        self.slots.first().copied()
    }

    pub fn push<A: HeapArena + ?Sized>(&mut self, arena: &mut A, slot: usize) {
        let index = self.slots.len();
        self.slots.push(slot);
        arena.set_heap_index(slot, index);
        self.sift_up(arena, index);
    }

    /// Remove the entry at heap position `index` and return its slot.
    pub fn remove_at<A: HeapArena + ?Sized>(&mut self, arena: &mut A, index: usize) -> Option<usize> {
        let last = self.slots.len().checked_sub(1)?;
        if index > last {
            return None;
        }
        if index != last {
            self.swap(arena, index, last);
        }
        let slot = self.slots.pop()?;
        if index < self.slots.len() {
            self.fix(arena, index);
        }
        Some(slot)
    }

    /// Restore ordering after the priority of the entry at `index` changed.
    pub fn fix<A: HeapArena + ?Sized>(&mut self, arena: &mut A, index: usize) {
        if index >= self.slots.len() {
            return;
        }
        if !self.sift_down(arena, index) {
            self.sift_up(arena, index);
        }
    }

    /// Point heap position `index` at a different slot with the same
    /// priority. Used when the arena compacts and an entry changes slot.
    pub fn relocate(&mut self, index: usize, slot: usize) {
        if let Some(entry) = self.slots.get_mut(index) {
            *entry = slot;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    fn less<A: HeapArena + ?Sized>(&self, arena: &A, i: usize, j: usize) -> bool {
        arena.priority(self.slots[i]) < arena.priority(self.slots[j])
    }

    fn swap<A: HeapArena + ?Sized>(&mut self, arena: &mut A, i: usize, j: usize) {
        self.slots.swap(i, j);
        arena.set_heap_index(self.slots[i], i);
        arena.set_heap_index(self.slots[j], j);
    }

    fn sift_up<A: HeapArena + ?Sized>(&mut self, arena: &mut A, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(arena, index, parent) {
                break;
            }
            self.swap(arena, index, parent);
            index = parent;
        }
    }

    /// Returns true if the entry moved.
    fn sift_down<A: HeapArena + ?Sized>(&mut self, arena: &mut A, start: usize) -> bool {
        let len = self.slots.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(arena, right, left) {
                right
            } else {
                left
            };
            if !self.less(arena, child, index) {
                break;
            }
            self.swap(arena, index, child);
            index = child;
        }
        index > start
    }
}

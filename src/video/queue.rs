//! Bounded FIFO frame queue with oldest-entry eviction
//!
//! Both the capture side (pull-mode buffering) and the server ingress use this
//! queue. It never blocks a producer: pushing into a full queue evicts the
//! oldest entry and counts it as dropped. Owners wrap it in a mutex.

use std::collections::VecDeque;

use super::frame::FrameBuffer;

#[derive(Debug)]
pub struct FrameQueue<T = FrameBuffer> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry, returning the evicted oldest entry if the queue was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Take the oldest entry
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since creation or the last `reset`
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard every entry; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    /// Clear entries and zero the drop counter
    pub fn reset(&mut self) {
        self.items.clear();
        self.dropped = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_keeps_newest_in_order() {
        let mut queue = FrameQueue::new(30);
        for i in 0..35u32 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 30);
        assert_eq!(queue.dropped(), 5);
        let survivors: Vec<u32> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(survivors, (5..35).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_returns_evicted() {
        let mut queue = FrameQueue::new(2);
        assert_eq!(queue.push("a"), None);
        assert_eq!(queue.push("b"), None);
        assert!(queue.is_full());
        assert_eq!(queue.push("c"), Some("a"));
        assert_eq!(queue.peek(), Some(&"b"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_clear_and_reset() {
        let mut queue = FrameQueue::new(1);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
        queue.reset();
        assert_eq!(queue.dropped(), 0);
    }
}

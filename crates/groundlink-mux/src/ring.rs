use serde::{Deserialize, Serialize};

/// Default slot count for the inbound and outbound rings.
pub const DEFAULT_RING_CAPACITY: usize = 10;

/// What a full ring does with one more item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the incoming item; unconsumed items are never overwritten.
    #[default]
    DropNewest,
    /// Evict the oldest unconsumed item to make room.
    DropOldest,
}

/// Outcome of [`PacketRing::push`].
#[derive(Debug, PartialEq, Eq)]
pub enum Push<T> {
    Stored,
    /// The ring was full and the item was refused.
    Rejected(T),
    /// The ring was full; this oldest item was evicted to make room.
    Evicted(T),
}

/// Fixed-capacity FIFO with a producer index (`present`) and a consumer
/// index (`process`), both taken modulo the capacity.
///
/// A separate length distinguishes full from empty when the indices meet,
/// so `present` can never lap `process` and overwrite an unconsumed slot.
#[derive(Debug)]
pub struct PacketRing<T> {
    slots: Vec<Option<T>>,
    present: usize,
    process: usize,
    len: usize,
}

impl<T> PacketRing<T> {
    /// Create an empty ring. A zero capacity is raised to one slot.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            present: 0,
            process: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, item: T, policy: OverflowPolicy) -> Push<T> {
        if self.is_full() {
            return match policy {
                OverflowPolicy::DropNewest => Push::Rejected(item),
                OverflowPolicy::DropOldest => {
                    // Full ring: the slot at `process` is always occupied.
                    let evicted = self.pop();
                    self.store(item);
                    match evicted {
                        Some(old) => Push::Evicted(old),
                        None => Push::Stored,
                    }
                }
            };
        }
        self.store(item);
        Push::Stored
    }

    fn store(&mut self, item: T) {
        self.slots[self.present] = Some(item);
        self.present = (self.present + 1) % self.slots.len();
        self.len += 1;
    }

    /// Take the item at `process`, advancing it.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.process].take();
        self.process = (self.process + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Next slot the producer writes.
    pub fn present(&self) -> usize {
        self.present
    }

    /// Next slot the consumer reads.
    pub fn process(&self) -> usize {
        self.process
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_across_wraparound() {
        let mut ring = PacketRing::with_capacity(3);
        for round in 0..4 {
            for i in 0..3 {
                assert_eq!(ring.push(round * 10 + i, OverflowPolicy::DropNewest), Push::Stored);
            }
            assert!(ring.is_full());
            assert_eq!(ring.present(), ring.process());
            let drained: Vec<_> = std::iter::from_fn(|| ring.pop()).collect();
            assert_eq!(drained, vec![round * 10, round * 10 + 1, round * 10 + 2]);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn drop_newest_keeps_unconsumed_items() {
        let mut ring = PacketRing::with_capacity(2);
        ring.push('a', OverflowPolicy::DropNewest);
        ring.push('b', OverflowPolicy::DropNewest);
        assert_eq!(ring.push('c', OverflowPolicy::DropNewest), Push::Rejected('c'));
        assert_eq!(ring.pop(), Some('a'));
        assert_eq!(ring.pop(), Some('b'));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let mut ring = PacketRing::with_capacity(2);
        ring.push('a', OverflowPolicy::DropOldest);
        ring.push('b', OverflowPolicy::DropOldest);
        assert_eq!(ring.push('c', OverflowPolicy::DropOldest), Push::Evicted('a'));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some('b'));
        assert_eq!(ring.pop(), Some('c'));
    }

    #[test]
    fn indices_advance_modulo_capacity() {
        let mut ring = PacketRing::with_capacity(2);
        ring.push(1, OverflowPolicy::DropNewest);
        assert_eq!((ring.present(), ring.process()), (1, 0));
        ring.push(2, OverflowPolicy::DropNewest);
        assert_eq!((ring.present(), ring.process()), (0, 0));
        ring.pop();
        assert_eq!((ring.present(), ring.process()), (0, 1));
        ring.pop();
        assert_eq!((ring.present(), ring.process()), (0, 0));
    }

    #[test]
    fn zero_capacity_becomes_one() {
        let mut ring = PacketRing::with_capacity(0);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.push(7, OverflowPolicy::DropNewest), Push::Stored);
        assert_eq!(ring.push(8, OverflowPolicy::DropNewest), Push::Rejected(8));
    }

    #[test]
    fn policy_serializes_kebab_case() {
        let json = serde_json::to_string(&OverflowPolicy::DropOldest).unwrap();
        assert_eq!(json, "\"drop-oldest\"");
        let parsed: OverflowPolicy = serde_json::from_str("\"drop-newest\"").unwrap();
        assert_eq!(parsed, OverflowPolicy::DropNewest);
    }
}

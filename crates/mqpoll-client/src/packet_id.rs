//! Packet identifier allocation.
//!
//! Identifiers cycle 1..=65535 (0 means "no id") and are never handed out
//! again while the exchange that owns them is still open.

use ahash::AHashSet;

/// Cycling allocator for 16-bit packet identifiers.
#[derive(Debug)]
pub struct PacketIdAllocator {
    last: u16,
    in_use: AHashSet<u16>,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            last: 0,
            in_use: AHashSet::new(),
        }
    }

    /// Take the next free identifier after the last one issued.
    ///
    /// Returns `None` only when all 65535 identifiers are in flight.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.in_use.len() >= u16::MAX as usize {
            return None;
        }
        loop {
            self.last = (self.last % u16::MAX) + 1;
            if self.in_use.insert(self.last) {
                return Some(self.last);
            }
        }
    }

    /// Release an identifier once its exchange completes (PUBACK, PUBCOMP,
    /// SUBACK or UNSUBACK).
    pub fn release(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    /// Mark an identifier as taken.
    #[cfg(test)]
    pub fn reserve(&mut self, id: u16) {
        if id != 0 {
            self.in_use.insert(id);
        }
    }

    #[cfg(test)]
    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    #[cfg(test)]
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Forget every open exchange. The cycle position is kept.
    pub fn clear(&mut self) {
        self.in_use.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut ids = PacketIdAllocator::new();
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), Some(3));
    }

    #[test]
    fn test_wraps_past_zero() {
        let mut ids = PacketIdAllocator::new();
        ids.last = 65534;
        assert_eq!(ids.allocate(), Some(65535));
        assert_eq!(ids.allocate(), Some(1));
    }

    #[test]
    fn test_skips_in_flight() {
        let mut ids = PacketIdAllocator::new();
        ids.reserve(2);
        ids.reserve(3);
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(4));

        ids.release(2);
        ids.last = 1;
        assert_eq!(ids.allocate(), Some(2));
    }

    #[test]
    fn test_release_and_clear() {
        let mut ids = PacketIdAllocator::new();
        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();
        ids.release(a);
        assert!(!ids.is_in_use(a));
        assert!(ids.is_in_use(b));

        ids.clear();
        assert_eq!(ids.in_use_count(), 0);
        assert_eq!(ids.allocate(), Some(3));
    }

    #[test]
    fn test_exhausted() {
        let mut ids = PacketIdAllocator::new();
        for id in 1..=u16::MAX {
            ids.reserve(id);
        }
        assert_eq!(ids.allocate(), None);
        ids.release(500);
        assert_eq!(ids.allocate(), Some(500));
    }
}

//! Single-producer single-consumer ring queue.
//!
//! Used between the main thread and the light thread (propagation and
//! lighting requests one way, remesh requests the other). Capacity is fixed
//! at construction; pushing onto a full ring is a sizing bug and asserts.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: a slot is written by the producer strictly before the tail store
// that publishes it, and read by the consumer strictly before the head store
// that retires it, so the two sides never touch a slot concurrently.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let slots = (0..capacity + 1)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.slots.len() {
            0
        } else {
            next
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.next(self.tail.load(Ordering::Acquire)) == self.head.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            tail + self.slots.len() - head
        }
    }

    /// Producer side.
    pub fn push(&self, value: T) {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = self.next(tail);
        assert!(
            next != self.head.load(Ordering::Acquire),
            "spsc ring overflow"
        );
        // Safety: `tail` is owned by the producer and the slot is unreachable
        // by the consumer until the Release store below.
        unsafe {
            (*self.slots[tail].get()).write(value);
        }
        self.tail.store(next, Ordering::Release);
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        // Safety: the Acquire load above proves the producer finished writing
        // this slot, and the consumer owns `head`.
        let value = unsafe { (*self.slots[head].get()).assume_init_read() };
        self.head.store(self.next(head), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let ring = SpscRing::new(8);
        for i in 0..8 {
            ring.push(i);
        }
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn wraps_around() {
        let ring = SpscRing::new(4);
        for round in 0..10 {
            ring.push(round * 2);
            ring.push(round * 2 + 1);
            assert_eq!(ring.pop(), Some(round * 2));
            assert_eq!(ring.pop(), Some(round * 2 + 1));
        }
    }

    #[test]
    #[should_panic(expected = "spsc ring overflow")]
    fn overflow_panics() {
        let ring = SpscRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
    }

    #[test]
    fn fifo_under_stress() {
        let ring = Arc::new(SpscRing::new(64));
        let producer_ring = ring.clone();
        const COUNT: u64 = 100_000;

        let producer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < COUNT {
                if !producer_ring.is_full() {
                    producer_ring.push(next);
                    next += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u64;
        while expected < COUNT {
            if let Some(value) = ring.pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}

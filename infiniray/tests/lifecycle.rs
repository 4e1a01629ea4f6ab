#![cfg(target_family = "unix")]
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use infiniray::{AllocError, Backend, Error, MirrorBackend, MirrorBlock, OrAbort, RingArray};

thread_local! {
    static DEFAULTED: Cell<usize> = const { Cell::new(0) };
    static VALUED: Cell<usize> = const { Cell::new(0) };
    static CLONED: Cell<usize> = const { Cell::new(0) };
    static DROPPED: Cell<usize> = const { Cell::new(0) };
    static FRAGILE_DROPPED: Cell<usize> = const { Cell::new(0) };
}

fn bump(counter: &'static std::thread::LocalKey<Cell<usize>>) {
    counter.with(|c| c.set(c.get() + 1));
}

fn count(counter: &'static std::thread::LocalKey<Cell<usize>>) -> usize {
    counter.with(Cell::get)
}

fn constructed() -> usize {
    count(&DEFAULTED) + count(&VALUED) + count(&CLONED)
}

/// Counts its constructions and drops, per test thread.
#[derive(Debug, PartialEq)]
struct Counted {
    value: i64,
}

impl Counted {
    fn new(value: i64) -> Self {
        bump(&VALUED);
        Counted { value }
    }
}

impl Default for Counted {
    fn default() -> Self {
        bump(&DEFAULTED);
        Counted { value: 0 }
    }
}

impl Clone for Counted {
    fn clone(&self) -> Self {
        bump(&CLONED);
        Counted { value: self.value }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        bump(&DROPPED);
    }
}

#[test]
fn constructions_match_drops() {
    {
        let mut tests = RingArray::<Counted>::new(1024).unwrap();
        tests.emplace_with(|| Counted::new(12)).unwrap();
        tests.push(Counted::new(11)).unwrap();

        let head = tests[..2].to_vec();
        tests.append(head).unwrap();
        tests.resize_default(8).unwrap();
        tests.append([7, 8, 9, 10].map(Counted::new)).unwrap();
        assert_eq!(tests.len(), 12);

        assert_eq!(tests.erase(3), 3);
        assert_eq!(tests.pop_front().map(|c| c.value), Some(11));
        tests.truncate(5);
        tests.resize(7, Counted::new(1)).unwrap();
        assert_eq!(tests.len(), 7);
        assert_eq!(count(&DROPPED) + tests.len(), constructed());
    }

    assert_eq!(count(&DROPPED), constructed());
}

#[test]
fn clear_and_refill_drops_everything() {
    {
        let mut ring = RingArray::<Counted>::new(64).unwrap();
        let cap = ring.capacity();

        for round in 0..5 {
            ring.resize_with(cap, || Counted::new(round)).unwrap();
            ring.erase(cap / 3);
            ring.extend_from_slice(&[Counted::new(-1), Counted::new(-2)]).unwrap();
            ring.clear();
            assert!(ring.is_empty());
        }

        ring.resize_default(cap).unwrap();
        let overflow = ring.push(Counted::new(0));
        assert!(matches!(overflow, Err(Error::CapacityExceeded { .. })));
    }

    assert_eq!(count(&DROPPED), constructed());
}

#[test]
fn bounds_and_capacity_are_enforced() {
    let mut ring = RingArray::<u8>::new(10).unwrap();
    let cap = ring.capacity();
    ring.resize(cap, 1).unwrap();

    assert!(matches!(
        ring.push(2),
        Err(Error::CapacityExceeded { capacity, requested }) if capacity == cap && requested == cap + 1
    ));
    assert!(matches!(ring.emplace_with(|| 3), Err(Error::CapacityExceeded { .. })));
    assert!(matches!(ring.resize(cap + 1, 0), Err(Error::CapacityExceeded { .. })));
    assert!(matches!(ring.at(cap), Err(Error::OutOfRange { index, len }) if index == cap && len == cap));

    // Still fully usable.
    assert_eq!(ring.erase(1), 1);
    ring.push(4).or_abort();
    assert_eq!(*ring.at(cap - 1).unwrap(), 4);
    *ring.at_mut(0).unwrap() = 9;
    assert_eq!(ring.front(), Some(&9));
}

#[test]
fn partial_append_stays_applied() {
    let mut ring = RingArray::<u64>::new(8).unwrap();
    let cap = ring.capacity() as u64;

    let result = ring.append(0..cap + 10);
    assert!(matches!(result, Err(Error::CapacityExceeded { .. })));
    assert!(ring.is_full());
    assert_eq!(ring.back(), Some(&(cap - 1)));
}

#[test]
fn ring_moves_between_threads() {
    let mut ring = RingArray::<String>::new(16).unwrap();
    ring.push("hello".to_owned()).unwrap();

    let ring = std::thread::spawn(move || {
        ring.push("world".to_owned()).unwrap();
        ring
    })
    .join()
    .unwrap();

    assert_eq!(ring.join(" "), "hello world");
}

/// Wraps the default backend and counts the blocks it hands out.
#[derive(Default)]
struct Tally {
    inner: MirrorBackend,
    live: Rc<Cell<isize>>,
}

impl Backend for Tally {
    fn allocate(&self, bytes: usize) -> Result<MirrorBlock, AllocError> {
        let block = self.inner.allocate(bytes)?;
        self.live.set(self.live.get() + 1);
        Ok(block)
    }

    fn deallocate(&self, block: MirrorBlock) {
        self.live.set(self.live.get() - 1);
        self.inner.deallocate(block)
    }

    fn pagesize(&self) -> usize {
        self.inner.pagesize()
    }
}

#[test]
fn substituted_backend_sees_one_block() {
    let mut ring = RingArray::<u64, Tally>::with_backend(100, Tally::default()).unwrap();
    assert_eq!(ring.allocator().backend().live.get(), 1);

    ring.append(0..50).unwrap();
    ring.erase(20);
    assert_eq!(ring.allocator().backend().live.get(), 1);
    assert_eq!(ring.byte_size() % ring.allocator().pagesize(), 0);
}

/// Panics in its destructor when told to.
struct Fragile(bool);

impl Drop for Fragile {
    fn drop(&mut self) {
        bump(&FRAGILE_DROPPED);
        if self.0 {
            panic!("fragile element");
        }
    }
}

#[test]
fn panicking_destructor_still_releases_block() {
    let backend = Tally::default();
    let live = Rc::clone(&backend.live);

    let mut ring = RingArray::<Fragile, Tally>::with_backend(8, backend).unwrap();
    ring.append([false, true, false].map(Fragile)).unwrap();
    assert_eq!(live.get(), 1);

    let dropped = catch_unwind(AssertUnwindSafe(move || drop(ring)));
    assert!(dropped.is_err());
    assert_eq!(live.get(), 0);
    assert_eq!(count(&FRAGILE_DROPPED), 3);
}

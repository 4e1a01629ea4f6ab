#![cfg(target_family = "unix")]
use infiniray::RingArray;

#[test]
fn sliding_window() {
    let mut buffer = RingArray::<u64>::new(4096).unwrap();
    let mut counter = 0u64;

    while counter < buffer.capacity() as u64 * 4 {
        if buffer.len() >= 512 {
            buffer.erase(512);
        }

        let data: [u64; 192] = core::array::from_fn(|_| {
            counter += 1;
            counter - 1
        });
        buffer.append(data).unwrap();
    }

    let mut expected = counter - buffer.len() as u64;
    for value in buffer.iter() {
        assert_eq!(*value, expected);
        expected += 1;
    }

    for value in buffer.iter().rev() {
        counter -= 1;
        assert_eq!(*value, counter);
    }
}

#[test]
fn front_tag_tracks_evictions() {
    let mut ring = RingArray::<u32>::new(300).unwrap();
    let mut appended = 0u32;

    for step in 1..2000usize {
        let burst = step % 37;
        for _ in 0..burst.min(ring.remaining()) {
            ring.push(appended).unwrap();
            appended += 1;
        }

        ring.erase(step % 23);

        if let Some(&front) = ring.front() {
            assert_eq!(front, appended - ring.len() as u32);
        }
    }
}

/// Sizes that do not divide the page size, addressed with byte arithmetic.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Triple([u64; 3]);

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
struct Odd {
    a: u32,
    b: u32,
    c: u32,
}

#[test]
fn odd_sized_elements_straddle_the_mirror() {
    let mut ring = RingArray::<Triple>::new(100).unwrap();
    let cap = ring.capacity();
    assert_ne!(ring.byte_size() % core::mem::size_of::<Triple>(), 0);

    let mut next = 0u64;
    for _ in 0..4 * cap {
        if ring.is_full() {
            ring.erase(cap / 3);
        }

        ring.push(Triple([next, next + 1, next + 2])).unwrap();
        next += 1;
    }

    let first = next - ring.len() as u64;
    for (idx, value) in ring.iter().enumerate() {
        let n = first + idx as u64;
        assert_eq!(*value, Triple([n, n + 1, n + 2]));
    }

    // Slice algorithms see one flat range.
    let mut sorted = ring.to_vec();
    sorted.sort_by_key(|t| core::cmp::Reverse(t.0[0]));
    ring.as_mut_slice().reverse();
    assert_eq!(ring.as_slice(), sorted);
}

#[test]
fn odd_struct_elements() {
    let mut ring = RingArray::<Odd>::new(500).unwrap();
    let cap = ring.capacity() as u32;

    for n in 0..10 * cap {
        if ring.is_full() {
            assert_eq!(ring.pop_front().map(|o| o.a), Some(n - cap));
        }
        ring.push(Odd { a: n, b: !n, c: n ^ 0x5a5a }).unwrap();
    }

    assert!(ring.iter().all(|o| o.b == !o.a && o.c == o.a ^ 0x5a5a));
    assert_eq!(ring.back().map(|o| o.a), Some(10 * cap - 1));
}

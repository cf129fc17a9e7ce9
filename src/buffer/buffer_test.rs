use super::*;

#[test]
fn acquire_until_dry() {
    let mut pool = SlotPool::new(2, 16);
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert_ne!(a, b);
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.acquire(), None);
}

#[test]
fn release_makes_slot_reusable() {
    let mut pool = SlotPool::new(1, 16);
    let a = pool.acquire().unwrap();
    assert_eq!(pool.acquire(), None);
    pool.release(a);
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.acquire(), Some(a));
}

#[test]
fn slot_holds_written_bytes() {
    let mut pool = SlotPool::new(2, 8);
    let a = pool.acquire().unwrap();
    assert!(pool.write(a, 0, b"abc"));
    assert!(pool.write(a, 3, b"def"));
    assert_eq!(&pool.slot(a)[..6], b"abcdef");
}

#[test]
fn write_past_capacity_is_rejected() {
    let mut pool = SlotPool::new(1, 4);
    let a = pool.acquire().unwrap();
    assert!(!pool.write(a, 2, b"abc"));
    assert!(pool.write(a, 1, b"abc"));
}

#[test]
fn slots_do_not_alias() {
    let mut pool = SlotPool::new(2, 4);
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert!(pool.write(a, 0, b"aaaa"));
    assert!(pool.write(b, 0, b"bbbb"));
    assert_eq!(pool.slot(a), b"aaaa");
    assert_eq!(pool.slot(b), b"bbbb");
}

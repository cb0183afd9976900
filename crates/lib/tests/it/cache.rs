//! Concurrency tests for the dual-indexed session cache.

use std::sync::{Arc, Barrier};
use std::thread;

use tether::{
    Count, FixedClock, SessionCache, SessionContext, SessionRecord,
    cache::AccessTime,
    security::SecurityDetails,
};

fn context(id: i64, uuid: &str) -> Arc<SessionContext> {
    let mut record = SessionRecord::with_uuid(uuid, 0, "User");
    record.id = Some(id);
    Arc::new(SessionContext::new(record, SecurityDetails::root("User"), Count::new(uuid)).unwrap())
}

#[test]
fn test_readers_never_see_half_inserted_sessions() {
    let cache = Arc::new(SessionCache::new());
    let barrier = Arc::new(Barrier::new(5));

    let writer = {
        let cache = cache.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for i in 1..=500 {
                cache.put(context(-i, &format!("s{i}")));
                if i % 3 == 0 {
                    cache.remove(format!("s{}", i - 1).as_str());
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..2_000 {
                    for ctx in cache.snapshot() {
                        // Whatever is visible by uuid is visible by id, and vice versa.
                        if let Some(by_id) = cache.get(ctx.id()) {
                            assert_eq!(by_id.uuid(), ctx.uuid());
                        }
                    }
                    let (ids, uuids) = cache.index_sizes();
                    assert_eq!(ids, uuids);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let (ids, uuids) = cache.index_sizes();
    assert_eq!(ids, uuids);
    assert_eq!(cache.len(), 500 - 166);
}

#[test]
fn test_concurrent_touch_and_replace_keep_access_time() {
    let clock = Arc::new(FixedClock::new(1_000));
    let cache = Arc::new(SessionCache::with_clock(clock.clone()));
    cache.put(context(-1, "a"));
    clock.set(2_000);

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    if n % 2 == 0 {
                        cache.touch("a");
                    } else {
                        cache.put(context(-1, "a"));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.timestamp("a"), AccessTime::At(2_000));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_each_visitor_may_remove_entries() {
    let cache = SessionCache::new();
    for i in 1..=10 {
        cache.put(context(-i, &format!("s{i}")));
    }

    cache.each(|ctx| {
        if ctx.id() % 2 == 0 {
            cache.remove(ctx.uuid());
        }
    });

    assert_eq!(cache.len(), 5);
    assert!(cache.get(-2).is_none());
    assert!(cache.get(-3).is_some());
}

//! Pool and view stress: large parallel iteration, concurrent reservation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use chunk_ecs::{Entity, Read, Registry, ThreadPool, Write};

static SERIAL: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel {
    x: f32,
    y: f32,
}

#[test]
fn par_each_touches_every_row_once() {
    let _serial = SERIAL.lock();

    let mut registry = Registry::new();
    for i in 0..50_000 {
        registry.create((
            Pos {
                x: i as f32,
                y: 0.0,
            },
            Vel { x: 1.0, y: 2.0 },
        ));
    }

    registry
        .view_mut::<(Write<Pos>, Read<Vel>)>()
        .par_each(|(pos, vel): (&mut Pos, &Vel)| {
            pos.x += vel.x;
            pos.y += vel.y;
        });

    let touched = AtomicUsize::new(0);
    registry
        .view_mut::<(Read<Pos>,)>()
        .par_each(|(pos,): (&Pos,)| {
            assert_eq!(pos.y, 2.0);
            touched.fetch_add(1, Ordering::Relaxed);
        });
    assert_eq!(touched.load(Ordering::Relaxed), 50_000);
}

#[test]
fn pool_survives_nested_parallel_for() {
    let _serial = SERIAL.lock();
    let pool = ThreadPool::get();

    let sum = AtomicUsize::new(0);
    let outer: Vec<usize> = (0..64).collect();
    pool.parallel_for(outer, |value| {
        // children of the running task keep the join semantics intact
        sum.fetch_add(value, Ordering::Relaxed);
    });
    assert_eq!(sum.load(Ordering::Relaxed), 64 * 63 / 2);
}

#[test]
fn concurrent_reservation_publishes_consistently() {
    let _serial = SERIAL.lock();

    let registry = Arc::new(Registry::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            (0..1000)
                .map(|_| registry.reserve().entity())
                .collect::<Vec<Entity>>()
        }));
    }

    let mut reserved = Vec::new();
    for handle in handles {
        reserved.extend(handle.join().unwrap());
    }

    let mut registry = Arc::try_unwrap(registry).ok().unwrap();
    registry.sync();

    let mut unique = reserved.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8000, "reservations must never collide");
    for entity in &reserved {
        assert!(registry.alive(*entity));
    }
}

//! Command-buffered structural mutation under the parallel executor.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use chunk_ecs::{
    register_clone, CommandWriter, Entity, Read, Registry, Schedule, View,
};

// command buffers are process-global; tests in this binary serialize
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

static POS_COUNT: AtomicUsize = AtomicUsize::new(0);

fn spawn_first_batch(commands: CommandWriter) {
    for i in 0..1000 {
        commands.create((Pos {
            x: i as f32,
            y: i as f32,
        },));
    }
}

fn spawn_second_batch(commands: CommandWriter) {
    for i in 1000..2000 {
        commands.create((Pos {
            x: i as f32,
            y: i as f32,
        },));
    }
}

fn count_positions(mut view: View<(Read<Pos>,)>) {
    let mut count = 0;
    view.each(|(_pos,): (&Pos,)| count += 1);
    POS_COUNT.store(count, Ordering::Relaxed);
}

#[test]
fn parallel_producers_then_counter() {
    let _serial = SERIAL.lock();
    POS_COUNT.store(0, Ordering::Relaxed);

    let mut registry = Registry::new();
    let mut schedule = Schedule::new();
    schedule
        .begin_stage("produce")
        .add_system(spawn_first_batch)
        .add_system(spawn_second_batch)
        .end_stage()
        .begin_stage("observe")
        .add_system(count_positions)
        .end_stage();

    let mut executor = schedule.create_executor(&mut registry).unwrap();
    executor.run_once(&mut registry).unwrap();

    assert_eq!(POS_COUNT.load(Ordering::Relaxed), 2000);
    assert_eq!(registry.entity_count(), 2000);

    // the producers run again next frame; the counter observes both batches
    executor.run_once(&mut registry).unwrap();
    assert_eq!(POS_COUNT.load(Ordering::Relaxed), 4000);
    assert_eq!(registry.entity_count(), 4000);
}

fn clone_everything(mut view: View<(Entity, Read<Pos>)>, commands: CommandWriter) {
    view.par_each(move |(entity, _pos): (Entity, &Pos)| {
        commands.entity(entity).clone_entity();
    });
}

#[test]
fn clone_under_parallel_iteration() {
    let _serial = SERIAL.lock();
    register_clone::<Pos>();
    register_clone::<Vel>();

    let mut registry = Registry::new();
    let originals: Vec<Entity> = (0..10)
        .map(|i| {
            registry.create((
                Pos {
                    x: i as f32,
                    y: i as f32,
                },
                Vel {
                    x: 2.0 * i as f32,
                    y: 2.0 * i as f32,
                },
            ))
        })
        .collect();

    let mut schedule = Schedule::new();
    schedule
        .begin_stage("clone")
        .add_system(clone_everything)
        .end_stage();

    let mut executor = schedule.create_executor(&mut registry).unwrap();
    executor.run_once(&mut registry).unwrap();

    assert_eq!(registry.entity_count(), 20);

    // every original value now appears exactly twice
    let mut values: Vec<(u32, u32)> = Vec::new();
    registry
        .view::<(Read<Pos>, Read<Vel>)>()
        .each(|(pos, vel): (&Pos, &Vel)| {
            values.push((pos.x as u32, vel.x as u32));
        });
    values.sort();
    for (i, original) in originals.iter().enumerate() {
        let expected = (i as u32, 2 * i as u32);
        let copies = values.iter().filter(|&&v| v == expected).count();
        assert_eq!(copies, 2, "entity {original:?} should have one clone");
    }
}

#[test]
fn manual_flush_applies_in_fifo_order() {
    let _serial = SERIAL.lock();

    let mut registry = Registry::new();
    let e = registry.create((Pos { x: 0.0, y: 0.0 },));

    {
        let commands = CommandWriter::new(&registry);
        commands.entity(e).set(Pos { x: 1.0, y: 1.0 });
        commands.entity(e).set(Pos { x: 2.0, y: 2.0 });
    }
    chunk_ecs::flush_commands(&mut registry).unwrap();

    // the later write wins
    assert_eq!(registry.get::<Pos>(e).unwrap(), &Pos { x: 2.0, y: 2.0 });
}

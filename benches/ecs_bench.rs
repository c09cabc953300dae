//! Core operation benchmarks: creation, iteration, archetype migration.
//!
//! Run with: cargo bench

use chunk_ecs::{Read, Registry, Write};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[derive(Debug, Copy, Clone)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Copy, Clone)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Copy, Clone)]
struct Health(u32);

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");

    group.bench_function("create_10k_single_component", |b| {
        b.iter(|| {
            let mut registry = Registry::new();
            for i in 0..10_000 {
                let _ = registry.create((Position {
                    x: i as f32,
                    y: 0.0,
                    z: 0.0,
                },));
            }
            black_box(registry.entity_count())
        });
    });

    group.bench_function("create_10k_three_components", |b| {
        b.iter(|| {
            let mut registry = Registry::new();
            for i in 0..10_000 {
                let _ = registry.create((
                    Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    },
                    Velocity {
                        x: 1.0,
                        y: 1.0,
                        z: 1.0,
                    },
                    Health(100),
                ));
            }
            black_box(registry.entity_count())
        });
    });

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    let mut registry = Registry::new();
    for i in 0..100_000 {
        registry.create((
            Position {
                x: i as f32,
                y: 0.0,
                z: 0.0,
            },
            Velocity {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
        ));
    }

    group.bench_function("each_100k_read_write", |b| {
        b.iter(|| {
            registry
                .view_mut::<(Write<Position>, Read<Velocity>)>()
                .each(|(pos, vel): (&mut Position, &Velocity)| {
                    pos.x += vel.x;
                    pos.y += vel.y;
                    pos.z += vel.z;
                });
        });
    });

    group.bench_function("par_each_100k_read_write", |b| {
        b.iter(|| {
            registry
                .view_mut::<(Write<Position>, Read<Velocity>)>()
                .par_each(|(pos, vel): (&mut Position, &Velocity)| {
                    pos.x += vel.x;
                    pos.y += vel.y;
                    pos.z += vel.z;
                });
        });
    });

    group.finish();
}

fn bench_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration");

    group.bench_function("set_remove_churn_1k", |b| {
        let mut registry = Registry::new();
        let entities: Vec<_> = (0..1_000)
            .map(|i| {
                registry.create((Position {
                    x: i as f32,
                    y: 0.0,
                    z: 0.0,
                },))
            })
            .collect();

        b.iter(|| {
            for &entity in &entities {
                registry
                    .set(
                        entity,
                        Velocity {
                            x: 1.0,
                            y: 1.0,
                            z: 1.0,
                        },
                    )
                    .unwrap();
            }
            for &entity in &entities {
                registry.remove::<Velocity>(entity).unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_create, bench_iterate, bench_migration);
criterion_main!(benches);

//! Crate-level tests for the storage invariants and operation laws.

use crate::entity::Entity;
use crate::registry::Registry;
use crate::view::{Read, View};

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

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(u32);

/// Both directions of the location index, plus the chunk fill invariant.
fn assert_storage_invariants(registry: &Registry) {
    let mut rows = 0;
    for (archetype_index, archetype) in registry.archetypes().iter().enumerate() {
        let chunks = archetype.chunks();
        assert!(!chunks.is_empty(), "archetypes keep at least one chunk");
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.is_full(), "only the last chunk may be partial");
        }

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            for row in 0..chunk.len() {
                let entity = chunk.entity(row);
                assert!(registry.alive(entity), "stored entity {entity:?} is dead");
                let location = registry.get_location(entity).unwrap();
                assert_eq!(
                    (location.archetype, location.chunk, location.row),
                    (archetype_index, chunk_index, row),
                    "location of {entity:?} disagrees with its row"
                );
                rows += 1;
            }
        }
    }
    assert_eq!(rows, registry.entity_count());
}

#[test]
fn test_invariants_across_mixed_operations() {
    let mut registry = Registry::new();

    // enough entities for several chunks
    let entities: Vec<Entity> = (0..3000)
        .map(|i| {
            registry.create((Pos {
                x: i as f32,
                y: 0.0,
            },))
        })
        .collect();
    assert_storage_invariants(&registry);

    for entity in entities.iter().step_by(3) {
        registry.set(*entity, Vel { x: 1.0, y: 1.0 }).unwrap();
    }
    assert_storage_invariants(&registry);

    for entity in entities.iter().step_by(7) {
        registry.destroy(*entity).unwrap();
    }
    assert_storage_invariants(&registry);

    for entity in entities.iter().step_by(3).skip(1) {
        if registry.alive(*entity) {
            registry.remove::<Vel>(*entity).unwrap();
        }
    }
    assert_storage_invariants(&registry);
}

#[test]
fn test_set_get_roundtrip() {
    let mut registry = Registry::new();
    let e = registry.create((Pos { x: 0.0, y: 0.0 },));

    registry.set(e, Pos { x: 4.0, y: 2.0 }).unwrap();
    assert_eq!(registry.get::<Pos>(e).unwrap(), &Pos { x: 4.0, y: 2.0 });

    registry.set(e, Health(17)).unwrap();
    assert_eq!(registry.get::<Health>(e).unwrap(), &Health(17));
}

#[test]
fn test_add_remove_cancellation() {
    let mut registry = Registry::new();
    let e = registry.create((Pos { x: 3.0, y: 1.0 }, Health(5)));
    let before = registry.get_location(e).unwrap().archetype;

    registry.set(e, Vel { x: 9.0, y: 9.0 }).unwrap();
    registry.remove::<Vel>(e).unwrap();

    // identity and unrelated components survive the round trip
    assert!(registry.alive(e));
    assert_eq!(registry.get::<Pos>(e).unwrap(), &Pos { x: 3.0, y: 1.0 });
    assert_eq!(registry.get::<Health>(e).unwrap(), &Health(5));
    assert_eq!(registry.get_location(e).unwrap().archetype, before);
    assert!(!registry.has::<Vel>(e).unwrap());
}

#[test]
fn test_view_completeness_across_archetypes() {
    let mut registry = Registry::new();
    let mut expected = Vec::new();

    for i in 0..2500u32 {
        let entity = match i % 3 {
            0 => registry.create((Pos {
                x: i as f32,
                y: 0.0,
            },)),
            1 => registry.create((
                Pos {
                    x: i as f32,
                    y: 0.0,
                },
                Vel { x: 0.0, y: 0.0 },
            )),
            _ => registry.create((
                Pos {
                    x: i as f32,
                    y: 0.0,
                },
                Health(i),
            )),
        };
        expected.push(entity);
    }
    // rows without Pos stay invisible
    registry.create((Health(1),));

    let mut seen = Vec::new();
    let mut view: View<(Entity, Read<Pos>)> = registry.view();
    view.each(|(entity, _pos): (Entity, &Pos)| seen.push(entity));

    assert_eq!(seen.len(), expected.len());
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected, "every matching row appears exactly once");
}

#[test]
fn test_destroyed_handles_never_resolve() {
    let mut registry = Registry::new();
    let e = registry.create((Pos { x: 1.0, y: 1.0 },));
    registry.destroy(e).unwrap();

    // the recycled id gets a new generation; the stale handle stays dead
    let reused = registry.create((Pos { x: 2.0, y: 2.0 },));
    assert_eq!(reused.id(), e.id());
    assert_ne!(reused.generation(), e.generation());
    assert!(!registry.alive(e));
    assert!(registry.get::<Pos>(e).is_err());
    assert_eq!(registry.get::<Pos>(reused).unwrap(), &Pos { x: 2.0, y: 2.0 });
}

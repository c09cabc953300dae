//! Stage-and-barrier schedule.
//!
//! A schedule is a list of named stages, each holding parallelizable systems
//! and main-thread-only systems, plus an init list that runs once when the
//! executor is created. Per stage, systems are greedily partitioned into
//! *waves* whose access patterns are pairwise compatible; each wave's systems
//! run simultaneously on the thread pool, joined under one parent task, and
//! command buffers are flushed on the main thread after every wave.

use std::sync::Arc;

use crate::command;
use crate::error::Result;
use crate::registry::Registry;
use crate::system::{AccessPattern, BoxedSystem, IntoSystem};
use crate::thread_pool::{Task, ThreadPool};

#[cfg(feature = "profiling")]
use tracing::info_span;

struct StageSystems {
    name: String,
    parallel: Vec<BoxedSystem>,
    main_thread: Vec<BoxedSystem>,
}

/// Builder for a frame's worth of systems.
#[derive(Default)]
pub struct Schedule {
    init: Vec<BoxedSystem>,
    stages: Vec<StageSystems>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a system that runs once, before the first frame, with exclusive
    /// registry access.
    pub fn add_init_system<M>(&mut self, system: impl IntoSystem<M>) -> &mut Self {
        self.init.push(system.into_system());
        self
    }

    /// Open a new stage. Stages execute strictly in declaration order.
    pub fn begin_stage(&mut self, name: &str) -> StageBuilder<'_> {
        StageBuilder {
            schedule: Some(self),
            stage: Some(StageSystems {
                name: name.to_owned(),
                parallel: Vec::new(),
                main_thread: Vec::new(),
            }),
        }
    }

    /// Finalize the schedule: run init systems against `registry`, flush
    /// commands, and partition every stage into waves.
    pub fn create_executor(mut self, registry: &mut Registry) -> Result<Executor> {
        for system in &mut self.init {
            // SAFETY: exclusive registry access, nothing runs concurrently
            unsafe { system.run(registry as *mut Registry) };
        }
        command::flush(registry)?;

        let stages = self
            .stages
            .into_iter()
            .map(|stage| ExecutorStage {
                name: stage.name,
                waves: partition_waves(stage.parallel),
                main_thread: stage.main_thread,
            })
            .collect();
        Ok(Executor { stages })
    }
}

/// In-progress stage of a [`Schedule`].
pub struct StageBuilder<'a> {
    schedule: Option<&'a mut Schedule>,
    stage: Option<StageSystems>,
}

impl<'a> StageBuilder<'a> {
    /// Add a system eligible for parallel execution.
    pub fn add_system<M>(mut self, system: impl IntoSystem<M>) -> Self {
        self.stage
            .as_mut()
            .expect("stage is open until end_stage")
            .parallel
            .push(system.into_system());
        self
    }

    /// Add a system pinned to the main thread. Main-thread systems run
    /// inline while each of the stage's waves drains on the workers.
    pub fn add_main_thread_system<M>(mut self, system: impl IntoSystem<M>) -> Self {
        self.stage
            .as_mut()
            .expect("stage is open until end_stage")
            .main_thread
            .push(system.into_system());
        self
    }

    /// Close the stage, returning the schedule for chaining.
    pub fn end_stage(mut self) -> &'a mut Schedule {
        let schedule = self.schedule.take().expect("stage is open until end_stage");
        let stage = self.stage.take().expect("stage is open until end_stage");
        schedule.stages.push(stage);
        schedule
    }
}

impl Drop for StageBuilder<'_> {
    fn drop(&mut self) {
        // a builder dropped without end_stage still lands in the schedule
        if let (Some(schedule), Some(stage)) = (self.schedule.take(), self.stage.take()) {
            schedule.stages.push(stage);
        }
    }
}

/// Greedy wave partitioning: walk the pending systems in insertion order,
/// admitting each whose pattern the accumulated wave pattern allows; repeat
/// until all systems are placed. Emitted waves are pairwise conflict-free
/// and their sequence respects every access conflict.
fn partition_waves(mut pending: Vec<BoxedSystem>) -> Vec<Vec<BoxedSystem>> {
    let mut waves = Vec::new();
    while !pending.is_empty() {
        let mut accumulated = AccessPattern::new();
        let mut wave = Vec::new();
        let mut rest = Vec::new();
        for system in pending {
            if accumulated.allows(system.access()) {
                accumulated.merge(system.access());
                wave.push(system);
            } else {
                rest.push(system);
            }
        }
        waves.push(wave);
        pending = rest;
    }
    waves
}

struct ExecutorStage {
    #[allow(dead_code)]
    name: String,
    waves: Vec<Vec<BoxedSystem>>,
    main_thread: Vec<BoxedSystem>,
}

#[derive(Clone, Copy)]
struct RegistryPtr(*mut Registry);

// Handed only to systems whose access patterns the wave proved compatible.
unsafe impl Send for RegistryPtr {}

/// Executes a finalized schedule, one frame per [`run_once`](Executor::run_once).
pub struct Executor {
    stages: Vec<ExecutorStage>,
}

impl Executor {
    /// Run every stage once.
    ///
    /// Per wave: parallel systems are submitted under one parent task, the
    /// stage's main-thread systems run inline meanwhile, the parent is
    /// awaited, and command buffers are flushed. Stages are strictly
    /// sequential; so are frames.
    pub fn run_once(&mut self, registry: &mut Registry) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = info_span!("executor.run_once", stages = self.stages.len());
        #[cfg(feature = "profiling")]
        let _guard = span.enter();

        let pool = ThreadPool::get();
        for stage in &mut self.stages {
            let ExecutorStage {
                waves, main_thread, ..
            } = stage;

            if waves.is_empty() {
                for system in main_thread.iter_mut() {
                    // SAFETY: nothing else is running; exclusive access
                    unsafe { system.run(registry as *mut Registry) };
                }
                command::flush(registry)?;
                continue;
            }

            for wave in waves.iter_mut() {
                let registry_ptr = RegistryPtr(registry as *mut Registry);
                let mut parent: Option<Arc<Task>> = None;
                for system in wave.iter_mut() {
                    let ptr = registry_ptr;
                    // SAFETY (run): systems within one wave have pairwise
                    // compatible access patterns.
                    let runner = move || {
                        let ptr = ptr;
                        unsafe { system.run(ptr.0) }
                    };
                    // SAFETY (scope): the parent task is awaited below,
                    // before the borrows of `wave` and `registry` end.
                    let task = unsafe { pool.submit_scoped(runner, parent.as_ref()) };
                    parent.get_or_insert(task);
                }

                // main-thread systems execute while the workers drain
                for system in main_thread.iter_mut() {
                    // SAFETY: pinned systems run only on this thread; their
                    // declared access is the integrator's contract
                    unsafe { system.run(registry as *mut Registry) };
                }

                if let Some(parent) = parent {
                    pool.wait(&parent);
                }
                command::flush(registry)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::component_id;
    use crate::system::System;

    struct Pos;
    struct Vel;
    struct Acc;

    struct StubSystem {
        name: &'static str,
        access: AccessPattern,
    }

    impl StubSystem {
        fn new(name: &'static str, build: impl FnOnce(&mut AccessPattern)) -> BoxedSystem {
            let mut access = AccessPattern::new();
            build(&mut access);
            Box::new(Self { name, access })
        }
    }

    impl System for StubSystem {
        fn name(&self) -> &str {
            self.name
        }

        fn access(&self) -> &AccessPattern {
            &self.access
        }

        unsafe fn run(&mut self, _registry: *mut Registry) {}
    }

    fn wave_names(waves: &[Vec<BoxedSystem>]) -> Vec<Vec<&str>> {
        waves
            .iter()
            .map(|wave| wave.iter().map(|s| s.name()).collect())
            .collect()
    }

    #[test]
    fn test_conflicting_writers_split_into_waves() {
        let systems = vec![
            StubSystem::new("a", |p| {
                p.add_read(component_id::<Pos>());
                p.add_write(component_id::<Vel>());
            }),
            StubSystem::new("b", |p| {
                p.add_read(component_id::<Pos>());
                p.add_write(component_id::<Acc>());
            }),
            StubSystem::new("c", |p| {
                p.add_write(component_id::<Pos>());
            }),
        ];

        let waves = partition_waves(systems);
        assert_eq!(wave_names(&waves), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_waves_are_pairwise_compatible() {
        let systems = vec![
            StubSystem::new("r1", |p| p.add_read(component_id::<Pos>())),
            StubSystem::new("w1", |p| p.add_write(component_id::<Pos>())),
            StubSystem::new("r2", |p| p.add_read(component_id::<Pos>())),
            StubSystem::new("all", |p| p.write_all()),
            StubSystem::new("w2", |p| p.add_write(component_id::<Vel>())),
        ];

        let waves = partition_waves(systems);
        for wave in &waves {
            for (i, a) in wave.iter().enumerate() {
                for b in wave.iter().skip(i + 1) {
                    assert!(
                        a.access().allows(b.access()),
                        "{} and {} conflict within a wave",
                        a.name(),
                        b.name()
                    );
                }
            }
        }
        let total: usize = waves.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_empty_pattern_joins_any_wave() {
        let systems = vec![
            StubSystem::new("w", |p| p.write_all()),
            StubSystem::new("none", |_| {}),
        ];
        let waves = partition_waves(systems);
        assert_eq!(wave_names(&waves), vec![vec!["w", "none"]]);
    }
}

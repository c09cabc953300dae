//! Systems and their access metadata.
//!
//! A system's argument list declares what it touches: a `View` contributes
//! per-component reads and writes, `&Registry` reads everything,
//! `&mut Registry` writes everything, and a `CommandWriter` touches nothing
//! (its mutations are deferred). The scheduler uses the derived
//! [`AccessPattern`]s to decide which systems may run simultaneously.

use std::marker::PhantomData;

use rustc_hash::FxHashMap;

use crate::command::CommandWriter;
use crate::component::ComponentId;
use crate::registry::Registry;
use crate::view::{Query, View};

/// Kind of access to one component or to the registry as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    #[default]
    None,
    Read,
    Write,
}

/// What a system reads and writes, derivable from its argument list.
#[derive(Debug, Clone, Default)]
pub struct AccessPattern {
    registry: Access,
    components: FxHashMap<ComponentId, Access>,
}

impl AccessPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a whole-registry read (`&Registry` argument).
    pub fn read_all(&mut self) {
        self.registry = self.registry.max(Access::Read);
    }

    /// Mark a whole-registry write (`&mut Registry` argument).
    pub fn write_all(&mut self) {
        self.registry = Access::Write;
    }

    pub fn add_read(&mut self, id: ComponentId) {
        let access = self.components.entry(id).or_default();
        *access = (*access).max(Access::Read);
    }

    pub fn add_write(&mut self, id: ComponentId) {
        self.components.insert(id, Access::Write);
    }

    pub fn reads_all(&self) -> bool {
        self.registry != Access::None
    }

    pub fn writes_all(&self) -> bool {
        self.registry == Access::Write
    }

    fn component(&self, id: ComponentId) -> Access {
        self.components.get(&id).copied().unwrap_or(Access::None)
    }

    fn writes_any(&self) -> bool {
        self.writes_all() || self.components.values().any(|&a| a == Access::Write)
    }

    fn is_empty(&self) -> bool {
        self.registry == Access::None && self.components.is_empty()
    }

    /// Whether a system with this pattern may run simultaneously with one
    /// holding `other`.
    ///
    /// A registry-wide access behaves as touching every component: writes-all
    /// excludes everything but empty patterns, reads-all excludes every
    /// writer, and componentwise no write may overlap a read or write on the
    /// other side.
    pub fn allows(&self, other: &AccessPattern) -> bool {
        if self.writes_all() && !other.is_empty() {
            return false;
        }
        if other.writes_all() && !self.is_empty() {
            return false;
        }
        if self.reads_all() && other.writes_any() {
            return false;
        }
        if other.reads_all() && self.writes_any() {
            return false;
        }

        for (&id, &access) in &self.components {
            let theirs = other.component(id);
            if access == Access::Write && theirs != Access::None {
                return false;
            }
            if theirs == Access::Write {
                return false;
            }
        }
        true
    }

    /// Componentwise maximum with `other`.
    pub fn merge(&mut self, other: &AccessPattern) {
        self.registry = self.registry.max(other.registry);
        for (&id, &access) in &other.components {
            let entry = self.components.entry(id).or_default();
            *entry = (*entry).max(access);
        }
    }
}

/// Executable unit of a schedule.
///
/// Implemented automatically for functions via [`IntoSystem`]; implement it
/// by hand when a system needs custom state or an explicit access pattern.
pub trait System: Send {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// What the system touches.
    fn access(&self) -> &AccessPattern;

    /// Execute the system.
    ///
    /// # Safety
    /// `registry` must be valid for the duration of the call, and the
    /// caller must guarantee no concurrent access conflicting with
    /// [`access`](System::access); the scheduler's wave partitioning
    /// provides exactly that.
    unsafe fn run(&mut self, registry: *mut Registry);
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

/// An argument a system function can take.
pub trait SystemParam {
    type Item<'w>;

    /// Record this argument's access.
    fn describe(pattern: &mut AccessPattern);

    /// Materialize the argument.
    ///
    /// # Safety
    /// Same contract as [`System::run`].
    unsafe fn fetch<'w>(registry: *mut Registry) -> Self::Item<'w>;
}

impl<'a, Q: Query> SystemParam for View<'a, Q> {
    type Item<'w> = View<'w, Q>;

    fn describe(pattern: &mut AccessPattern) {
        Q::register_access(pattern);
    }

    unsafe fn fetch<'w>(registry: *mut Registry) -> View<'w, Q> {
        View::from_raw(registry)
    }
}

impl<'a> SystemParam for &'a Registry {
    type Item<'w> = &'w Registry;

    fn describe(pattern: &mut AccessPattern) {
        pattern.read_all();
    }

    unsafe fn fetch<'w>(registry: *mut Registry) -> &'w Registry {
        &*registry
    }
}

impl<'a> SystemParam for &'a mut Registry {
    type Item<'w> = &'w mut Registry;

    fn describe(pattern: &mut AccessPattern) {
        pattern.write_all();
    }

    unsafe fn fetch<'w>(registry: *mut Registry) -> &'w mut Registry {
        &mut *registry
    }
}

impl<'a> SystemParam for CommandWriter<'a> {
    type Item<'w> = CommandWriter<'w>;

    fn describe(_pattern: &mut AccessPattern) {}

    unsafe fn fetch<'w>(registry: *mut Registry) -> CommandWriter<'w> {
        CommandWriter::new(&*registry)
    }
}

/// Adapter wrapping a function as a [`System`].
pub struct FunctionSystem<F, Marker> {
    func: F,
    access: AccessPattern,
    name: &'static str,
    _marker: PhantomData<fn(Marker)>,
}

/// Conversion of functions (and hand-built systems) into [`BoxedSystem`]s.
pub trait IntoSystem<Marker> {
    fn into_system(self) -> BoxedSystem;
}

/// Already-boxed systems pass through unchanged.
impl IntoSystem<()> for BoxedSystem {
    fn into_system(self) -> BoxedSystem {
        self
    }
}

macro_rules! impl_into_system {
    ($($P:ident),*) => {
        impl<F, $($P),*> System for FunctionSystem<F, fn($($P,)*)>
        where
            F: Send + 'static + FnMut($($P),*) + for<'w> FnMut($(<$P as SystemParam>::Item<'w>),*),
            $($P: SystemParam + 'static,)*
        {
            fn name(&self) -> &str {
                self.name
            }

            fn access(&self) -> &AccessPattern {
                &self.access
            }

            unsafe fn run(&mut self, registry: *mut Registry) {
                let _ = registry;
                (self.func)($(<$P as SystemParam>::fetch(registry)),*);
            }
        }

        impl<F, $($P),*> IntoSystem<fn($($P,)*)> for F
        where
            F: Send + 'static + FnMut($($P),*) + for<'w> FnMut($(<$P as SystemParam>::Item<'w>),*),
            $($P: SystemParam + 'static,)*
        {
            fn into_system(self) -> BoxedSystem {
                let mut access = AccessPattern::new();
                $(<$P as SystemParam>::describe(&mut access);)*
                Box::new(FunctionSystem::<F, fn($($P,)*)> {
                    func: self,
                    access,
                    name: std::any::type_name::<F>(),
                    _marker: PhantomData,
                })
            }
        }
    };
}

// Systems without arguments (init hooks, timers) skip parameter fetching.
impl<F> System for FunctionSystem<F, fn()>
where
    F: Send + 'static + FnMut(),
{
    fn name(&self) -> &str {
        self.name
    }

    fn access(&self) -> &AccessPattern {
        &self.access
    }

    unsafe fn run(&mut self, _registry: *mut Registry) {
        (self.func)();
    }
}

impl<F> IntoSystem<fn()> for F
where
    F: Send + 'static + FnMut(),
{
    fn into_system(self) -> BoxedSystem {
        Box::new(FunctionSystem::<F, fn()> {
            func: self,
            access: AccessPattern::new(),
            name: std::any::type_name::<F>(),
            _marker: PhantomData,
        })
    }
}

impl_into_system!(P0);
impl_into_system!(P0, P1);
impl_into_system!(P0, P1, P2);
impl_into_system!(P0, P1, P2, P3);

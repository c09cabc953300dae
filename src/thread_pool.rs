//! Work-stealing thread pool.
//!
//! `W` workers each own a Chase–Lev deque (`crossbeam::deque`): the owner
//! pushes and pops at the bottom in LIFO order, thieves steal from the top
//! in FIFO order. The thread that creates the pool acts as worker 0 and
//! executes tasks inside [`ThreadPool::wait`] instead of a background loop.
//! An injector queue accepts submissions from threads that are not workers.
//!
//! A worker out of local work steals from worker 0 first, then from one
//! uniformly random other worker, then drains the injector, and finally
//! parks on a 5 ms timed wait until any submit wakes it.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::error::{EcsError, Result};

/// Unit of work with join semantics.
///
/// A task starts with a pending count of one for itself; attaching a child
/// increments it, and finishing a task decrements its own count and then
/// cascades into its parent. A task is complete when its count reaches zero,
/// i.e. it and all transitively attached children have run.
pub struct Task {
    func: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    parent: Option<Arc<Task>>,
    pending: AtomicU32,
}

impl Task {
    fn new(func: Box<dyn FnOnce() + Send>, parent: Option<Arc<Task>>) -> Arc<Task> {
        if let Some(parent) = &parent {
            parent.pending.fetch_add(1, Ordering::Relaxed);
        }
        Arc::new(Task {
            func: Mutex::new(Some(func)),
            parent,
            pending: AtomicU32::new(1),
        })
    }

    /// True once the task and all attached children have executed.
    pub fn is_completed(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    fn execute(self: &Arc<Self>) {
        let func = self.func.lock().take();
        if let Some(func) = func {
            func();
        }
        self.finish();
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(parent) = &self.parent {
                parent.finish();
            }
        }
    }
}

struct WorkerQueue {
    index: usize,
    worker: Worker<Arc<Task>>,
}

thread_local! {
    static LOCAL: RefCell<Option<WorkerQueue>> = const { RefCell::new(None) };
}

struct Shared {
    injector: Injector<Arc<Task>>,
    stealers: Vec<Stealer<Arc<Task>>>,
    active: AtomicBool,
    idle_lock: Mutex<()>,
    idle_signal: Condvar,
}

/// The process-wide work-stealing pool.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();

impl ThreadPool {
    /// Initialize the global pool with an explicit worker count (the calling
    /// thread is worker 0). Fails with `AlreadyInitialized` if a pool
    /// already exists in this process.
    pub fn init(num_workers: usize) -> Result<&'static ThreadPool> {
        let mut created = false;
        let pool = GLOBAL.get_or_init(|| {
            created = true;
            ThreadPool::with_workers(num_workers)
        });
        if created {
            Ok(pool)
        } else {
            Err(EcsError::AlreadyInitialized)
        }
    }

    /// The global pool, created on first use with one worker per available
    /// core.
    pub fn get() -> &'static ThreadPool {
        GLOBAL.get_or_init(|| {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            ThreadPool::with_workers(workers)
        })
    }

    fn with_workers(num_workers: usize) -> ThreadPool {
        assert!(num_workers > 0, "number of workers should be > 0");

        let queues: Vec<Worker<Arc<Task>>> = (0..num_workers).map(|_| Worker::new_lifo()).collect();
        let stealers = queues.iter().map(Worker::stealer).collect();
        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers,
            active: AtomicBool::new(true),
            idle_lock: Mutex::new(()),
            idle_signal: Condvar::new(),
        });

        let mut queues = queues.into_iter();
        let main_queue = queues.next().expect("at least one worker");
        LOCAL.with(|local| {
            *local.borrow_mut() = Some(WorkerQueue {
                index: 0,
                worker: main_queue,
            });
        });

        let threads = queues
            .enumerate()
            .map(|(i, worker)| {
                let shared = Arc::clone(&shared);
                let index = i + 1;
                std::thread::Builder::new()
                    .name(format!("ecs-worker-{index}"))
                    .spawn(move || {
                        LOCAL.with(|local| {
                            *local.borrow_mut() = Some(WorkerQueue { index, worker });
                        });
                        worker_loop(&shared);
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool { shared, threads }
    }

    /// Number of workers, including the main thread.
    pub fn num_workers(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Submit a task, optionally attached to a parent for joining.
    pub fn submit<F>(&self, func: F, parent: Option<&Arc<Task>>) -> Arc<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_boxed(Box::new(func), parent)
    }

    /// Submit a task borrowing stack data.
    ///
    /// # Safety
    /// The caller must wait for the task (or a parent it is attached to)
    /// before any data it borrows goes out of scope.
    pub unsafe fn submit_scoped<'env, F>(&self, func: F, parent: Option<&Arc<Task>>) -> Arc<Task>
    where
        F: FnOnce() + Send + 'env,
    {
        let boxed: Box<dyn FnOnce() + Send + 'env> = Box::new(func);
        let boxed: Box<dyn FnOnce() + Send + 'static> = std::mem::transmute(boxed);
        self.submit_boxed(boxed, parent)
    }

    fn submit_boxed(
        &self,
        func: Box<dyn FnOnce() + Send + 'static>,
        parent: Option<&Arc<Task>>,
    ) -> Arc<Task> {
        let task = Task::new(func, parent.cloned());
        let queued = Arc::clone(&task);
        let leftover = LOCAL.with(|local| match local.borrow().as_ref() {
            Some(queue) => {
                queue.worker.push(queued);
                None
            }
            None => Some(queued),
        });
        if let Some(task) = leftover {
            self.shared.injector.push(task);
        }
        self.shared.idle_signal.notify_one();
        task
    }

    /// Wait for a task, executing other pool work inline meanwhile so a
    /// worker (or the main thread) can never deadlock on its own queue.
    pub fn wait(&self, task: &Arc<Task>) {
        while !task.is_completed() {
            match find_task(&self.shared) {
                Some(next) => next.execute(),
                None => std::thread::yield_now(),
            }
        }
    }

    /// Run `func` over `items`, partitioned into one batch per worker and
    /// joined before returning. Small inputs run inline.
    pub fn parallel_for<T, F>(&self, items: Vec<T>, func: F)
    where
        T: Send,
        F: Fn(T) + Send + Sync,
    {
        let num_workers = self.num_workers();
        let batch_size = items.len() / num_workers.max(1);
        if num_workers <= 1 || batch_size == 0 {
            for item in items {
                func(item);
            }
            return;
        }

        let mut iter = items.into_iter();
        let mut parent: Option<Arc<Task>> = None;
        for i in 0..num_workers {
            let take = if i == num_workers - 1 {
                usize::MAX
            } else {
                batch_size
            };
            let batch: Vec<T> = iter.by_ref().take(take).collect();
            if batch.is_empty() {
                continue;
            }
            let func = &func;
            // SAFETY: every batch task is attached to `parent`, which is
            // waited on below before `func` and the batches leave scope.
            let task = unsafe {
                self.submit_scoped(
                    move || {
                        for item in batch {
                            func(item);
                        }
                    },
                    parent.as_ref(),
                )
            };
            parent.get_or_insert(task);
        }

        if let Some(parent) = parent {
            self.wait(&parent);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.idle_signal.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        while let Some(task) = find_task(shared) {
            task.execute();
        }
        if !shared.active.load(Ordering::Acquire) {
            break;
        }
        let mut guard = shared.idle_lock.lock();
        let _ = shared
            .idle_signal
            .wait_for(&mut guard, Duration::from_millis(5));
    }
}

fn steal_from(stealer: &Stealer<Arc<Task>>) -> Option<Arc<Task>> {
    loop {
        match stealer.steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => {}
        }
    }
}

fn find_task(shared: &Shared) -> Option<Arc<Task>> {
    let (popped, own_index) = LOCAL.with(|local| match local.borrow().as_ref() {
        Some(queue) => (queue.worker.pop(), Some(queue.index)),
        None => (None, None),
    });
    if popped.is_some() {
        return popped;
    }

    // the main worker first: it is where schedule waves are submitted from
    if own_index != Some(0) {
        if let Some(task) = steal_from(&shared.stealers[0]) {
            return Some(task);
        }
    }

    let num_workers = shared.stealers.len();
    if num_workers > 1 {
        let victim = rand::thread_rng().gen_range(0..num_workers);
        if Some(victim) != own_index {
            if let Some(task) = steal_from(&shared.stealers[victim]) {
                return Some(task);
            }
        }
    }

    loop {
        match shared.injector.steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => {}
        }
    }
}

//! Bounded multi-stage worker pipelines.
//!
//! A topology is a chain `generator -> queue -> worker stage -> queue -> ... -> sink`.
//! Every stage runs on its own fixed set of threads, which start as soon as the stage's
//! output queue exists. Full queues block their producers, so the slowest stage sets the
//! pace of the whole chain.

pub mod gate;
pub mod progress;
pub mod queue;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

pub use gate::{GateTicket, RendezvousGate};
pub use progress::{Counter, ProgressLoggers};
pub use queue::{QueueSnapshot, WorkQueue};

use crate::errors::{Error, ErrorKind, Result};
use queue::{ProducerGuard, QueueHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct TopologyState {
    name: String,
    aborted: Arc<AtomicBool>,
    failure: Mutex<Option<Error>>,
    queues: Mutex<Vec<Arc<dyn QueueHandle>>>,
    running: Mutex<usize>,
    finished: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TopologyState {
    fn new(name: &str) -> Self {
        TopologyState {
            name: name.to_string(),
            aborted: Arc::new(AtomicBool::new(false)),
            failure: Mutex::new(None),
            queues: Mutex::new(Vec::new()),
            running: Mutex::new(0),
            finished: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn new_queue<T: Send + 'static>(&self, name: &str, capacity: usize, producers: usize) -> Arc<WorkQueue<T>> {
        let queue = Arc::new(WorkQueue::with_abort_flag(
            name,
            capacity,
            producers,
            Arc::clone(&self.aborted),
        ));
        lock(&self.queues).push(Arc::clone(&queue) as Arc<dyn QueueHandle>);
        queue
    }

    /// Records the first failure and wakes every blocked stage.
    fn fail(&self, stage: &str, err: Error) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                if err.kind != ErrorKind::Aborted {
                    error!(topology = self.name.as_str(), stage = stage; "Stage failed: {}", err);
                }
                *failure = Some(err);
            } else {
                debug!(topology = self.name.as_str(), stage = stage; "Stage stopped after failure: {}", err);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);
        for queue in lock(&self.queues).iter() {
            queue.wake_all();
        }
    }

    fn thread_done(&self) {
        let mut running = lock(&self.running);
        *running -= 1;
        if *running == 0 {
            self.finished.notify_all();
        }
    }

    fn spawn<F>(self: &Arc<Self>, stage: &str, index: usize, body: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        *lock(&self.running) += 1;
        let state = Arc::clone(self);
        let stage_name = stage.to_string();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}-{}", self.name, stage, index))
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => state.fail(&stage_name, err),
                    Err(payload) => state.fail(
                        &stage_name,
                        Error::pipeline_fault(format!("{} panicked: {}", stage_name, panic_message(payload.as_ref()))),
                    ),
                }
                state.thread_done();
            });
        match spawned {
            Ok(handle) => lock(&self.handles).push(handle),
            Err(err) => {
                self.fail(stage, err.into());
                self.thread_done();
            }
        }
    }
}

/// Handle to a running topology.
pub struct Topology {
    state: Arc<TopologyState>,
}

impl Topology {
    pub fn start(name: &str) -> Builder {
        Builder {
            state: Arc::new(TopologyState::new(name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn queues(&self) -> Vec<QueueSnapshot> {
        lock(&self.state.queues).iter().map(|queue| queue.snapshot()).collect()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Blocks until every stage thread has exited, calling `on_tick` every `interval`.
    /// Returns the first stage failure, if any.
    pub fn await_completion<F>(&self, interval: Duration, mut on_tick: F) -> Result<()>
    where
        F: FnMut(&Topology),
    {
        let mut next_tick = Instant::now() + interval;
        let mut running = lock(&self.state.running);
        while *running > 0 {
            let now = Instant::now();
            if now >= next_tick {
                drop(running);
                on_tick(self);
                next_tick = now + interval;
                running = lock(&self.state.running);
                continue;
            }
            let (guard, _) = self
                .state
                .finished
                .wait_timeout(running, next_tick - now)
                .unwrap_or_else(PoisonError::into_inner);
            running = guard;
        }
        drop(running);

        let handles: Vec<JoinHandle<()>> = lock(&self.state.handles).drain(..).collect();
        for handle in handles {
            // Stage panics are caught inside the thread.
            let _ = handle.join();
        }
        match lock(&self.state.failure).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn await_and_log(&self, loggers: &mut ProgressLoggers, interval: Duration) -> Result<()> {
        let result = self.await_completion(interval, |topology| loggers.log(Some(topology)));
        loggers.log(Some(self));
        result
    }
}

pub struct Builder {
    state: Arc<TopologyState>,
}

impl Builder {
    /// Source stage. The generator runs on one thread and pushes into the first queue.
    pub fn from_generator<T, F>(self, name: &str, generator: F) -> SourceStep<T>
    where
        T: Send + 'static,
        F: FnOnce(&WorkQueue<T>) -> Result<()> + Send + 'static,
    {
        SourceStep {
            state: self.state,
            name: name.to_string(),
            generator: Box::new(generator),
        }
    }

    pub fn read_from_iterator<T, I>(self, name: &str, items: I) -> SourceStep<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
    {
        self.from_generator(name, move |next| {
            for item in items {
                next.put(item)?;
            }
            Ok(())
        })
    }
}

type Generator<T> = Box<dyn FnOnce(&WorkQueue<T>) -> Result<()> + Send>;

pub struct SourceStep<T> {
    state: Arc<TopologyState>,
    name: String,
    generator: Generator<T>,
}

impl<T: Send + 'static> SourceStep<T> {
    pub fn add_buffer(self, name: &str, capacity: usize) -> QueueStep<T> {
        let queue = self.state.new_queue(name, capacity, 1);
        let guard = ProducerGuard(Arc::clone(&queue));
        let generator = self.generator;
        self.state.spawn(&self.name, 0, move || {
            let output = guard;
            generator(&output.0)
        });
        QueueStep {
            state: self.state,
            queue,
        }
    }
}

pub struct QueueStep<T> {
    state: Arc<TopologyState>,
    queue: Arc<WorkQueue<T>>,
}

impl<T: Send + 'static> QueueStep<T> {
    /// Adds a stage of `threads` workers that each read from the previous queue until it
    /// ends and write into the next one.
    pub fn add_worker<U, F>(self, name: &str, threads: usize, worker: F) -> WorkerStep<T, U>
    where
        U: Send + 'static,
        F: Fn(&WorkQueue<T>, &WorkQueue<U>) -> Result<()> + Send + Sync + 'static,
    {
        WorkerStep {
            state: self.state,
            name: name.to_string(),
            threads: threads.max(1),
            input: self.queue,
            worker: Arc::new(worker),
        }
    }

    /// Terminal stage of `threads` threads, each handed the final queue.
    pub fn sink_to<F>(self, name: &str, threads: usize, sink: F) -> Topology
    where
        F: Fn(&WorkQueue<T>) -> Result<()> + Send + Sync + 'static,
    {
        let sink = Arc::new(sink);
        for index in 0..threads.max(1) {
            let sink = Arc::clone(&sink);
            let input = Arc::clone(&self.queue);
            self.state.spawn(name, index, move || sink(&input));
        }
        Topology { state: self.state }
    }

    /// Terminal stage on a single thread that consumes items in queue order.
    pub fn sink_to_consumer<F>(self, name: &str, mut consumer: F) -> Topology
    where
        F: FnMut(T) -> Result<()> + Send + 'static,
    {
        let input = Arc::clone(&self.queue);
        self.state.spawn(name, 0, move || {
            while let Some(item) = input.get() {
                consumer(item)?;
            }
            Ok(())
        });
        Topology { state: self.state }
    }
}

type Worker<T, U> = Arc<dyn Fn(&WorkQueue<T>, &WorkQueue<U>) -> Result<()> + Send + Sync>;

pub struct WorkerStep<T, U> {
    state: Arc<TopologyState>,
    name: String,
    threads: usize,
    input: Arc<WorkQueue<T>>,
    worker: Worker<T, U>,
}

impl<T: Send + 'static, U: Send + 'static> WorkerStep<T, U> {
    pub fn add_buffer(self, name: &str, capacity: usize) -> QueueStep<U> {
        let queue = self.state.new_queue(name, capacity, self.threads);
        for index in 0..self.threads {
            let guard = ProducerGuard(Arc::clone(&queue));
            let input = Arc::clone(&self.input);
            let worker = Arc::clone(&self.worker);
            self.state.spawn(&self.name, index, move || {
                let output = guard;
                worker(&input, &output.0)
            });
        }
        QueueStep {
            state: self.state,
            queue,
        }
    }
}

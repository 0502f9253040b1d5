use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, task::JoinHandle, time::sleep};
use tracing::{debug, error, info};

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TaskAction = Box<dyn FnOnce() -> TaskFuture + Send + 'static>;

pub type QueueListener = Arc<dyn Fn(Vec<String>) + Send + Sync + 'static>;

enum TaskKind {
    Run(Option<TaskAction>),
    Stop,
}

struct Task {
    description: String,
    kind: TaskKind,
}

enum Head {
    Run(String, Option<TaskAction>),
    Stop,
}

struct Shared {
    tasks: Mutex<VecDeque<Task>>,
    wake: Notify,
    on_change: QueueListener,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<String> {
        self.tasks().iter().map(|t| t.description.clone()).collect()
    }

    fn notify_change(&self) {
        (self.on_change)(self.snapshot());
    }
}

/// Strict FIFO of fleet-mutating work run by a single background worker.
///
/// A task stays at the head of the queue, and in [`TaskQueue::dump`], until
/// its action has finished. A slow action holds up everything behind it.
pub struct TaskQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(poll_interval: Duration, on_change: QueueListener) -> Self {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            on_change,
        });

        let worker = tokio::spawn(Self::work(shared.clone(), poll_interval));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue<D, F, Fut>(&self, description: D, action: F)
    where
        D: Into<String>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: TaskAction = Box::new(move || Box::pin(action()));
        self.push(Task {
            description: description.into(),
            kind: TaskKind::Run(Some(action)),
        });
    }

    pub fn enqueue_stop<D: Into<String>>(&self, description: D) {
        self.push(Task {
            description: description.into(),
            kind: TaskKind::Stop,
        });
    }

    fn push(&self, task: Task) {
        debug!(task = %task.description, "enqueued");
        self.shared.tasks().push_back(task);
        self.shared.notify_change();
        self.shared.wake.notify_one();
    }

    pub fn dump(&self) -> Vec<String> {
        self.shared.snapshot()
    }

    /// Waits for the worker to exit. Only returns after a stop sentinel has
    /// been reached.
    pub async fn join(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "queue worker panicked");
        }
    }

    pub async fn shutdown(&self) {
        self.enqueue_stop("Shutting down");
        self.join().await;
    }

    async fn work(shared: Arc<Shared>, poll_interval: Duration) {
        loop {
            let head = {
                let mut tasks = shared.tasks();
                tasks.front_mut().map(|task| match &mut task.kind {
                    TaskKind::Run(action) => Head::Run(task.description.clone(), action.take()),
                    TaskKind::Stop => Head::Stop,
                })
            };

            match head {
                None => {
                    tokio::select! {
                        _ = shared.wake.notified() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
                Some(Head::Stop) => {
                    shared.tasks().pop_front();
                    shared.notify_change();
                    info!("task queue stopped");
                    break;
                }
                Some(Head::Run(description, action)) => {
                    shared.notify_change();
                    debug!(task = %description, "running");

                    // Spawned so a panicking action is contained; awaited so
                    // nothing else runs meanwhile.
                    if let Some(action) = action
                        && let Err(e) = tokio::spawn(action()).await
                    {
                        error!(task = %description, error = %e, "task failed");
                    }

                    shared.tasks().pop_front();
                    shared.notify_change();
                }
            }
        }
    }
}

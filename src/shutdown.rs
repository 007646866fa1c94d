//! Process-wide termination and per-component task supervision.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// Shared termination handle observed by every task of every component.
///
/// Cloning is cheap; all clones observe the same flag. Once cancelled the handle never resets.
#[derive(Debug, Clone)]
pub struct Termination {
    flag: Arc<watch::Sender<bool>>,
}

impl Termination {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Request termination and wake every task waiting in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once termination has been requested, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so the channel cannot close underneath us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of the tasks a component spawns, joined as a whole at shutdown.
#[derive(Debug, Default)]
pub struct TaskGroup {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` onto the current runtime and track it until it is joined.
    ///
    /// Tasks that have already finished are reaped first, so a long run does not accumulate them.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().expect("task group lock poisoned");
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        tasks.spawn(task);
    }

    /// Number of tracked tasks that have not been joined yet.
    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task group lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join every tracked task, including tasks spawned while draining.
    ///
    /// Tasks are expected to observe [`Termination`] on their own; this only waits.
    pub async fn drain(&self) {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().expect("task group lock poisoned");
                std::mem::replace(&mut *tasks, JoinSet::new())
            };
            if batch.is_empty() {
                break;
            }

            debug!(tasks = batch.len(), "Draining tasks");
            while let Some(result) = batch.join_next().await {
                log_join_error(result);
            }
        }
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Task panicked");
        }
    }
}

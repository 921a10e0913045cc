//! In-flight install tasks.
//!
//! At most one install task exists per package. A task owns the cancellation
//! token of its pipeline and fans progress out to every attached observer.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::progress::{PipelineStage, ProgressSink};

fn same_sink(a: &Arc<dyn ProgressSink>, b: &Arc<dyn ProgressSink>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

pub struct InstallTask {
    id: Uuid,
    cancel: CancellationToken,
    subscribers: Mutex<Vec<Arc<dyn ProgressSink>>>,
    last: Mutex<Option<(PipelineStage, u8)>>,
}

impl InstallTask {
    pub fn new(id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            subscribers: Mutex::new(Vec::new()),
            last: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attach an observer. Attaching the same sink twice has no effect.
    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) {
        let mut subscribers = self.subscribers.lock();
        if !subscribers.iter().any(|s| same_sink(s, &sink)) {
            subscribers.push(sink);
        }
    }

    pub fn unsubscribe(&self, sink: &Arc<dyn ProgressSink>) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| !same_sink(s, sink));
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Most recent update reported through this task.
    pub fn last_progress(&self) -> Option<(PipelineStage, u8)> {
        *self.last.lock()
    }

    /// Cancel the pipeline and drop all observers.
    pub fn release(&self) {
        self.cancel.cancel();
        self.subscribers.lock().clear();
    }
}

impl ProgressSink for InstallTask {
    fn report(&self, stage: PipelineStage, percent: u8) {
        *self.last.lock() = Some((stage, percent));
        let subscribers = self.subscribers.lock().clone();
        for sink in subscribers {
            sink.report(stage, percent);
        }
    }
}

/// Registry of running install tasks plus observers waiting for one.
///
/// Observers attached while no task runs are remembered and handed to the
/// next install of that package.
#[derive(Default)]
pub struct InstallTaskRegistry {
    active: DashMap<Uuid, Arc<InstallTask>>,
    fallback: DashMap<Uuid, Arc<dyn ProgressSink>>,
}

impl InstallTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` unless its package already has one running.
    pub fn try_register(&self, task: Arc<InstallTask>) -> bool {
        match self.active.entry(task.id()) {
            Entry::Vacant(slot) => {
                slot.insert(task);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove `task` if it is still the registered one for its package.
    pub fn remove(&self, task: &Arc<InstallTask>) -> bool {
        self.active
            .remove_if(&task.id(), |_, current| Arc::ptr_eq(current, task))
            .is_some()
    }

    /// Cancel the running install of `id`, if any.
    ///
    /// The task stays registered until its pipeline has unwound, so a new
    /// install of the same package is refused in the meantime.
    pub fn try_cancel(&self, id: &Uuid) -> bool {
        match self.get(id) {
            Some(task) => {
                task.cancel_token().cancel();
                debug!(plugin_id = %id, "install cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<Arc<InstallTask>> = self.active.iter().map(|t| Arc::clone(t.value())).collect();
        for task in &tasks {
            task.cancel_token().cancel();
        }
        tasks.len()
    }

    /// Observe `id`: the running install if there is one, otherwise the next.
    pub fn attach(&self, id: Uuid, sink: Arc<dyn ProgressSink>) {
        match self.get(&id) {
            Some(task) => task.subscribe(sink),
            None => {
                self.fallback.insert(id, sink);
            }
        }
    }

    pub fn detach(&self, id: Uuid, sink: &Arc<dyn ProgressSink>) {
        let task = self.active.get(&id).map(|t| Arc::clone(&t));
        if let Some(task) = task {
            task.unsubscribe(sink);
        }
        self.fallback.remove_if(&id, |_, current| same_sink(current, sink));
    }

    pub fn fallback_for(&self, id: &Uuid) -> Option<Arc<dyn ProgressSink>> {
        self.fallback.get(id).map(|s| Arc::clone(&s))
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<InstallTask>> {
        self.active.get(id).map(|t| Arc::clone(&t))
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.active.iter().map(|t| *t.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

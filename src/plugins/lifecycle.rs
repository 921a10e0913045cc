//! Install/remove lifecycle tracking and the device restart debouncer.
//!
//! Every install or removal moves its package through an in-progress state
//! into a terminal one. Devices are restarted once, after the whole burst of
//! operations has settled.

use dashmap::DashMap;
use std::mem;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallLifecycleState {
    InstallOrUpdate,
    InstallOrUpdateSuccess,
    InstallOrUpdateFailed,
    Remove,
    RemoveSuccess,
    RemoveFailed,
}

impl InstallLifecycleState {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::InstallOrUpdate | Self::Remove)
    }
}

/// Current lifecycle state per package.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    states: DashMap<Uuid, InstallLifecycleState>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter an in-progress state, replacing whatever was recorded.
    pub fn begin(&self, id: Uuid, state: InstallLifecycleState) {
        self.states.insert(id, state);
    }

    /// Move `id` to `next` only if it is currently `expected`.
    pub fn try_update(
        &self,
        id: Uuid,
        next: InstallLifecycleState,
        expected: InstallLifecycleState,
    ) -> bool {
        match self.states.get_mut(&id) {
            Some(mut state) if *state == expected => {
                *state = next;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<InstallLifecycleState> {
        self.states.get(id).map(|s| *s)
    }

    pub fn pending_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Remove and return every package in a terminal state.
    pub fn drain_settled(&self) -> Vec<Uuid> {
        let settled: Vec<Uuid> = self
            .states
            .iter()
            .filter(|s| !s.is_pending())
            .map(|s| *s.key())
            .collect();
        settled
            .into_iter()
            .filter(|id| self.states.remove_if(id, |_, s| !s.is_pending()).is_some())
            .collect()
    }
}

/// Collects settled operations and asks for a restart once nothing is pending.
#[derive(Debug, Default)]
pub struct RestartDebouncer {
    settled: Vec<Uuid>,
}

impl RestartDebouncer {
    /// Returns the settled packages when a restart is due.
    pub fn tick(&mut self, tracker: &LifecycleTracker) -> Option<Vec<Uuid>> {
        if tracker.is_empty() && self.settled.is_empty() {
            return None;
        }
        self.settled.extend(tracker.drain_settled());
        if tracker.is_empty() && !self.settled.is_empty() {
            return Some(mem::take(&mut self.settled));
        }
        None
    }

    pub fn waiting(&self) -> usize {
        self.settled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstallLifecycleState::*;

    #[test]
    fn terminal_transition_requires_expected_state() {
        let tracker = LifecycleTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id, Remove);
        assert!(!tracker.try_update(id, InstallOrUpdateSuccess, InstallOrUpdate));
        assert!(tracker.try_update(id, RemoveSuccess, Remove));
        assert_eq!(tracker.get(&id), Some(RemoveSuccess));
    }

    #[test]
    fn restart_waits_for_whole_burst() {
        let tracker = LifecycleTracker::new();
        let mut debouncer = RestartDebouncer::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(debouncer.tick(&tracker).is_none());

        tracker.begin(a, InstallOrUpdate);
        tracker.begin(b, InstallOrUpdate);
        tracker.try_update(a, InstallOrUpdateSuccess, InstallOrUpdate);
        assert!(debouncer.tick(&tracker).is_none());
        assert_eq!(debouncer.waiting(), 1);

        tracker.try_update(b, InstallOrUpdateFailed, InstallOrUpdate);
        let restarted = debouncer.tick(&tracker).unwrap();
        assert_eq!(restarted.len(), 2);
        assert!(debouncer.tick(&tracker).is_none());
    }

    #[test]
    fn ten_completions_in_one_tick_restart_once() {
        let tracker = LifecycleTracker::new();
        let mut debouncer = RestartDebouncer::default();
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            tracker.begin(*id, InstallOrUpdate);
        }
        assert!(debouncer.tick(&tracker).is_none());
        for id in &ids {
            tracker.try_update(*id, InstallOrUpdateSuccess, InstallOrUpdate);
        }
        assert_eq!(debouncer.tick(&tracker).map(|settled| settled.len()), Some(10));
        assert!(debouncer.tick(&tracker).is_none());
    }
}

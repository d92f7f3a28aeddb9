//! Resident model slots.
//!
//! Every structural change (reserve, load, evict, release) happens under the
//! single `parking_lot::Mutex` in [`Slots`]. The lock is never held across an
//! `.await`: backend `load`/`unload` run outside it, bracketed by the
//! `Loading` and `Evicting` states. Any change that could unblock a waiter is
//! followed by `notify_waiters`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::backend::InferenceBackend;
use crate::types::{ModelDescriptor, ResidencyState};

/// A slot occupant, owned by the orchestrator.
pub(crate) struct LoadedModelHandle {
    pub(crate) descriptor: ModelDescriptor,
    pub(crate) backend: Arc<dyn InferenceBackend>,
    pub(crate) state: ResidencyState,
    pub(crate) in_flight: u32,
    pub(crate) last_used: Instant,
}

/// What the caller should do next for a ranked candidate list.
pub(crate) enum Plan {
    /// A resident model was pinned; `in_flight` already counts the caller.
    Use {
        descriptor: ModelDescriptor,
        backend: Arc<dyn InferenceBackend>,
    },
    /// Load `descriptor`. With a victim, unload it first and then call
    /// [`SlotTable::swap_in`]; without one the slot is already reserved.
    Load {
        descriptor: ModelDescriptor,
        backend: Arc<dyn InferenceBackend>,
        victim: Option<Victim>,
    },
    /// Nothing usable right now; wait for the next slot transition.
    Wait,
}

pub(crate) struct Victim {
    pub(crate) model_id: String,
    pub(crate) backend: Arc<dyn InferenceBackend>,
}

pub(crate) struct SlotTable {
    capacity: usize,
    handles: HashMap<String, LoadedModelHandle>,
    /// Models that will take the slot of an `Evicting` victim
    pending: HashSet<String>,
}

impl SlotTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            handles: HashMap::with_capacity(capacity),
            pending: HashSet::new(),
        }
    }

    pub(crate) fn occupied(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn residency(&self, model_id: &str) -> (ResidencyState, u32) {
        match self.handles.get(model_id) {
            Some(h) => (h.state, h.in_flight),
            None if self.pending.contains(model_id) => (ResidencyState::Loading, 0),
            None => (ResidencyState::Unloaded, 0),
        }
    }

    fn is_transitioning(&self, model_id: &str) -> bool {
        self.pending.contains(model_id)
            || self
                .handles
                .get(model_id)
                .is_some_and(|h| h.state != ResidencyState::Loaded)
    }

    fn pin(&mut self, model_id: &str) -> Option<Plan> {
        let handle = self.handles.get_mut(model_id)?;
        if handle.state != ResidencyState::Loaded {
            return None;
        }
        handle.in_flight += 1;
        handle.last_used = Instant::now();
        Some(Plan::Use {
            descriptor: handle.descriptor.clone(),
            backend: handle.backend.clone(),
        })
    }

    /// Least recently used `Loaded` model with nothing in flight.
    fn lru_idle(&self) -> Option<String> {
        self.handles
            .values()
            .filter(|h| h.state == ResidencyState::Loaded && h.in_flight == 0)
            .min_by_key(|h| h.last_used)
            .map(|h| h.descriptor.id.clone())
    }

    /// Decide how to serve the best of `ranked` (best first).
    pub(crate) fn plan<F>(&mut self, ranked: &[ModelDescriptor], resolve: F) -> Plan
    where
        F: Fn(&ModelDescriptor) -> Arc<dyn InferenceBackend>,
    {
        let Some(top) = ranked.first() else {
            return Plan::Wait;
        };

        if let Some(plan) = self.pin(&top.id) {
            return plan;
        }
        if self.is_transitioning(&top.id) {
            return Plan::Wait;
        }

        if self.handles.len() < self.capacity {
            let backend = resolve(top);
            self.handles.insert(
                top.id.clone(),
                LoadedModelHandle {
                    descriptor: top.clone(),
                    backend: backend.clone(),
                    state: ResidencyState::Loading,
                    in_flight: 0,
                    last_used: Instant::now(),
                },
            );
            return Plan::Load {
                descriptor: top.clone(),
                backend,
                victim: None,
            };
        }

        if let Some(victim_id) = self.lru_idle()
            && let Some(victim) = self.handles.get_mut(&victim_id)
        {
            victim.state = ResidencyState::Evicting;
            let victim_backend = victim.backend.clone();
            self.pending.insert(top.id.clone());
            return Plan::Load {
                descriptor: top.clone(),
                backend: resolve(top),
                victim: Some(Victim {
                    model_id: victim_id,
                    backend: victim_backend,
                }),
            };
        }

        // Every slot is busy: never interrupt a call, use the best candidate
        // that is already resident instead.
        ranked[1..]
            .iter()
            .find_map(|d| self.pin(&d.id))
            .unwrap_or(Plan::Wait)
    }

    /// Replace an unloaded victim with the pending model in `Loading` state.
    pub(crate) fn swap_in(
        &mut self,
        victim_id: &str,
        descriptor: &ModelDescriptor,
        backend: Arc<dyn InferenceBackend>,
    ) {
        self.handles.remove(victim_id);
        self.pending.remove(&descriptor.id);
        self.handles.insert(
            descriptor.id.clone(),
            LoadedModelHandle {
                descriptor: descriptor.clone(),
                backend,
                state: ResidencyState::Loading,
                in_flight: 0,
                last_used: Instant::now(),
            },
        );
    }

    /// `Loading → Loaded`, pinned for the loading caller.
    pub(crate) fn mark_loaded(&mut self, model_id: &str) {
        if let Some(h) = self.handles.get_mut(model_id) {
            h.state = ResidencyState::Loaded;
            h.in_flight = 1;
            h.last_used = Instant::now();
        }
    }

    /// `Loading → Unloaded` after a failed or abandoned load.
    pub(crate) fn abort_load(&mut self, model_id: &str) {
        if self
            .handles
            .get(model_id)
            .is_some_and(|h| h.state == ResidencyState::Loading)
        {
            self.handles.remove(model_id);
        }
    }

    /// Roll back an eviction abandoned before `swap_in`.
    pub(crate) fn abort_eviction(&mut self, victim_id: &str, pending_id: &str) {
        self.pending.remove(pending_id);
        self.handles.remove(victim_id);
    }

    pub(crate) fn release(&mut self, model_id: &str) {
        if let Some(h) = self.handles.get_mut(model_id) {
            h.in_flight = h.in_flight.saturating_sub(1);
            h.last_used = Instant::now();
        }
    }

    /// Mark every idle `Loaded` model `Evicting` and return them.
    pub(crate) fn begin_evict_idle(&mut self) -> Vec<Victim> {
        self.handles
            .values_mut()
            .filter(|h| h.state == ResidencyState::Loaded && h.in_flight == 0)
            .map(|h| {
                h.state = ResidencyState::Evicting;
                Victim {
                    model_id: h.descriptor.id.clone(),
                    backend: h.backend.clone(),
                }
            })
            .collect()
    }

    pub(crate) fn finish_evict(&mut self, model_id: &str) {
        if self
            .handles
            .get(model_id)
            .is_some_and(|h| h.state == ResidencyState::Evicting)
        {
            self.handles.remove(model_id);
        }
    }
}

/// The exclusion domain plus its wake-up signal.
pub(crate) struct Slots {
    pub(crate) table: Mutex<SlotTable>,
    pub(crate) changed: Notify,
}

impl Slots {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(SlotTable::new(capacity)),
            changed: Notify::new(),
        }
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SlotTable) -> R) -> R {
        let result = f(&mut self.table.lock());
        self.changed.notify_waiters();
        result
    }
}

/// Holds one in-flight call on a resident model. Dropping it releases the call.
pub(crate) struct InFlightGuard {
    slots: Arc<Slots>,
    model_id: String,
}

impl InFlightGuard {
    pub(crate) fn new(slots: Arc<Slots>, model_id: String) -> Self {
        Self { slots, model_id }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.update(|t| t.release(&self.model_id));
    }
}

/// Rolls a slot back if the load that reserved it never completes.
pub(crate) struct PendingLoad {
    slots: Arc<Slots>,
    model_id: String,
    victim: Option<String>,
    armed: bool,
}

impl PendingLoad {
    pub(crate) fn new(slots: Arc<Slots>, model_id: String, victim: Option<String>) -> Self {
        Self {
            slots,
            model_id,
            victim,
            armed: true,
        }
    }

    /// The victim has been unloaded and replaced.
    pub(crate) fn victim_swapped(&mut self) {
        self.victim = None;
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let model_id = &self.model_id;
        match &self.victim {
            Some(victim) => self.slots.update(|t| t.abort_eviction(victim, model_id)),
            None => self.slots.update(|t| t.abort_load(model_id)),
        }
    }
}

use std::collections::HashMap;

use tracing::debug;

/// Which half of a turn a cached count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    User,
    Model,
}

/// Cache key naming one half of one turn.
///
/// A cached count is valid only while the corresponding turn text is
/// unchanged since the count was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub turn: usize,
    pub role: SlotRole,
}

impl Slot {
    pub fn user(turn: usize) -> Self {
        Self {
            turn,
            role: SlotRole::User,
        }
    }

    pub fn model(turn: usize) -> Self {
        Self {
            turn,
            role: SlotRole::Model,
        }
    }
}

/// Slot-keyed cache of exact token counts. Never performs network calls.
#[derive(Debug, Default, Clone)]
pub struct TokenCountCache {
    entries: HashMap<Slot, usize>,
}

impl TokenCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slot: Slot) -> Option<usize> {
        self.entries.get(&slot).copied()
    }

    pub fn insert(&mut self, slot: Slot, count: usize) {
        self.entries.insert(slot, count);
    }

    /// Drop one slot; returns whether it was present.
    pub fn invalidate(&mut self, slot: Slot) -> bool {
        self.entries.remove(&slot).is_some()
    }

    /// Remove both slots of the deleted turn and renumber every slot with a
    /// higher turn index down by one.
    pub fn on_delete(&mut self, turn: usize) {
        let mut remapped = HashMap::with_capacity(self.entries.len());
        for (slot, count) in self.entries.drain() {
            if slot.turn == turn {
                continue;
            }
            let target = if slot.turn > turn {
                Slot {
                    turn: slot.turn - 1,
                    role: slot.role,
                }
            } else {
                slot
            };
            remapped.insert(target, count);
        }
        self.entries = remapped;
    }

    /// Drop everything, e.g. after a wholesale history import.
    pub fn clear(&mut self) {
        debug!(entries = self.entries.len(), "clearing token count cache");
        self.entries.clear();
    }
}

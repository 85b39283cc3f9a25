use std::collections::HashMap;
use std::collections::hash_map::Entry;

use uuid::Uuid;

use murmur_types::events::TypingBubble;
use murmur_types::models::ChatType;

/// Who a typing indicator is shown to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypingTarget {
    /// Whoever is connected as this user.
    User(Uuid),
    /// Every member of the group room except the typist.
    Group(String),
}

impl TypingTarget {
    /// Returns None when a private target is not a valid user id.
    pub fn parse(target_id: &str, chat_type: ChatType) -> Option<Self> {
        match chat_type {
            ChatType::Private => target_id.parse().ok().map(Self::User),
            ChatType::Group => Some(Self::Group(target_id.to_string())),
        }
    }
}

#[derive(Debug)]
struct Indicator {
    generation: u64,
    bubble: TypingBubble,
}

/// Active typing indicators keyed by (typist connection, target).
///
/// Each start bumps a generation number; an idle timer only hides the
/// indicator if no newer start arrived in the meantime.
#[derive(Debug, Default)]
pub struct TypingTracker {
    active: HashMap<(Uuid, TypingTarget), Indicator>,
    next_generation: u64,
}

/// Outcome of a `typing_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingStart {
    /// True if the indicator was not already showing.
    pub newly_shown: bool,
    pub generation: u64,
}

impl TypingTracker {
    pub fn start(
        &mut self,
        conn_id: Uuid,
        target: TypingTarget,
        bubble: TypingBubble,
    ) -> TypingStart {
        self.next_generation += 1;
        let generation = self.next_generation;

        let newly_shown = match self.active.entry((conn_id, target)) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().generation = generation;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Indicator { generation, bubble });
                true
            }
        };

        TypingStart {
            newly_shown,
            generation,
        }
    }

    /// Returns the bubble to hide if an indicator was showing.
    pub fn stop(&mut self, conn_id: Uuid, target: &TypingTarget) -> Option<TypingBubble> {
        self.active
            .remove(&(conn_id, target.clone()))
            .map(|indicator| indicator.bubble)
    }

    /// Idle timeout. Only removes the indicator if `generation` is still current.
    pub fn expire(
        &mut self,
        conn_id: Uuid,
        target: &TypingTarget,
        generation: u64,
    ) -> Option<TypingBubble> {
        let key = (conn_id, target.clone());
        match self.active.get(&key) {
            Some(indicator) if indicator.generation == generation => {
                self.active.remove(&key).map(|indicator| indicator.bubble)
            }
            _ => None,
        }
    }

    /// Remove every indicator owned by a connection.
    pub fn clear_connection(&mut self, conn_id: Uuid) -> Vec<(TypingTarget, TypingBubble)> {
        let keys: Vec<_> = self
            .active
            .keys()
            .filter(|(id, _)| *id == conn_id)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let indicator = self.active.remove(&key)?;
                Some((key.1, indicator.bubble))
            })
            .collect()
    }

    #[cfg(test)]
    pub fn is_active(&self, conn_id: Uuid, target: &TypingTarget) -> bool {
        self.active.contains_key(&(conn_id, target.clone()))
    }
}

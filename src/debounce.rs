use crate::board::OverheadState;
use bevy::platform::collections::HashMap;
use bevy::prelude::{Component, Entity, Query, ResMut, Resource};
use std::hash::Hash;

/// 合并刷新队列
/// Coalescing refresh queue
///
/// Holds at most one pending task per key. Scheduling a key that is already
/// pending replaces its payload and keeps its place in the queue; the task
/// still runs once, when the queue is flushed at the end of the tick.
#[derive(Resource, Debug)]
pub struct RefreshQueue<K, T>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    slots: HashMap<K, usize>,
    pending: Vec<(K, T)>,
}

impl<K, T> Default for RefreshQueue<K, T>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            slots: HashMap::default(),
            pending: Vec::new(),
        }
    }
}

impl<K, T> RefreshQueue<K, T>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Returns `true` when `key` was not already pending.
    pub fn schedule(&mut self, key: K, payload: T) -> bool {
        if let Some(&slot) = self.slots.get(&key) {
            self.pending[slot].1 = payload;
            return false;
        }
        self.slots.insert(key, self.pending.len());
        self.pending.push((key, payload));
        true
    }

    pub fn is_pending(&self, key: K) -> bool {
        self.slots.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Takes every pending task in scheduling order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, (K, T)> {
        self.slots.clear();
        self.pending.drain(..)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.pending.clear();
    }
}

/// Token icon visibility as last computed by the refresh.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct TokenIcon {
    pub visible: bool,
    pub alpha: f32,
}

impl Default for TokenIcon {
    fn default() -> Self {
        Self {
            visible: true,
            alpha: 1.0,
        }
    }
}

/// Alpha of a token or tile sprite; hidden primitives are capped at half.
pub fn sprite_alpha(hidden: bool, alpha: f32) -> f32 {
    if hidden { alpha.min(0.5) } else { alpha }
}

/// Pending icon update of one token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenIconRefresh {
    pub overhead: OverheadState,
    pub hidden: bool,
    pub alpha: f32,
}

impl TokenIconRefresh {
    pub fn apply(&self, icon: &mut TokenIcon) {
        // icons placed by elevation are always drawn; the masks hide them
        if self.overhead.is_set() {
            icon.visible = true;
        }
        icon.alpha = sprite_alpha(self.hidden, self.alpha);
    }
}

/// Icon refreshes keyed by icon entity.
pub type TokenRefreshQueue = RefreshQueue<Entity, TokenIconRefresh>;

pub(crate) fn flush_token_icon_refresh(mut queue: ResMut<TokenRefreshQueue>, mut icons: Query<&mut TokenIcon>) {
    for (entity, refresh) in queue.drain() {
        // despawned since it was scheduled
        let Ok(mut icon) = icons.get_mut(entity) else {
            continue;
        };
        refresh.apply(&mut icon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reschedule_replaces_payload() {
        let mut queue: RefreshQueue<u32, &str> = RefreshQueue::default();
        assert!(queue.schedule(1, "first"));
        assert!(queue.schedule(2, "other"));
        assert!(!queue.schedule(1, "second"));
        assert_eq!(queue.len(), 2);

        let flushed: Vec<_> = queue.drain().collect();
        assert_eq!(flushed, [(1, "second"), (2, "other")]);
        assert!(queue.is_empty());
        assert!(!queue.is_pending(1));
    }

    #[test]
    fn test_refresh_shows_placed_icons() {
        let mut icon = TokenIcon {
            visible: false,
            alpha: 1.0,
        };
        TokenIconRefresh {
            overhead: OverheadState::Unset,
            hidden: false,
            alpha: 0.8,
        }
        .apply(&mut icon);
        assert!(!icon.visible);
        assert_eq!(icon.alpha, 0.8);

        TokenIconRefresh {
            overhead: OverheadState::Floor,
            hidden: true,
            alpha: 0.8,
        }
        .apply(&mut icon);
        assert!(icon.visible);
        assert_eq!(icon.alpha, 0.5);
    }
}

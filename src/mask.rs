//! Mask invalidation registry.
//! 遮罩失效登记表
//!
//! Primitives are grouped into mask categories. Anything that changes a
//! category's membership or ordering marks the whole category dirty; the next
//! composite pass recomputes each dirty category exactly once.
//!
//! # Draining
//!
//! [`MaskRegistry::composite`] takes the dirty set and clears it before any
//! recomputation runs. Invalidations raised while a category is being
//! recomputed land in the fresh set and are honored on the following pass,
//! so no invalidation is ever dropped.

use crate::board::{CompositeOrder, CompositedBoards};
use crate::settings::VisionLayersSettings;
use bevy::log::debug;
use bevy::platform::collections::HashMap;
use bevy::prelude::{Entity, Res, ResMut, Resource};
use std::collections::BTreeSet;
use std::fmt;

/// 遮罩类别
/// Mask category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaskCategory {
    Tiles,
    Tokens,
    Lights,
}

impl MaskCategory {
    pub const ALL: [MaskCategory; 3] = [MaskCategory::Tiles, MaskCategory::Tokens, MaskCategory::Lights];

    /// Board key prefix of primitives in this category.
    pub fn key_prefix(self) -> &'static str {
        match self {
            MaskCategory::Tiles => "Tile#",
            MaskCategory::Tokens => "Token#",
            MaskCategory::Lights => "Light#",
        }
    }

    /// Category of a board key such as `Tile#abc.tile`.
    pub fn from_key(key: &str) -> Option<MaskCategory> {
        MaskCategory::ALL
            .into_iter()
            .find(|category| key.starts_with(category.key_prefix()))
    }

    /// Board key for a primitive of this category.
    pub fn key(self, id: &str, suffix: &str) -> String {
        format!("{}{}.{}", self.key_prefix(), id, suffix)
    }
}

impl fmt::Display for MaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskCategory::Tiles => write!(f, "tiles"),
            MaskCategory::Tokens => write!(f, "tokens"),
            MaskCategory::Lights => write!(f, "lights"),
        }
    }
}

/// Set of mask categories awaiting recomputation.
#[derive(Resource, Debug)]
pub struct MaskRegistry {
    dirty: BTreeSet<MaskCategory>,
    active: bool,
}

impl Default for MaskRegistry {
    fn default() -> Self {
        Self {
            dirty: BTreeSet::new(),
            active: true,
        }
    }
}

impl MaskRegistry {
    /// Marks `category` dirty. Repeated calls before a pass coalesce.
    pub fn invalidate_all(&mut self, category: MaskCategory) {
        if !self.active {
            debug!("Ignoring {} mask invalidation after scene teardown", category);
            return;
        }
        self.dirty.insert(category);
    }

    pub fn is_dirty(&self, category: MaskCategory) -> bool {
        self.dirty.contains(&category)
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Drains the dirty set and runs `recompute` once per category in it.
    /// Returns the number of recomputations.
    pub fn composite(&mut self, mut recompute: impl FnMut(MaskCategory, &mut MaskRegistry)) -> usize {
        let pending = std::mem::take(&mut self.dirty);
        for &category in &pending {
            recompute(category, self);
        }
        pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Forgets pending work and ignores invalidations until reactivated.
    pub fn teardown(&mut self) {
        self.dirty.clear();
        self.active = false;
    }

    /// Accepts invalidations again and schedules every category.
    pub fn activate(&mut self) {
        self.active = true;
        self.dirty.extend(MaskCategory::ALL);
    }
}

/// Members of one mask, in draw order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskLayer {
    pub members: Vec<Entity>,
    /// Bumped on every recomputation.
    pub generation: u64,
}

/// 各类别的遮罩
/// Current mask of every category
#[derive(Resource, Debug, Default)]
pub struct MaskLayers {
    layers: HashMap<MaskCategory, MaskLayer>,
}

impl MaskLayers {
    pub fn get(&self, category: MaskCategory) -> Option<&MaskLayer> {
        self.layers.get(&category)
    }

    pub fn generation(&self, category: MaskCategory) -> u64 {
        self.layers.get(&category).map_or(0, |layer| layer.generation)
    }

    /// Rebuilds `category` from a composited board.
    pub fn rebuild(&mut self, category: MaskCategory, order: &CompositeOrder) {
        let members = order
            .layers
            .iter()
            .flat_map(|layer| layer.items.iter())
            .filter(|item| MaskCategory::from_key(&item.key) == Some(category))
            .map(|item| item.entity)
            .collect();
        let layer = self.layers.entry(category).or_default();
        layer.members = members;
        layer.generation += 1;
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }
}

pub(crate) fn recompute_masks(
    settings: Res<VisionLayersSettings>,
    composited: Res<CompositedBoards>,
    mut registry: ResMut<MaskRegistry>,
    mut masks: ResMut<MaskLayers>,
) {
    if !registry.has_pending() {
        return;
    }
    let empty = CompositeOrder::default();
    let order = composited.get(&settings.primary_board).unwrap_or(&empty);
    let recomputed = registry.composite(|category, _| masks.rebuild(category, order));
    debug!("Recomputed {} mask categories", recomputed);
}

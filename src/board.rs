use bevy::log::debug;
use bevy::platform::collections::HashMap;
use bevy::prelude::{Component, Entity, Res, ResMut, Resource};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Board that tiles, token icons and lights are composited on.
/// 主画板名称
pub const PRIMARY_BOARD: &str = "primary";

/// Layer names used on the primary board.
pub mod layers {
    pub const BACKGROUND: &str = "background";
    pub const BACKGROUND_OVERLAY: &str = "background+1";
    pub const TOKENS: &str = "tokens";
    pub const FOREGROUND_UNDERLAY: &str = "foreground-1";
    pub const FOREGROUND: &str = "foreground";
}

/// Z-order of a board entry.
/// 画板条目的 Z 序
///
/// `Dynamic` values are evaluated on every composite pass, so an entry can
/// track a value owned by someone else (for example the live z of the
/// primitive it mirrors).
#[derive(Clone)]
pub enum ZOrder {
    Fixed(f32),
    Dynamic(Arc<dyn Fn() -> f32 + Send + Sync>),
}

impl ZOrder {
    pub fn dynamic(f: impl Fn() -> f32 + Send + Sync + 'static) -> Self {
        ZOrder::Dynamic(Arc::new(f))
    }

    /// A dynamic z reading the current value of `live`.
    pub fn tracking(live: &LiveZIndex) -> Self {
        let live = live.clone();
        ZOrder::dynamic(move || live.get())
    }

    pub fn resolve(&self) -> f32 {
        match self {
            ZOrder::Fixed(z) => *z,
            ZOrder::Dynamic(f) => f(),
        }
    }
}

impl From<f32> for ZOrder {
    fn from(z: f32) -> Self {
        ZOrder::Fixed(z)
    }
}

impl fmt::Debug for ZOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZOrder::Fixed(z) => f.debug_tuple("Fixed").field(z).finish(),
            ZOrder::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Shared, live z-index of a primitive.
///
/// Cloning shares the cell. The host writes it when the primitive's sort
/// order changes; board entries created with [`ZOrder::tracking`] follow it.
#[derive(Component, Clone, Debug, Default)]
pub struct LiveZIndex(Arc<AtomicU32>);

impl LiveZIndex {
    pub fn new(z: f32) -> Self {
        Self(Arc::new(AtomicU32::new(z.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, z: f32) {
        self.0.store(z.to_bits(), Ordering::Relaxed);
    }
}

/// 顶层状态
/// Whether a primitive is drawn in the overhead pass
///
/// `Unset` means no placement decision has been made yet; the host's own
/// occlusion rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverheadState {
    #[default]
    Unset,
    Floor,
    Overhead,
}

impl OverheadState {
    pub fn is_set(self) -> bool {
        self != OverheadState::Unset
    }

    pub fn is_overhead(self) -> bool {
        self == OverheadState::Overhead
    }
}

/// A primitive's placement on a board.
#[derive(Debug, Clone)]
pub struct BoardEntry {
    /// `None` when logically removed; the bookkeeping is retained.
    pub displayable: Option<Entity>,
    pub layer: String,
    pub z: ZOrder,
    rank: u64,
}

impl BoardEntry {
    /// Insertion rank; breaks ties between equal z values.
    pub fn rank(&self) -> u64 {
        self.rank
    }
}

/// One resolved draw in a composited layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub key: String,
    pub entity: Entity,
    pub z: f32,
    /// Position within the layer, starting at 0.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositedLayer {
    pub name: String,
    pub items: Vec<DrawItem>,
}

/// Result of a composite pass: layers in creation order, each sorted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeOrder {
    pub layers: Vec<CompositedLayer>,
}

impl CompositeOrder {
    pub fn layer(&self, name: &str) -> Option<&[DrawItem]> {
        self.layers
            .iter()
            .find(|layer| layer.name == name)
            .map(|layer| layer.items.as_slice())
    }

    /// Keys of `layer` in draw order.
    pub fn keys(&self, name: &str) -> Vec<&str> {
        self.layer(name)
            .map(|items| items.iter().map(|item| item.key.as_str()).collect())
            .unwrap_or_default()
    }
}

/// 合成画板
/// Compositing board
///
/// Keyed placements of primitives into named layers. Layers are created on
/// first use. The board never owns the displayables it references.
#[derive(Debug, Default)]
pub struct Board {
    entries: HashMap<String, BoardEntry>,
    layers: Vec<String>,
    next_rank: u64,
    overhead: HashMap<Entity, OverheadState>,
}

impl Board {
    /// Upserts `key`. Re-placing keeps the entry's insertion rank.
    pub fn place(&mut self, key: impl Into<String>, displayable: Option<Entity>, layer: &str, z: impl Into<ZOrder>) {
        let key = key.into();
        let z = z.into();
        if !self.layers.iter().any(|name| name == layer) {
            debug!("Creating board layer {}", layer);
            self.layers.push(layer.to_string());
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.displayable = displayable;
            entry.layer = layer.to_string();
            entry.z = z;
            return;
        }

        let rank = self.next_rank;
        self.next_rank += 1;
        self.entries.insert(
            key,
            BoardEntry {
                displayable,
                layer: layer.to_string(),
                z,
                rank,
            },
        );
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&BoardEntry> {
        self.entries.get(key)
    }

    /// Deletes `key` entirely; placing it again assigns a new rank.
    pub fn remove(&mut self, key: &str) -> Option<BoardEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layer names in creation order.
    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(String::as_str)
    }

    /// Orders every layer's live entries by resolved z, then insertion rank.
    pub fn composite(&self) -> CompositeOrder {
        let mut by_layer: HashMap<&str, Vec<(&str, Entity, f32, u64)>> = HashMap::default();
        for (key, entry) in &self.entries {
            let Some(entity) = entry.displayable else {
                continue;
            };
            by_layer
                .entry(entry.layer.as_str())
                .or_default()
                .push((key.as_str(), entity, entry.z.resolve(), entry.rank));
        }

        let layers = self
            .layers
            .iter()
            .map(|name| {
                let mut items = by_layer.remove(name.as_str()).unwrap_or_default();
                items.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.3.cmp(&b.3)));
                CompositedLayer {
                    name: name.clone(),
                    items: items
                        .into_iter()
                        .enumerate()
                        .map(|(order, (key, entity, z, _))| DrawItem {
                            key: key.to_string(),
                            entity,
                            z,
                            order,
                        })
                        .collect(),
                }
            })
            .collect();

        CompositeOrder { layers }
    }

    pub fn set_overhead(&mut self, entity: Entity, state: OverheadState) {
        if state.is_set() {
            self.overhead.insert(entity, state);
        } else {
            self.overhead.remove(&entity);
        }
    }

    pub fn overhead(&self, entity: Entity) -> OverheadState {
        self.overhead.get(&entity).copied().unwrap_or_default()
    }

    /// Drops every entry and overhead record. Layers and ranks restart.
    pub fn clear(&mut self) {
        *self = Board::default();
    }
}

/// 画板集合
/// Named boards of the current scene
///
/// While the scene is torn down [`Boards::board_mut`] returns `None`, turning
/// late placements from deferred callbacks into no-ops.
#[derive(Resource, Debug)]
pub struct Boards {
    boards: HashMap<String, Board>,
    active: bool,
}

impl Default for Boards {
    fn default() -> Self {
        let mut boards = HashMap::default();
        boards.insert(PRIMARY_BOARD.to_string(), Board::default());
        Self { boards, active: true }
    }
}

impl Boards {
    pub fn board(&self, name: &str) -> Option<&Board> {
        self.boards.get(name)
    }

    /// The board called `name`, created on first use.
    pub fn board_mut(&mut self, name: &str) -> Option<&mut Board> {
        if !self.active {
            debug!("Ignoring access to board {} after scene teardown", name);
            return None;
        }
        Some(self.boards.entry(name.to_string()).or_default())
    }

    pub fn primary(&self) -> Option<&Board> {
        self.board(PRIMARY_BOARD)
    }

    pub fn primary_mut(&mut self) -> Option<&mut Board> {
        self.board_mut(PRIMARY_BOARD)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Board)> {
        self.boards.iter().map(|(name, board)| (name.as_str(), board))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clears every board and stops accepting operations.
    pub fn teardown(&mut self) {
        for board in self.boards.values_mut() {
            board.clear();
        }
        self.active = false;
    }

    pub fn activate(&mut self) {
        self.active = true;
    }
}

/// Draw order of every board, rebuilt each frame.
#[derive(Resource, Debug, Default)]
pub struct CompositedBoards(pub HashMap<String, CompositeOrder>);

impl CompositedBoards {
    pub fn get(&self, board: &str) -> Option<&CompositeOrder> {
        self.0.get(board)
    }
}

pub(crate) fn composite_boards(boards: Res<Boards>, mut composited: ResMut<CompositedBoards>) {
    composited.0.clear();
    if !boards.is_active() {
        return;
    }
    for (name, board) in boards.iter() {
        composited.0.insert(name.to_string(), board.composite());
    }
}

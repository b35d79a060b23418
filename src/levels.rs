//! Elevation-aware placement for multi-level scenes.
//! 多层场景的高度感知放置
//!
//! When a scene is split into stacked levels, tiles and token icons below
//! the viewer are mirrored into the background pass and those above are
//! pulled into the overhead pass. Placement decisions go through two policy
//! seams, [`TileOcclusionPolicy`] and [`TokenIconPlacementPolicy`], with a
//! host default and a levels implementation for each.
//!
//! Every operation keeps four things in step: the primary board, the
//! board's overhead side-table, the [`LevelsSpriteIndex`] and the mask
//! category affected by the change.

use crate::board::{Boards, OverheadState, ZOrder, layers};
use crate::debounce::{TokenIconRefresh, TokenRefreshQueue, sprite_alpha};
use crate::mask::{MaskCategory, MaskRegistry};
use bevy::ecs::system::SystemParam;
use bevy::log::{debug, warn};
use bevy::platform::collections::HashSet;
use bevy::prelude::{Added, Component, Entity, Query, Res, ResMut, Resource};
use serde::Deserialize;
use serde_json::Value;

pub use crate::board::LiveZIndex;

/// How a policy combines with the host's own behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    /// Extend, then call through to the host.
    Wrapper,
    /// Replace the host behavior.
    Override,
    /// Call through, then extend.
    Post,
    /// Replace under a condition, call through otherwise.
    Mixed,
}

/// Flags stored by the levels module under `flags.levels`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LevelsFlags {
    pub range_bottom: Option<f32>,
    pub range_top: Option<f32>,
    pub elevation: Option<f32>,
}

impl LevelsFlags {
    /// Reads `flags.levels`; missing or malformed blocks read as empty.
    pub fn from_flags(flags: Option<&Value>) -> Self {
        let Some(block) = flags.and_then(|flags| flags.get("levels")) else {
            return Self::default();
        };
        serde_json::from_value(block.clone()).unwrap_or_else(|err| {
            warn!("Ignoring malformed levels flags: {}", err);
            Self::default()
        })
    }
}

/// Maps infinite bounds to the largest finite elevations.
pub fn clamp_elevation(elevation: f32) -> f32 {
    elevation.clamp(f32::MIN, f32::MAX)
}

/// Elevation a tile occludes from.
///
/// Floor tiles sit at the bottom of the world. Overhead tiles use their
/// range bottom, except that a tile without any range is treated as a roof
/// over everything.
pub fn tile_elevation(overhead: bool, flags: &LevelsFlags) -> f32 {
    let elevation = if overhead {
        let bottom = flags.range_bottom.unwrap_or(f32::NEG_INFINITY);
        let top = flags.range_top.unwrap_or(f32::INFINITY);
        if bottom == f32::NEG_INFINITY && top == f32::INFINITY {
            f32::INFINITY
        } else {
            bottom
        }
    } else {
        f32::NEG_INFINITY
    };
    clamp_elevation(elevation)
}

pub fn template_elevation(flags: &LevelsFlags) -> f32 {
    clamp_elevation(flags.elevation.unwrap_or(0.0))
}

/// `[bottom, top]` elevation range of a light or sound source.
pub fn source_elevation_range(flags: &LevelsFlags) -> [f32; 2] {
    [
        clamp_elevation(flags.range_bottom.unwrap_or(f32::NEG_INFINITY)),
        clamp_elevation(flags.range_top.unwrap_or(f32::INFINITY)),
    ]
}

/// Host-side state of a tile needed for placement.
#[derive(Component, Debug, Clone)]
pub struct TileState {
    pub id: String,
    /// Sprite entity; `None` while the texture is not loaded.
    pub sprite: Option<Entity>,
    pub overhead: bool,
    pub hidden: bool,
    pub alpha: f32,
    /// Drag previews are placed without a displayable.
    pub preview: bool,
    pub z_index: LiveZIndex,
}

impl TileState {
    fn displayable(&self) -> Option<Entity> {
        if self.id.is_empty() || self.preview { None } else { self.sprite }
    }
}

/// Host-side state of a token needed for icon placement.
#[derive(Component, Debug, Clone)]
pub struct TokenState {
    pub id: String,
    pub icon: Option<Entity>,
    pub controlled: bool,
    pub hidden: bool,
    pub alpha: f32,
    pub elevation: f32,
    pub preview: bool,
    pub z_index: LiveZIndex,
}

impl TokenState {
    fn displayable(&self) -> Option<Entity> {
        if self.id.is_empty() || self.preview { None } else { self.icon }
    }
}

/// Where the levels module wants a tile or token drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRange {
    pub range: [f32; 2],
    pub levels_overhead: bool,
}

/// Pass a token icon is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconPass {
    Floor,
    Overhead,
}

impl IconPass {
    fn layer(self) -> &'static str {
        match self {
            IconPass::Floor => layers::BACKGROUND_OVERLAY,
            IconPass::Overhead => layers::FOREGROUND_UNDERLAY,
        }
    }

    fn overhead_state(self) -> OverheadState {
        match self {
            IconPass::Floor => OverheadState::Floor,
            IconPass::Overhead => OverheadState::Overhead,
        }
    }
}

/// 层级精灵索引
/// Ids of primitives currently mirrored into the floor or overhead pass
#[derive(Resource, Debug, Default)]
pub struct LevelsSpriteIndex {
    floor: HashSet<String>,
    overhead: HashSet<String>,
    foreground_refresh: bool,
}

impl LevelsSpriteIndex {
    pub fn contains(&self, pass: IconPass, id: &str) -> bool {
        self.index(pass).contains(id)
    }

    fn index(&self, pass: IconPass) -> &HashSet<String> {
        match pass {
            IconPass::Floor => &self.floor,
            IconPass::Overhead => &self.overhead,
        }
    }

    fn index_mut(&mut self, pass: IconPass) -> &mut HashSet<String> {
        match pass {
            IconPass::Floor => &mut self.floor,
            IconPass::Overhead => &mut self.overhead,
        }
    }

    /// Asks for the foreground tiles to be refreshed this tick.
    pub fn request_foreground_refresh(&mut self) {
        self.foreground_refresh = true;
    }

    fn take_foreground_refresh(&mut self) -> bool {
        std::mem::take(&mut self.foreground_refresh)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 层级桥接
/// Placement operations over the scene's shared state
pub struct LevelsBridge<'a> {
    pub boards: &'a mut Boards,
    pub masks: &'a mut MaskRegistry,
    pub sprites: &'a mut LevelsSpriteIndex,
    pub refresh: &'a mut TokenRefreshQueue,
}

impl LevelsBridge<'_> {
    /// Draws a tile below the current level in the background pass.
    /// Returns `false` when the tile is not on the board.
    pub fn mirror_tile_in_background(&mut self, tile_entity: Entity, tile: &TileState, level: &LevelRange) -> bool {
        if tile.sprite.is_none() {
            return false;
        }
        let key = MaskCategory::Tiles.key(&tile.id, "tile");
        let Some(board) = self.boards.primary_mut() else {
            return false;
        };
        if !board.has(&key) {
            return false;
        }

        let z = if level.levels_overhead {
            level.range[0] + 2.0
        } else {
            level.range[0]
        };
        board.place(key, tile.displayable(), layers::BACKGROUND_OVERLAY, z);
        board.set_overhead(tile_entity, OverheadState::Floor);

        self.sprites.request_foreground_refresh();
        self.masks.invalidate_all(MaskCategory::Tiles);
        self.sprites.floor.insert(tile.id.clone());
        true
    }

    /// Returns a mirrored tile to the foreground, tracking its live z.
    pub fn remove_temp_tile(&mut self, tile_entity: Entity, tile: &TileState) -> bool {
        let key = MaskCategory::Tiles.key(&tile.id, "tile");
        let Some(board) = self.boards.primary_mut() else {
            return false;
        };
        if !board.has(&key) {
            return false;
        }

        board.place(
            key,
            tile.displayable(),
            layers::FOREGROUND_UNDERLAY,
            ZOrder::tracking(&tile.z_index),
        );
        let state = if tile.overhead {
            OverheadState::Overhead
        } else {
            OverheadState::Floor
        };
        board.set_overhead(tile_entity, state);

        self.sprites.request_foreground_refresh();
        self.masks.invalidate_all(MaskCategory::Tiles);
        self.sprites.floor.remove(&tile.id);
        true
    }

    /// Draws a token's icon in the floor or overhead pass at its elevation.
    pub fn place_token_icon(&mut self, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool {
        if token.controlled || token.icon.is_none() {
            return false;
        }
        let Some(board) = self.boards.primary_mut() else {
            return false;
        };

        let key = MaskCategory::Tokens.key(&token.id, "icon");
        board.place(key, token.displayable(), pass.layer(), token.elevation + 1.0);
        board.set_overhead(token_entity, pass.overhead_state());
        self.masks.invalidate_all(MaskCategory::Tokens);

        if self.sprites.index_mut(pass).insert(token.id.clone()) {
            debug!("Token {} icon moved to {:?} pass", token.id, pass);
        }
        self.token_refreshed(token_entity, token);
        true
    }

    /// Returns a token's icon from `pass` to the token layer.
    pub fn remove_temp_token(&mut self, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool {
        if !self.sprites.contains(pass, &token.id) {
            return false;
        }

        if let Some(board) = self.boards.primary_mut()
            && board.overhead(token_entity) == pass.overhead_state()
        {
            board.set_overhead(token_entity, OverheadState::Unset);
            let key = MaskCategory::Tokens.key(&token.id, "icon");
            board.place(key, token.displayable(), layers::TOKENS, ZOrder::tracking(&token.z_index));
            self.masks.invalidate_all(MaskCategory::Tokens);
            self.token_refreshed(token_entity, token);
        }

        self.sprites.index_mut(pass).remove(&token.id);
        true
    }

    /// Schedules the token's icon update for the end of the tick.
    pub fn token_refreshed(&mut self, token_entity: Entity, token: &TokenState) {
        let Some(icon) = token.icon else {
            return;
        };
        let overhead = self
            .boards
            .primary()
            .map_or(OverheadState::Unset, |board| board.overhead(token_entity));
        self.refresh.schedule(
            icon,
            TokenIconRefresh {
                overhead,
                hidden: token.hidden,
                alpha: token.alpha,
            },
        );
    }

    /// Records the overhead state a fresh draw leaves a tile in.
    ///
    /// A tile already mirrored into the background pass keeps its floor
    /// placement.
    pub fn tile_drawn(&mut self, tile_entity: Entity, tile: &TileState) -> bool {
        let Some(board) = self.boards.primary_mut() else {
            return false;
        };
        let state = if self.sprites.contains(IconPass::Floor, &tile.id) || !tile.overhead {
            OverheadState::Floor
        } else {
            OverheadState::Overhead
        };
        board.set_overhead(tile_entity, state);
        true
    }

    /// Drawn tokens sit on the floor until an icon pass claims them.
    pub fn token_drawn(&mut self, token_entity: Entity, token: &TokenState) -> bool {
        if self.sprites.contains(IconPass::Floor, &token.id) || self.sprites.contains(IconPass::Overhead, &token.id) {
            return false;
        }
        let Some(board) = self.boards.primary_mut() else {
            return false;
        };
        board.set_overhead(token_entity, OverheadState::Floor);
        true
    }

    /// Owned tokens were revealed to the player.
    pub fn owned_tokens_shown(&mut self) {
        self.masks.invalidate_all(MaskCategory::Tokens);
    }
}

/// System parameter handing out a [`LevelsBridge`].
#[derive(SystemParam)]
pub struct Levels<'w> {
    boards: ResMut<'w, Boards>,
    masks: ResMut<'w, MaskRegistry>,
    sprites: ResMut<'w, LevelsSpriteIndex>,
    refresh: ResMut<'w, TokenRefreshQueue>,
}

impl Levels<'_> {
    pub fn bridge(&mut self) -> LevelsBridge<'_> {
        LevelsBridge {
            boards: &mut self.boards,
            masks: &mut self.masks,
            sprites: &mut self.sprites,
            refresh: &mut self.refresh,
        }
    }
}

/// Decides whether a tile is occluded.
pub trait TileOcclusionPolicy: Send + Sync + 'static {
    fn mode(&self) -> CompositionMode;

    /// `host` computes the host's own answer.
    fn is_occluded(&self, overhead: OverheadState, host: &mut dyn FnMut() -> bool) -> bool;
}

/// Decides where token icons are drawn.
pub trait TokenIconPlacementPolicy: Send + Sync + 'static {
    fn mode(&self) -> CompositionMode;

    fn place(&self, bridge: &mut LevelsBridge<'_>, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool;

    fn remove(&self, bridge: &mut LevelsBridge<'_>, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool;
}

/// Host behavior: tiles occlude as the host decides, icons stay on the
/// token layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlacement;

impl TileOcclusionPolicy for HostPlacement {
    fn mode(&self) -> CompositionMode {
        CompositionMode::Wrapper
    }

    fn is_occluded(&self, _overhead: OverheadState, host: &mut dyn FnMut() -> bool) -> bool {
        host()
    }
}

impl TokenIconPlacementPolicy for HostPlacement {
    fn mode(&self) -> CompositionMode {
        CompositionMode::Wrapper
    }

    fn place(&self, bridge: &mut LevelsBridge<'_>, _token_entity: Entity, token: &TokenState, _pass: IconPass) -> bool {
        let Some(board) = bridge.boards.primary_mut() else {
            return false;
        };
        let key = MaskCategory::Tokens.key(&token.id, "icon");
        board.place(key, token.displayable(), layers::TOKENS, ZOrder::tracking(&token.z_index));
        bridge.masks.invalidate_all(MaskCategory::Tokens);
        true
    }

    fn remove(&self, _bridge: &mut LevelsBridge<'_>, _token_entity: Entity, _token: &TokenState, _pass: IconPass) -> bool {
        false
    }
}

/// Levels behavior: floor tiles never occlude and icons follow the level
/// they are seen from.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelsPlacement;

impl TileOcclusionPolicy for LevelsPlacement {
    fn mode(&self) -> CompositionMode {
        CompositionMode::Mixed
    }

    fn is_occluded(&self, overhead: OverheadState, host: &mut dyn FnMut() -> bool) -> bool {
        if !overhead.is_overhead() {
            return false;
        }
        host()
    }
}

impl TokenIconPlacementPolicy for LevelsPlacement {
    fn mode(&self) -> CompositionMode {
        CompositionMode::Override
    }

    fn place(&self, bridge: &mut LevelsBridge<'_>, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool {
        bridge.place_token_icon(token_entity, token, pass)
    }

    fn remove(&self, bridge: &mut LevelsBridge<'_>, token_entity: Entity, token: &TokenState, pass: IconPass) -> bool {
        bridge.remove_temp_token(token_entity, token, pass)
    }
}

/// 放置策略
/// Registered placement policies
#[derive(Resource)]
pub struct PlacementPolicies {
    pub tile_occlusion: Box<dyn TileOcclusionPolicy>,
    pub token_icons: Box<dyn TokenIconPlacementPolicy>,
}

impl Default for PlacementPolicies {
    fn default() -> Self {
        Self {
            tile_occlusion: Box::new(HostPlacement),
            token_icons: Box::new(HostPlacement),
        }
    }
}

impl PlacementPolicies {
    pub fn levels() -> Self {
        Self {
            tile_occlusion: Box::new(LevelsPlacement),
            token_icons: Box::new(LevelsPlacement),
        }
    }
}

/// Occlusion of a tile: the host's verdict and the one after policies.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct TileOcclusion {
    pub host_occluded: bool,
    pub occluded: bool,
}

/// How a tile sprite is drawn in the foreground.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct TileAppearance {
    pub alpha: f32,
    pub masked: bool,
}

impl Default for TileAppearance {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            masked: true,
        }
    }
}

/// Runs the draw-time hooks for tiles and tokens added since the last pass.
pub(crate) fn track_drawn_placements(
    mut levels: Levels,
    tiles: Query<(Entity, &TileState), Added<TileState>>,
    tokens: Query<(Entity, &TokenState), Added<TokenState>>,
) {
    let mut bridge = levels.bridge();
    for (entity, tile) in &tiles {
        bridge.tile_drawn(entity, tile);
    }
    for (entity, token) in &tokens {
        bridge.token_drawn(entity, token);
    }
}

pub(crate) fn apply_tile_occlusion(
    policies: Res<PlacementPolicies>,
    boards: Res<Boards>,
    mut tiles: Query<(Entity, &mut TileOcclusion)>,
) {
    let Some(board) = boards.primary() else {
        return;
    };
    for (entity, mut occlusion) in &mut tiles {
        let host = occlusion.host_occluded;
        let occluded = policies
            .tile_occlusion
            .is_occluded(board.overhead(entity), &mut || host);
        occlusion.occluded = occluded;
    }
}

/// Unmasks tiles drawn outside the overhead pass.
pub(crate) fn refresh_foreground(
    mut sprites: ResMut<LevelsSpriteIndex>,
    boards: Res<Boards>,
    mut tiles: Query<(Entity, &TileState, &mut TileAppearance)>,
) {
    if !sprites.take_foreground_refresh() {
        return;
    }
    let Some(board) = boards.primary() else {
        return;
    };
    for (entity, tile, mut appearance) in &mut tiles {
        if tile.sprite.is_none() || board.overhead(entity).is_overhead() {
            continue;
        }
        appearance.masked = false;
        appearance.alpha = sprite_alpha(tile.hidden, 1.0).min(tile.alpha);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::PRIMARY_BOARD;
    use serde_json::json;

    #[derive(Default)]
    struct Scene {
        boards: Boards,
        masks: MaskRegistry,
        sprites: LevelsSpriteIndex,
        refresh: TokenRefreshQueue,
    }

    impl Scene {
        fn bridge(&mut self) -> LevelsBridge<'_> {
            LevelsBridge {
                boards: &mut self.boards,
                masks: &mut self.masks,
                sprites: &mut self.sprites,
                refresh: &mut self.refresh,
            }
        }

        fn entry_layer(&self, key: &str) -> Option<String> {
            self.boards
                .board(PRIMARY_BOARD)
                .and_then(|board| board.get(key))
                .map(|entry| entry.layer.clone())
        }
    }

    fn tile(id: &str) -> TileState {
        TileState {
            id: id.to_string(),
            sprite: Some(Entity::from_raw(100)),
            overhead: true,
            hidden: false,
            alpha: 1.0,
            preview: false,
            z_index: LiveZIndex::new(3.0),
        }
    }

    fn token(id: &str) -> TokenState {
        TokenState {
            id: id.to_string(),
            icon: Some(Entity::from_raw(200)),
            controlled: false,
            hidden: true,
            alpha: 0.9,
            elevation: 10.0,
            preview: false,
            z_index: LiveZIndex::new(1.0),
        }
    }

    #[test]
    fn test_tile_elevation() {
        let none = LevelsFlags::default();
        assert_eq!(tile_elevation(false, &none), f32::MIN);
        assert_eq!(tile_elevation(true, &none), f32::MAX);

        let ranged = LevelsFlags::from_flags(Some(&json!({"levels": {"rangeBottom": 5.0, "rangeTop": 9.0}})));
        assert_eq!(tile_elevation(true, &ranged), 5.0);
        assert_eq!(source_elevation_range(&ranged), [5.0, 9.0]);

        let top_only = LevelsFlags {
            range_top: Some(20.0),
            ..Default::default()
        };
        assert_eq!(tile_elevation(true, &top_only), f32::MIN);
        assert_eq!(template_elevation(&none), 0.0);
    }

    #[test]
    fn test_malformed_levels_flags_read_as_empty() {
        let flags = json!({"levels": {"rangeBottom": "low"}});
        assert_eq!(LevelsFlags::from_flags(Some(&flags)), LevelsFlags::default());
        assert_eq!(LevelsFlags::from_flags(None), LevelsFlags::default());
    }

    #[test]
    fn test_mirror_tile_requires_board_entry() {
        let mut scene = Scene::default();
        let entity = Entity::from_raw(1);
        let level = LevelRange {
            range: [10.0, 20.0],
            levels_overhead: true,
        };
        assert!(!scene.bridge().mirror_tile_in_background(entity, &tile("t1"), &level));
        assert!(!scene.masks.has_pending());
    }

    #[test]
    fn test_mirror_and_restore_tile() {
        let mut scene = Scene::default();
        let entity = Entity::from_raw(1);
        let tile = tile("t1");
        if let Some(board) = scene.boards.primary_mut() {
            board.place("Tile#t1.tile", tile.sprite, layers::FOREGROUND, 3.0);
        }

        let level = LevelRange {
            range: [10.0, 20.0],
            levels_overhead: true,
        };
        assert!(scene.bridge().mirror_tile_in_background(entity, &tile, &level));
        assert_eq!(scene.entry_layer("Tile#t1.tile").as_deref(), Some(layers::BACKGROUND_OVERLAY));
        let board = scene.boards.board(PRIMARY_BOARD);
        assert_eq!(board.and_then(|b| b.get("Tile#t1.tile")).map(|e| e.z.resolve()), Some(12.0));
        assert_eq!(board.map(|b| b.overhead(entity)), Some(OverheadState::Floor));
        assert!(scene.masks.is_dirty(MaskCategory::Tiles));
        assert!(scene.sprites.contains(IconPass::Floor, "t1"));

        assert!(scene.bridge().remove_temp_tile(entity, &tile));
        assert_eq!(scene.entry_layer("Tile#t1.tile").as_deref(), Some(layers::FOREGROUND_UNDERLAY));
        tile.z_index.set(7.0);
        let board = scene.boards.board(PRIMARY_BOARD);
        assert_eq!(board.and_then(|b| b.get("Tile#t1.tile")).map(|e| e.z.resolve()), Some(7.0));
        assert_eq!(board.map(|b| b.overhead(entity)), Some(OverheadState::Overhead));
        assert!(!scene.sprites.contains(IconPass::Floor, "t1"));
    }

    #[test]
    fn test_token_icon_round_trip() {
        let mut scene = Scene::default();
        let entity = Entity::from_raw(2);
        let token = token("k1");

        assert!(scene.bridge().place_token_icon(entity, &token, IconPass::Overhead));
        assert_eq!(scene.entry_layer("Token#k1.icon").as_deref(), Some(layers::FOREGROUND_UNDERLAY));
        assert!(scene.masks.is_dirty(MaskCategory::Tokens));
        assert!(scene.refresh.is_pending(Entity::from_raw(200)));

        // removing from the other pass leaves the icon alone
        assert!(!scene.bridge().remove_temp_token(entity, &token, IconPass::Floor));

        assert!(scene.bridge().remove_temp_token(entity, &token, IconPass::Overhead));
        assert_eq!(scene.entry_layer("Token#k1.icon").as_deref(), Some(layers::TOKENS));
        let overhead = scene.boards.primary().map(|b| b.overhead(entity));
        assert_eq!(overhead, Some(OverheadState::Unset));
        assert_eq!(scene.refresh.len(), 1);

        let flushed: Vec<_> = scene.refresh.drain().collect();
        assert_eq!(flushed[0].1.overhead, OverheadState::Unset);
        assert_eq!(flushed[0].1.alpha, 0.9);
    }

    #[test]
    fn test_controlled_token_is_not_moved() {
        let mut scene = Scene::default();
        let mut token = token("k1");
        token.controlled = true;
        assert!(!scene.bridge().place_token_icon(Entity::from_raw(2), &token, IconPass::Floor));
        assert!(scene.entry_layer("Token#k1.icon").is_none());
    }

    #[test]
    fn test_preview_token_keeps_bookkeeping_only() {
        let mut scene = Scene::default();
        let mut token = token("k1");
        token.preview = true;
        assert!(scene.bridge().place_token_icon(Entity::from_raw(2), &token, IconPass::Floor));
        let entry = scene.boards.primary().and_then(|b| b.get("Token#k1.icon")).cloned();
        assert!(entry.is_some_and(|e| e.displayable.is_none()));
    }

    #[test]
    fn test_levels_occlusion_policy() {
        let policy = LevelsPlacement;
        assert_eq!(TileOcclusionPolicy::mode(&policy), CompositionMode::Mixed);
        let mut calls = 0;
        let mut host = || {
            calls += 1;
            true
        };
        assert!(!policy.is_occluded(OverheadState::Floor, &mut host));
        assert!(!policy.is_occluded(OverheadState::Unset, &mut host));
        assert!(policy.is_occluded(OverheadState::Overhead, &mut host));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_drawn_tiles_record_overhead_state() {
        let mut scene = Scene::default();
        let roof = Entity::from_raw(1);
        let floor = Entity::from_raw(2);
        let mut floor_tile = tile("t2");
        floor_tile.overhead = false;

        assert!(scene.bridge().tile_drawn(roof, &tile("t1")));
        assert!(scene.bridge().tile_drawn(floor, &floor_tile));
        let board = scene.boards.primary();
        assert_eq!(board.map(|b| b.overhead(roof)), Some(OverheadState::Overhead));
        assert_eq!(board.map(|b| b.overhead(floor)), Some(OverheadState::Floor));

        let policy = LevelsPlacement;
        let occluded = |scene: &Scene, entity| {
            scene
                .boards
                .primary()
                .is_some_and(|b| policy.is_occluded(b.overhead(entity), &mut || true))
        };
        assert!(occluded(&scene, roof));
        assert!(!occluded(&scene, floor));
    }

    #[test]
    fn test_redrawn_mirrored_tile_stays_on_floor() {
        let mut scene = Scene::default();
        let entity = Entity::from_raw(1);
        let tile = tile("t1");
        if let Some(board) = scene.boards.primary_mut() {
            board.place("Tile#t1.tile", tile.sprite, layers::FOREGROUND, 3.0);
        }
        let level = LevelRange {
            range: [0.0, 5.0],
            levels_overhead: false,
        };
        assert!(scene.bridge().mirror_tile_in_background(entity, &tile, &level));
        assert!(scene.bridge().tile_drawn(entity, &tile));
        assert_eq!(scene.boards.primary().map(|b| b.overhead(entity)), Some(OverheadState::Floor));
    }

    #[test]
    fn test_drawn_token_sits_on_floor_unless_claimed() {
        let mut scene = Scene::default();
        let drawn = Entity::from_raw(2);
        let claimed = Entity::from_raw(3);
        assert!(scene.bridge().token_drawn(drawn, &token("k1")));
        assert_eq!(scene.boards.primary().map(|b| b.overhead(drawn)), Some(OverheadState::Floor));

        let token = token("k2");
        assert!(scene.bridge().place_token_icon(claimed, &token, IconPass::Overhead));
        assert!(!scene.bridge().token_drawn(claimed, &token));
        assert_eq!(scene.boards.primary().map(|b| b.overhead(claimed)), Some(OverheadState::Overhead));
    }

    #[test]
    fn test_teardown_makes_bridge_noop() {
        let mut scene = Scene::default();
        scene.boards.teardown();
        scene.masks.teardown();
        assert!(!scene.bridge().place_token_icon(Entity::from_raw(2), &token("k1"), IconPass::Floor));
        assert!(!scene.bridge().tile_drawn(Entity::from_raw(1), &tile("t1")));
        assert!(scene.refresh.is_empty());
    }
}

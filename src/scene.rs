use crate::board::{Boards, CompositedBoards};
use crate::debounce::TokenRefreshQueue;
use crate::levels::LevelsSpriteIndex;
use crate::mask::{MaskLayers, MaskRegistry};
use crate::shader::ShaderClassCache;
use bevy::ecs::system::{SystemParam, SystemState};
use bevy::log::info;
use bevy::prelude::{Event, EventReader, ResMut, World};

/// 场景生命周期请求
/// Scene lifecycle request
///
/// Boards, mask registry, shader class cache and refresh queues are scoped to
/// one scene. Tearing down drops all of it and turns late operations into
/// no-ops until the next scene is activated.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneLifecycle {
    TearDown,
    Activate,
}

/// Scene-scoped state of the pipeline.
#[derive(SystemParam)]
pub struct SceneState<'w> {
    boards: ResMut<'w, Boards>,
    composited: ResMut<'w, CompositedBoards>,
    masks: ResMut<'w, MaskRegistry>,
    mask_layers: ResMut<'w, MaskLayers>,
    shader_classes: ResMut<'w, ShaderClassCache>,
    sprites: ResMut<'w, LevelsSpriteIndex>,
    refresh: ResMut<'w, TokenRefreshQueue>,
}

impl SceneState<'_> {
    pub fn teardown(&mut self) {
        self.boards.teardown();
        self.composited.0.clear();
        self.masks.teardown();
        self.mask_layers.clear();
        self.shader_classes.clear();
        self.sprites.clear();
        self.refresh.clear();
        info!("Vision layers scene torn down");
    }

    pub fn activate(&mut self) {
        self.boards.activate();
        self.masks.activate();
        info!("Vision layers scene activated");
    }
}

/// Tears the current scene down immediately.
///
/// Requires the resources added by [`VisionLayersPlugin`](crate::VisionLayersPlugin).
pub fn teardown_scene(world: &mut World) {
    let mut state: SystemState<SceneState> = SystemState::new(world);
    state.get_mut(world).teardown();
}

/// Accepts operations again after a teardown.
pub fn activate_scene(world: &mut World) {
    let mut state: SystemState<SceneState> = SystemState::new(world);
    state.get_mut(world).activate();
}

pub(crate) fn handle_scene_lifecycle(mut events: EventReader<SceneLifecycle>, mut scene: SceneState) {
    for event in events.read() {
        match event {
            SceneLifecycle::TearDown => scene.teardown(),
            SceneLifecycle::Activate => scene.activate(),
        }
    }
}

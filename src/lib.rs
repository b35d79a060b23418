use crate::board::{Boards, CompositedBoards, composite_boards};
use crate::debounce::{TokenRefreshQueue, flush_token_icon_refresh};
use crate::levels::{
    LevelsSpriteIndex, PlacementPolicies, apply_tile_occlusion, refresh_foreground, track_drawn_placements,
};
use crate::mask::{MaskLayers, MaskRegistry, recompute_masks};
use crate::scene::{SceneLifecycle, handle_scene_lifecycle};
use crate::settings::VisionLayersSettings;
use crate::shader::cache::{sync_patched_shader_uniforms, sync_shader_settings};
use crate::shader::visibility_filter::sync_visibility_filter_uniforms;
use crate::shader::{LightingUniforms, ScreenDimensions, ShaderClassCache};
use crate::vision_limitation::DetectionModes;
use bevy::app::{App, Last, Plugin, PostUpdate, PreUpdate};
use bevy::ecs::schedule::{IntoScheduleConfigs, SystemSet};
use bevy::prelude::Res;

pub mod board;
pub mod debounce;
pub mod levels;
pub mod mask;
pub mod prelude;
pub mod scene;
pub mod settings;
pub mod shader;
pub mod vision_limitation;

/// 视觉图层系统集
/// System sets of the vision layers pipeline, in execution order
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum VisionLayersSystems {
    /// Scene teardown and activation requests (`PreUpdate`).
    Lifecycle,
    /// Policies applied and boards composited (`PostUpdate`).
    Composite,
    /// Dirty mask categories recomputed (`PostUpdate`).
    Masks,
    /// Patched shader uniforms refreshed (`PostUpdate`).
    Shaders,
    /// Debounced refreshes flushed at the end of the tick (`Last`).
    Refresh,
}

/// 视觉图层插件
/// Vision layers plugin
///
/// Adds the scene-scoped boards, mask registry and shader class cache, and
/// schedules the per-frame passes over them. Insert [`VisionLayersSettings`],
/// [`DetectionModes`] or [`PlacementPolicies`] before adding the plugin to
/// override their defaults.
pub struct VisionLayersPlugin;

impl Plugin for VisionLayersPlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<DetectionModes>() {
            app.insert_resource(DetectionModes::core());
        }

        app.register_type::<VisionLayersSettings>()
            .init_resource::<VisionLayersSettings>()
            .init_resource::<Boards>()
            .init_resource::<CompositedBoards>()
            .init_resource::<MaskRegistry>()
            .init_resource::<MaskLayers>()
            .init_resource::<ShaderClassCache>()
            .init_resource::<LightingUniforms>()
            .init_resource::<ScreenDimensions>()
            .init_resource::<TokenRefreshQueue>()
            .init_resource::<LevelsSpriteIndex>()
            .init_resource::<PlacementPolicies>()
            .add_event::<SceneLifecycle>();

        app.configure_sets(
            PostUpdate,
            (
                VisionLayersSystems::Composite,
                VisionLayersSystems::Masks,
                VisionLayersSystems::Shaders,
            )
                .chain()
                .run_if(vision_layers_enabled),
        )
        .configure_sets(Last, VisionLayersSystems::Refresh.run_if(vision_layers_enabled));

        app.add_systems(
            PreUpdate,
            handle_scene_lifecycle.in_set(VisionLayersSystems::Lifecycle),
        )
        .add_systems(
            PostUpdate,
            (
                (track_drawn_placements, apply_tile_occlusion, composite_boards)
                    .chain()
                    .in_set(VisionLayersSystems::Composite),
                recompute_masks.in_set(VisionLayersSystems::Masks),
                (
                    sync_shader_settings,
                    sync_patched_shader_uniforms,
                    sync_visibility_filter_uniforms,
                )
                    .chain()
                    .in_set(VisionLayersSystems::Shaders),
            ),
        )
        .add_systems(
            Last,
            (flush_token_icon_refresh, refresh_foreground).in_set(VisionLayersSystems::Refresh),
        );
    }
}

fn vision_layers_enabled(settings: Res<VisionLayersSettings>) -> bool {
    settings.enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{OverheadState, PRIMARY_BOARD, layers};
    use crate::debounce::TokenIcon;
    use crate::levels::{
        IconPass, LevelRange, Levels, LiveZIndex, TileAppearance, TileOcclusion, TileState, TokenState,
    };
    use crate::mask::MaskCategory;
    use crate::scene::{activate_scene, teardown_scene};
    use crate::shader::{PatchedShader, ShaderClass, UniformValue};
    use bevy::ecs::system::RunSystemOnce;
    use bevy::math::Vec2;
    use bevy::prelude::{Entity, EventWriter, World};
    use std::sync::Arc;

    fn app() -> App {
        let mut app = App::new();
        app.add_plugins(VisionLayersPlugin);
        app
    }

    fn place(world: &mut World, key: &str, entity: Entity, z: f32) {
        let mut boards = world.resource_mut::<Boards>();
        if let Some(board) = boards.primary_mut() {
            board.place(key, Some(entity), layers::TOKENS, z);
        }
    }

    #[test]
    fn test_plugin_composites_and_recomputes_masks() {
        let mut app = app();
        let a = app.world_mut().spawn_empty().id();
        let b = app.world_mut().spawn_empty().id();
        place(app.world_mut(), "Token#a.icon", a, 2.0);
        place(app.world_mut(), "Token#b.icon", b, 1.0);
        app.world_mut().resource_mut::<MaskRegistry>().invalidate_all(MaskCategory::Tokens);

        app.update();

        let composited = app.world().resource::<CompositedBoards>();
        let order = composited.get(PRIMARY_BOARD).map(|order| order.keys(layers::TOKENS));
        assert_eq!(order, Some(vec!["Token#b.icon", "Token#a.icon"]));

        let masks = app.world().resource::<MaskLayers>();
        assert_eq!(masks.get(MaskCategory::Tokens).map(|m| m.members.clone()), Some(vec![b, a]));
        assert!(!app.world().resource::<MaskRegistry>().has_pending());
    }

    #[test]
    fn test_disabled_settings_skip_passes() {
        let mut app = app();
        app.world_mut().resource_mut::<VisionLayersSettings>().enabled = false;
        let a = app.world_mut().spawn_empty().id();
        place(app.world_mut(), "Token#a.icon", a, 0.0);

        app.update();

        assert!(app.world().resource::<CompositedBoards>().get(PRIMARY_BOARD).is_none());
    }

    #[test]
    fn test_debounced_icon_refresh_flushes_once_per_tick() {
        let mut app = app();
        let icon = app
            .world_mut()
            .spawn(TokenIcon {
                visible: false,
                alpha: 1.0,
            })
            .id();
        let token = app.world_mut().spawn_empty().id();
        let state = TokenState {
            id: "k1".to_string(),
            icon: Some(icon),
            controlled: false,
            hidden: true,
            alpha: 0.9,
            elevation: 0.0,
            preview: false,
            z_index: LiveZIndex::new(0.0),
        };

        let placed = app
            .world_mut()
            .run_system_once(move |mut levels: Levels| {
                let mut bridge = levels.bridge();
                bridge.place_token_icon(token, &state, IconPass::Floor);
                bridge.token_refreshed(token, &state);
            })
            .is_ok();
        assert!(placed);
        assert_eq!(app.world().resource::<TokenRefreshQueue>().len(), 1);

        app.update();

        let refreshed = app.world().get::<TokenIcon>(icon).copied();
        assert_eq!(
            refreshed,
            Some(TokenIcon {
                visible: true,
                alpha: 0.5,
            })
        );
        assert!(app.world().resource::<TokenRefreshQueue>().is_empty());
        let overhead = app.world().resource::<Boards>().primary().map(|b| b.overhead(token));
        assert_eq!(overhead, Some(OverheadState::Floor));
    }

    fn tile_state(id: &str, overhead: bool, hidden: bool) -> TileState {
        TileState {
            id: id.to_string(),
            sprite: Some(Entity::from_raw(900)),
            overhead,
            hidden,
            alpha: 0.8,
            preview: false,
            z_index: LiveZIndex::new(0.0),
        }
    }

    fn spawn_tile(app: &mut App, state: TileState) -> Entity {
        app.world_mut()
            .spawn((
                state,
                TileOcclusion {
                    host_occluded: true,
                    occluded: false,
                },
                TileAppearance::default(),
            ))
            .id()
    }

    #[test]
    fn test_levels_occlusion_and_foreground_refresh() {
        let mut app = App::new();
        app.insert_resource(PlacementPolicies::levels());
        app.add_plugins(VisionLayersPlugin);

        let roof = spawn_tile(&mut app, tile_state("roof", true, false));
        let floor = spawn_tile(&mut app, tile_state("floor", false, true));
        let mirrored_state = tile_state("lower", true, false);
        let mirrored = spawn_tile(&mut app, mirrored_state.clone());
        let untracked = app
            .world_mut()
            .spawn(TileOcclusion {
                host_occluded: true,
                occluded: true,
            })
            .id();

        if let Some(board) = app.world_mut().resource_mut::<Boards>().primary_mut() {
            board.place("Tile#lower.tile", mirrored_state.sprite, layers::FOREGROUND, 0.0);
        }
        let level = LevelRange {
            range: [0.0, 10.0],
            levels_overhead: false,
        };
        let result = app
            .world_mut()
            .run_system_once(move |mut levels: Levels| {
                levels.bridge().mirror_tile_in_background(mirrored, &mirrored_state, &level)
            });
        assert_eq!(result.ok(), Some(true));

        app.update();

        let occluded = |entity| app.world().get::<TileOcclusion>(entity).map(|o| o.occluded);
        assert_eq!(occluded(roof), Some(true));
        assert_eq!(occluded(floor), Some(false));
        assert_eq!(occluded(mirrored), Some(false));
        assert_eq!(occluded(untracked), Some(false));

        let appearance = |entity| app.world().get::<TileAppearance>(entity).copied();
        assert_eq!(appearance(roof), Some(TileAppearance::default()));
        assert_eq!(
            appearance(floor),
            Some(TileAppearance {
                alpha: 0.5,
                masked: false,
            })
        );
        assert_eq!(
            appearance(mirrored),
            Some(TileAppearance {
                alpha: 0.8,
                masked: false,
            })
        );
    }

    #[test]
    fn test_host_policy_keeps_host_occlusion() {
        let mut app = app();
        let floor = spawn_tile(&mut app, tile_state("floor", false, false));

        app.update();

        let occlusion = app.world().get::<TileOcclusion>(floor).copied();
        assert_eq!(occlusion.map(|o| o.occluded), Some(true));
        let overhead = app.world().resource::<Boards>().primary().map(|b| b.overhead(floor));
        assert_eq!(overhead, Some(OverheadState::Floor));
        assert_eq!(
            app.world().get::<TileAppearance>(floor).copied(),
            Some(TileAppearance::default())
        );
    }

    #[test]
    fn test_patched_shader_uniforms_follow_screen() {
        let mut app = app();
        let base = Arc::new(ShaderClass::new(
            "Sprite",
            "attribute vec2 aVertexPosition;\nvoid main() {\n    gl_Position = vec4(aVertexPosition, 0.0, 1.0);\n}\n",
            "uniform float darknessLevel;\nvoid main() {\n    gl_FragColor = vec4(darknessLevel);\n}\n",
        ));
        let instance = app.world_mut().resource_mut::<ShaderClassCache>().instantiate(&base);
        let entity = app.world_mut().spawn(PatchedShader(instance)).id();
        app.world_mut().insert_resource(ScreenDimensions(Vec2::new(800.0, 600.0)));

        app.update();

        let value = app
            .world()
            .get::<PatchedShader>(entity)
            .and_then(|shader| shader.0.uniform("screenDimensions").cloned());
        assert_eq!(value, Some(UniformValue::Vec2(Vec2::new(800.0, 600.0))));
    }

    #[test]
    fn test_scene_teardown_and_activation() {
        let mut app = app();
        let a = app.world_mut().spawn_empty().id();
        place(app.world_mut(), "Token#a.icon", a, 0.0);
        app.update();

        teardown_scene(app.world_mut());
        assert!(app.world_mut().resource_mut::<Boards>().primary_mut().is_none());
        app.world_mut().resource_mut::<MaskRegistry>().invalidate_all(MaskCategory::Tiles);
        assert!(!app.world().resource::<MaskRegistry>().has_pending());

        app.update();
        let composited = app.world().resource::<CompositedBoards>();
        assert!(composited.get(PRIMARY_BOARD).is_none());

        activate_scene(app.world_mut());
        assert!(app.world().resource::<Boards>().is_active());

        let sent = app
            .world_mut()
            .run_system_once(|mut events: EventWriter<SceneLifecycle>| {
                events.write(SceneLifecycle::TearDown);
            })
            .is_ok();
        assert!(sent);
        app.update();
        assert!(!app.world().resource::<Boards>().is_active());
    }

    #[test]
    fn test_debug_setting_rebuilds_shader_classes() {
        let mut app = app();
        app.update();
        assert!(app.world().resource::<ShaderClassCache>().optimize());

        app.world_mut().resource_mut::<VisionLayersSettings>().debug = true;
        app.update();
        assert!(!app.world().resource::<ShaderClassCache>().optimize());
    }
}

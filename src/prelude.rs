pub use crate::{
    VisionLayersPlugin, VisionLayersSystems,
    board::{
        Board, BoardEntry, Boards, CompositeOrder, CompositedBoards, CompositedLayer, DrawItem, LiveZIndex,
        OverheadState, PRIMARY_BOARD, ZOrder, layers,
    },
    debounce::{RefreshQueue, TokenIcon, TokenIconRefresh, TokenRefreshQueue},
    levels::{
        CompositionMode, HostPlacement, IconPass, LevelRange, Levels, LevelsBridge, LevelsFlags,
        LevelsPlacement, LevelsSpriteIndex, PlacementPolicies, TileAppearance, TileOcclusion,
        TileOcclusionPolicy, TileState, TokenIconPlacementPolicy, TokenState,
    },
    mask::{MaskCategory, MaskLayer, MaskLayers, MaskRegistry},
    scene::{SceneLifecycle, SceneState, activate_scene, teardown_scene},
    settings::VisionLayersSettings,
    shader::{
        DarknessLevelPatch, FrameContext, LightingUniforms, PatchedShader, ScreenDimensions, ShaderClass,
        ShaderClassCache, ShaderClassPatch, ShaderInstance, ShaderPatchError, ShaderPatcher, ShaderSource,
        ShaderStage, UniformMap, UniformValue, VisibilityFilter,
    },
    vision_limitation::{
        DetectionLimit, DetectionModeDescriptor, DetectionModes, DetectionType, DocumentKind, FLAG_SCOPE,
        LimitValue, VisionLimitationData, VisionLimitationView,
    },
};

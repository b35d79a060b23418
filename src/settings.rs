use crate::board::PRIMARY_BOARD;
use bevy::prelude::{Reflect, ReflectResource, Resource};

/// Global configuration resource for the vision layers pipeline.
/// 视觉图层管线的全局设置
///
/// # Fields
/// - `enabled`: master switch; when off no compositing, mask or shader
///   systems run
/// - `debug`: keeps generated shader text readable by omitting the
///   `OPTIMIZE_GLSL` define from patched programs
/// - `primary_board`: name of the board tokens, tiles and lights are placed on
///
/// ```rust
/// # use bevy_vision_layers::prelude::*;
/// let settings = VisionLayersSettings {
///     debug: true,
///     ..Default::default()
/// };
/// assert_eq!(settings.primary_board, "primary");
/// ```
#[derive(Resource, Reflect, Clone, Debug, PartialEq)]
#[reflect(Resource)]
pub struct VisionLayersSettings {
    /// 是否启用视觉图层
    /// Global enable/disable switch.
    pub enabled: bool,

    /// 调试模式
    /// Debug mode. Toggling it rebuilds every patched shader class.
    pub debug: bool,

    /// 主画板名称
    /// Board whose layers feed mask recomputation.
    pub primary_board: String,
}

impl Default for VisionLayersSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            primary_board: PRIMARY_BOARD.to_string(),
        }
    }
}

impl VisionLayersSettings {
    /// Whether patched shaders carry the optimize define.
    pub fn optimize_shaders(&self) -> bool {
        !self.debug
    }
}

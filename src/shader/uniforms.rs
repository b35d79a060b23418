use bevy::asset::Handle;
use bevy::math::{Vec2, Vec3, Vec4};
use bevy::prelude::{Image, Resource};
use std::collections::BTreeMap;

/// Uniform written by patched vertex shaders to map positions to screen UVs.
pub const SCREEN_DIMENSIONS: &str = "screenDimensions";
/// Varying carrying the screen-space mask coordinate to the fragment stage.
pub const MASK_UVS: &str = "vUvsMask";
/// Sampler holding the per-pixel darkness level of the current frame.
pub const DARKNESS_LEVEL_TEXTURE: &str = "darknessLevelTexture";
/// Sampler holding the background color of the current frame.
pub const BACKGROUND_COLOR_TEXTURE: &str = "backgroundColorTexture";

/// 当前帧共享的光照纹理
/// Lighting textures shared by every patched shader in the current frame
///
/// The lighting subsystem is the only writer and updates the handles before
/// any shader reads them; the system ordering of the host app enforces this.
#[derive(Resource, Debug, Clone, Default)]
pub struct LightingUniforms {
    pub darkness_level_texture: Handle<Image>,
    pub color_background_texture: Handle<Image>,
}

/// Size of the render target in pixels.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct ScreenDimensions(pub Vec2);

impl Default for ScreenDimensions {
    fn default() -> Self {
        Self(Vec2::ONE)
    }
}

/// A value bound to a shader uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Texture(Handle<Image>),
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<Handle<Image>> for UniformValue {
    fn from(value: Handle<Image>) -> Self {
        UniformValue::Texture(value)
    }
}

/// Uniform name → value. Ordered so dumps and comparisons are stable.
pub type UniformMap = BTreeMap<String, UniformValue>;

/// Per-frame inputs handed to shader pre-render hooks.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub screen_dimensions: Vec2,
    pub lighting: &'a LightingUniforms,
}

//! Darkness-level patch for sprites drawn into the primary board.
//! 主画板精灵的黑暗度补丁
//!
//! Sprite shaders normally receive the darkness level as a single scalar.
//! The patched subclass samples it per pixel from the lighting darkness
//! texture instead, using a screen-space coordinate computed in the vertex
//! stage.

use super::cache::{ShaderClass, ShaderClassPatch};
use super::patcher::{ShaderPatchError, ShaderPatcher, ShaderStage};
use super::uniforms::{
    DARKNESS_LEVEL_TEXTURE, FrameContext, MASK_UVS, SCREEN_DIMENSIONS, UniformMap, UniformValue,
};
use bevy::math::Vec2;
use std::sync::Arc;

/// Variable replaced by the sampled darkness level.
pub const DARKNESS_LEVEL: &str = "darknessLevel";

const VERTEX_MAIN: &str = "
void main() {
    vUvsMask = aVertexPosition / screenDimensions;
    @main();
}
";

const FRAGMENT_MAIN: &str = "
void main() {
    darknessLevel = texture2D(darknessLevelTexture, vUvsMask).r;
    @main();
}
";

/// Derives `VisionLayers.<base>` subclasses sampling darkness per pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct DarknessLevelPatch;

impl ShaderClassPatch for DarknessLevelPatch {
    fn apply(&self, base: &Arc<ShaderClass>, optimize: bool) -> Result<ShaderClass, ShaderPatchError> {
        let vertex = ShaderPatcher::new(ShaderStage::Vertex)
            .optimize(optimize)
            .set_source(base.vertex().text())
            .add_uniform(SCREEN_DIMENSIONS, "vec2")?
            .add_varying(MASK_UVS, "vec2")?
            .wrap_main(VERTEX_MAIN)?
            .source();

        let fragment = ShaderPatcher::new(ShaderStage::Fragment)
            .optimize(optimize)
            .set_source(base.fragment().text())
            .add_varying(MASK_UVS, "vec2")?
            .add_uniform(DARKNESS_LEVEL_TEXTURE, "sampler2D")?
            .override_variable(DARKNESS_LEVEL)?
            .wrap_main(FRAGMENT_MAIN)?
            .source();

        Ok(
            ShaderClass::derive_from(base, format!("VisionLayers.{}", base.name()), vertex, fragment)
                .with_default_uniform(DARKNESS_LEVEL_TEXTURE, UniformValue::Int(0))
                .with_default_uniform(SCREEN_DIMENSIONS, Vec2::ONE)
                .with_pre_render(bind_darkness_level),
        )
    }
}

fn bind_darkness_level(uniforms: &mut UniformMap, frame: &FrameContext<'_>) {
    uniforms.insert(SCREEN_DIMENSIONS.into(), UniformValue::Vec2(frame.screen_dimensions));
    uniforms.insert(
        DARKNESS_LEVEL_TEXTURE.into(),
        UniformValue::Texture(frame.lighting.darkness_level_texture.clone()),
    );
}

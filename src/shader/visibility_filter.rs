//! Background-color sampling for the visibility filter.
//! 可见性滤镜的背景色采样
//!
//! The host's visibility filter tints unexplored areas with one flat
//! background color. The patched filter samples the color per pixel from the
//! lighting background texture whenever a fog texture is bound.

use super::patcher::{ShaderPatchError, ShaderPatcher, ShaderSource, ShaderStage};
use super::uniforms::{BACKGROUND_COLOR_TEXTURE, LightingUniforms, UniformMap, UniformValue};
use bevy::log::warn;
use bevy::prelude::{Component, Query, Res};

/// Marker define appended to patched filters; patching is skipped when present.
pub const VISION_LAYERS_MARKER: &str = "#define VISION_LAYERS\n";

const FILTER_MAIN: &str = "
void main() {
    if (hasFogTexture) {
        backgroundColor = texture2D(backgroundColorTexture, vMaskTextureCoord).rgb;
    }

    @main();
}

#define VISION_LAYERS
";

/// Patches a visibility-filter fragment program. Already-patched input is
/// returned unchanged.
pub fn patch_visibility_filter(fragment: &str, optimize: bool) -> Result<ShaderSource, ShaderPatchError> {
    if fragment.contains(VISION_LAYERS_MARKER) {
        return Ok(ShaderSource::new(ShaderStage::Fragment, fragment));
    }

    Ok(ShaderPatcher::new(ShaderStage::Fragment)
        .optimize(optimize)
        .set_source(fragment)
        .require_variable("hasFogTexture")?
        .require_variable("vMaskTextureCoord")?
        .override_variable("backgroundColor")?
        .add_uniform(BACKGROUND_COLOR_TEXTURE, "sampler2D")?
        .wrap_main(FILTER_MAIN)?
        .source())
}

/// 可见性滤镜
/// Visibility filter shader attached to the scene's fog sprite
#[derive(Component, Debug, Clone)]
pub struct VisibilityFilter {
    pub fragment: ShaderSource,
    pub uniforms: UniformMap,
}

impl VisibilityFilter {
    /// Builds the filter, keeping the host program when it cannot be patched.
    pub fn create(fragment: &str, optimize: bool) -> Self {
        let fragment = patch_visibility_filter(fragment, optimize).unwrap_or_else(|err| {
            warn!("Visibility filter left unpatched: {}", err);
            ShaderSource::new(ShaderStage::Fragment, fragment)
        });
        Self {
            fragment,
            uniforms: UniformMap::new(),
        }
    }

    pub fn is_patched(&self) -> bool {
        self.fragment.contains(VISION_LAYERS_MARKER)
    }
}

pub(crate) fn sync_visibility_filter_uniforms(
    lighting: Res<LightingUniforms>,
    mut filters: Query<&mut VisibilityFilter>,
) {
    for mut filter in &mut filters {
        filter.uniforms.insert(
            BACKGROUND_COLOR_TEXTURE.into(),
            UniformValue::Texture(lighting.color_background_texture.clone()),
        );
    }
}

//! Shader source patching and patched shader classes.
//! 着色器源码补丁与补丁着色器类

mod lexer;
mod syntax;

pub mod cache;
pub mod patcher;
pub mod primary;
pub mod uniforms;
pub mod visibility_filter;

pub use cache::{PatchedShader, PreRenderHook, ShaderClass, ShaderClassCache, ShaderClassPatch, ShaderInstance};
pub use patcher::{MAIN_MARKER, OPTIMIZE_DIRECTIVE, ShaderPatchError, ShaderPatcher, ShaderSource, ShaderStage};
pub use primary::DarknessLevelPatch;
pub use uniforms::{FrameContext, LightingUniforms, ScreenDimensions, UniformMap, UniformValue};
pub use visibility_filter::{VisibilityFilter, patch_visibility_filter};

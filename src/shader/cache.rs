use super::patcher::{ShaderPatchError, ShaderSource, ShaderStage};
use super::primary::DarknessLevelPatch;
use super::uniforms::{FrameContext, LightingUniforms, ScreenDimensions, UniformMap, UniformValue};
use crate::settings::VisionLayersSettings;
use bevy::log::{debug, warn};
use bevy::prelude::{Component, DetectChanges, Query, Res, ResMut, Resource};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Hook run before each draw to refresh an instance's uniforms.
pub type PreRenderHook = fn(&mut UniformMap, &FrameContext<'_>);

/// 着色器类：一对源码、默认 uniform 以及每帧钩子
/// Shader class: a source pair, default uniforms and a per-frame hook
///
/// Classes are shared through `Arc` and compared by identity. A derived class
/// links to its parent weakly, so deriving never extends the parent's
/// lifetime.
#[derive(Debug)]
pub struct ShaderClass {
    name: String,
    vertex: ShaderSource,
    fragment: ShaderSource,
    default_uniforms: UniformMap,
    parent: Option<Weak<ShaderClass>>,
    pre_render: Option<PreRenderHook>,
}

impl ShaderClass {
    pub fn new(name: impl Into<String>, vertex: &str, fragment: &str) -> Self {
        Self {
            name: name.into(),
            vertex: ShaderSource::new(ShaderStage::Vertex, vertex),
            fragment: ShaderSource::new(ShaderStage::Fragment, fragment),
            default_uniforms: UniformMap::new(),
            parent: None,
            pre_render: None,
        }
    }

    /// A subclass of `parent` with new sources; inherits the parent's defaults.
    pub fn derive_from(
        parent: &Arc<ShaderClass>,
        name: impl Into<String>,
        vertex: ShaderSource,
        fragment: ShaderSource,
    ) -> Self {
        Self {
            name: name.into(),
            vertex,
            fragment,
            default_uniforms: parent.default_uniforms.clone(),
            parent: Some(Arc::downgrade(parent)),
            pre_render: None,
        }
    }

    pub fn with_default_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.default_uniforms.insert(name.into(), value.into());
        self
    }

    pub fn with_pre_render(mut self, hook: PreRenderHook) -> Self {
        self.pre_render = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex(&self) -> &ShaderSource {
        &self.vertex
    }

    pub fn fragment(&self) -> &ShaderSource {
        &self.fragment
    }

    pub fn default_uniforms(&self) -> &UniformMap {
        &self.default_uniforms
    }

    /// The parent class, if it is still alive.
    pub fn parent(&self) -> Option<Arc<ShaderClass>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Runs the parent chain's hooks, then this class's hook.
    pub fn pre_render(&self, uniforms: &mut UniformMap, frame: &FrameContext<'_>) {
        if let Some(parent) = self.parent() {
            parent.pre_render(uniforms, frame);
        }
        if let Some(hook) = self.pre_render {
            hook(uniforms, frame);
        }
    }

    pub fn instantiate(self: &Arc<Self>) -> ShaderInstance {
        ShaderInstance {
            class: Arc::clone(self),
            uniforms: self.default_uniforms.clone(),
        }
    }
}

/// A transformation turning a base class into its patched subclass.
pub trait ShaderClassPatch: Send + Sync + 'static {
    fn apply(&self, base: &Arc<ShaderClass>, optimize: bool) -> Result<ShaderClass, ShaderPatchError>;
}

#[derive(Debug)]
enum CachedClass {
    Patched(Arc<ShaderClass>),
    /// Patching failed; the base is used as-is. Holds no strong reference.
    Unpatched,
}

#[derive(Debug)]
struct CacheEntry {
    base: Weak<ShaderClass>,
    class: CachedClass,
}

/// 着色器类缓存
/// Shader class cache
///
/// Maps each base class (by identity) to its patched subclass. Entries are
/// derived once and reused for the lifetime of the scene; the cache only
/// holds weak references to base classes.
#[derive(Resource)]
pub struct ShaderClassCache {
    canonical: Option<Arc<ShaderClass>>,
    patch: Box<dyn ShaderClassPatch>,
    optimize: bool,
    entries: HashMap<usize, CacheEntry>,
}

impl Default for ShaderClassCache {
    fn default() -> Self {
        Self::new(DarknessLevelPatch)
    }
}

impl std::fmt::Debug for ShaderClassCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderClassCache")
            .field("canonical", &self.canonical.as_ref().map(|c| c.name().to_string()))
            .field("optimize", &self.optimize)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn identity(class: &Arc<ShaderClass>) -> usize {
    Arc::as_ptr(class) as usize
}

impl ShaderClassCache {
    pub fn new(patch: impl ShaderClassPatch) -> Self {
        Self {
            canonical: None,
            patch: Box::new(patch),
            optimize: true,
            entries: HashMap::new(),
        }
    }

    /// Registers the engine's plain sampler class; it is never patched.
    pub fn set_canonical_base(&mut self, class: Arc<ShaderClass>) {
        self.canonical = Some(class);
    }

    pub fn optimize(&self) -> bool {
        self.optimize
    }

    /// Changing the flag drops every derived class so they are rebuilt.
    pub fn set_optimize(&mut self, optimize: bool) {
        if self.optimize != optimize {
            self.optimize = optimize;
            self.entries.clear();
        }
    }

    /// Returns the patched subclass of `base`, deriving it on first use.
    pub fn derive(&mut self, base: &Arc<ShaderClass>) -> Arc<ShaderClass> {
        if self.canonical.as_ref().is_some_and(|c| Arc::ptr_eq(c, base)) || self.is_derived(base) {
            return Arc::clone(base);
        }

        let key = identity(base);
        if let Some(entry) = self.entries.get(&key) {
            if entry.base.upgrade().is_some_and(|alive| Arc::ptr_eq(&alive, base)) {
                return match &entry.class {
                    CachedClass::Patched(class) => Arc::clone(class),
                    CachedClass::Unpatched => Arc::clone(base),
                };
            }
            // the address was reused by a new class
            self.entries.remove(&key);
        }

        let class = match self.patch.apply(base, self.optimize) {
            Ok(derived) => {
                debug!("Derived shader class {} from {}", derived.name(), base.name());
                CachedClass::Patched(Arc::new(derived))
            }
            Err(err) => {
                warn!("Shader class {} left unpatched: {}", base.name(), err);
                CachedClass::Unpatched
            }
        };
        let derived = match &class {
            CachedClass::Patched(class) => Arc::clone(class),
            CachedClass::Unpatched => Arc::clone(base),
        };
        self.entries.insert(
            key,
            CacheEntry {
                base: Arc::downgrade(base),
                class,
            },
        );
        derived
    }

    /// Derives `base` and creates an instance with its default uniforms.
    pub fn instantiate(&mut self, base: &Arc<ShaderClass>) -> ShaderInstance {
        self.derive(base).instantiate()
    }

    fn is_derived(&self, class: &Arc<ShaderClass>) -> bool {
        self.entries.values().any(|entry| match &entry.class {
            CachedClass::Patched(derived) => Arc::ptr_eq(derived, class),
            CachedClass::Unpatched => false,
        })
    }

    /// Drops entries whose base class no longer exists.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.base.strong_count() > 0);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A class plus the live uniform values of one drawable.
#[derive(Debug, Clone)]
pub struct ShaderInstance {
    class: Arc<ShaderClass>,
    uniforms: UniformMap,
}

impl ShaderInstance {
    pub fn class(&self) -> &Arc<ShaderClass> {
        &self.class
    }

    pub fn uniforms(&self) -> &UniformMap {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.uniforms.insert(name.into(), value.into());
    }

    pub fn pre_render(&mut self, frame: &FrameContext<'_>) {
        let class = Arc::clone(&self.class);
        class.pre_render(&mut self.uniforms, frame);
    }
}

/// Shader instance attached to a drawable entity; refreshed every frame.
#[derive(Component, Debug, Clone)]
pub struct PatchedShader(pub ShaderInstance);

/// Keeps the cache's optimize flag in step with the debug setting.
pub(crate) fn sync_shader_settings(settings: Res<VisionLayersSettings>, mut cache: ResMut<ShaderClassCache>) {
    if settings.is_changed() {
        cache.set_optimize(settings.optimize_shaders());
    }
}

/// Runs every patched shader's pre-render hook with this frame's inputs.
pub(crate) fn sync_patched_shader_uniforms(
    lighting: Res<LightingUniforms>,
    screen: Res<ScreenDimensions>,
    mut shaders: Query<&mut PatchedShader>,
) {
    let frame = FrameContext {
        screen_dimensions: screen.0,
        lighting: &lighting,
    };
    for mut shader in &mut shaders {
        shader.0.pre_render(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::uniforms::{DARKNESS_LEVEL_TEXTURE, SCREEN_DIMENSIONS};
    use bevy::asset::{Handle, weak_handle};
    use bevy::math::Vec2;
    use bevy::prelude::Image;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VERT: &str = "\
attribute vec2 aVertexPosition;
uniform mat3 projectionMatrix;
varying vec2 vUvs;
void main() {
    vUvs = aVertexPosition;
    gl_Position = vec4((projectionMatrix * vec3(aVertexPosition, 1.0)).xy, 0.0, 1.0);
}
";

    const FRAG: &str = "\
uniform sampler2D sampler;
uniform float darknessLevel;
varying vec2 vUvs;
void main() {
    gl_FragColor = texture2D(sampler, vUvs) * (1.0 - darknessLevel);
}
";

    const DARKNESS: Handle<Image> = weak_handle!("5b0c7e9a-3f55-4c36-9d7e-0a6f3c1d2e41");

    fn base() -> Arc<ShaderClass> {
        Arc::new(ShaderClass::new("TokenSamplerShader", VERT, FRAG).with_default_uniform("tintAlpha", 1.0))
    }

    struct CountingPatch(Arc<AtomicUsize>);

    impl ShaderClassPatch for CountingPatch {
        fn apply(&self, base: &Arc<ShaderClass>, optimize: bool) -> Result<ShaderClass, ShaderPatchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            DarknessLevelPatch.apply(base, optimize)
        }
    }

    #[test]
    fn derive_is_memoized_per_base() {
        let mut cache = ShaderClassCache::default();
        let base = base();
        let first = cache.derive(&base);
        let second = cache.derive(&base);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &base));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn canonical_base_is_returned_unchanged() {
        let mut cache = ShaderClassCache::default();
        let canonical = base();
        cache.set_canonical_base(Arc::clone(&canonical));
        assert!(Arc::ptr_eq(&cache.derive(&canonical), &canonical));
        assert!(cache.is_empty());
    }

    #[test]
    fn derived_class_is_not_patched_again() {
        let mut cache = ShaderClassCache::default();
        let derived = cache.derive(&base());
        assert!(Arc::ptr_eq(&cache.derive(&derived), &derived));
    }

    #[test]
    fn failed_patch_falls_back_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = ShaderClassCache::new(CountingPatch(Arc::clone(&calls)));
        let incompatible = Arc::new(ShaderClass::new("Plain", VERT, "void main() { gl_FragColor = vec4(1.0); }"));
        assert!(Arc::ptr_eq(&cache.derive(&incompatible), &incompatible));
        assert!(Arc::ptr_eq(&cache.derive(&incompatible), &incompatible));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_does_not_keep_base_alive() {
        let mut cache = ShaderClassCache::default();
        let base = base();
        let watch = Arc::downgrade(&base);
        let derived = cache.derive(&base);
        drop(base);
        assert!(watch.upgrade().is_none());
        assert!(derived.parent().is_none());
        assert_eq!(cache.prune(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn derived_defaults_extend_base_defaults() {
        let mut cache = ShaderClassCache::default();
        let derived = cache.derive(&base());
        let defaults = derived.default_uniforms();
        assert_eq!(defaults.get("tintAlpha"), Some(&UniformValue::Float(1.0)));
        assert_eq!(defaults.get(SCREEN_DIMENSIONS), Some(&UniformValue::Vec2(Vec2::ONE)));
        assert!(defaults.contains_key(DARKNESS_LEVEL_TEXTURE));
    }

    #[test]
    fn pre_render_runs_parent_then_own_hook() {
        fn base_hook(uniforms: &mut UniformMap, _: &FrameContext<'_>) {
            uniforms.insert("tintAlpha".into(), UniformValue::Float(0.5));
        }
        let base = Arc::new(ShaderClass::new("Hooked", VERT, FRAG).with_pre_render(base_hook));
        let mut cache = ShaderClassCache::default();
        let mut instance = cache.instantiate(&base);

        let lighting = LightingUniforms {
            darkness_level_texture: DARKNESS,
            ..Default::default()
        };
        instance.pre_render(&FrameContext {
            screen_dimensions: Vec2::new(1920.0, 1080.0),
            lighting: &lighting,
        });

        assert_eq!(instance.uniform("tintAlpha"), Some(&UniformValue::Float(0.5)));
        assert_eq!(
            instance.uniform(SCREEN_DIMENSIONS),
            Some(&UniformValue::Vec2(Vec2::new(1920.0, 1080.0)))
        );
        assert_eq!(instance.uniform(DARKNESS_LEVEL_TEXTURE), Some(&UniformValue::Texture(DARKNESS)));
    }

    #[test]
    fn toggling_optimize_rebuilds_classes() {
        let mut cache = ShaderClassCache::default();
        let base = base();
        let optimized = cache.derive(&base);
        assert!(optimized.fragment().contains("#define OPTIMIZE_GLSL"));

        cache.set_optimize(false);
        let debug = cache.derive(&base);
        assert!(!Arc::ptr_eq(&optimized, &debug));
        assert!(!debug.fragment().contains("#define OPTIMIZE_GLSL"));
    }
}

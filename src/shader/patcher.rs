use super::syntax::{Edit, Program, apply_edits, declarator_removal};
use std::fmt;
use std::sync::Arc;

/// Marker substituted with a call to the renamed original entry point.
pub const MAIN_MARKER: &str = "@main()";

/// Preprocessor flag appended to wrapped programs when optimization is on.
pub const OPTIMIZE_DIRECTIVE: &str = "#define OPTIMIZE_GLSL";

/// 着色器阶段
/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Immutable program text tagged with its stage.
/// 带阶段标记的不可变着色器源码
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    stage: ShaderStage,
    text: Arc<str>,
}

impl ShaderSource {
    pub fn new(stage: ShaderStage, text: impl Into<Arc<str>>) -> Self {
        Self {
            stage,
            text: text.into(),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

/// 着色器补丁错误
/// Shader patch error
///
/// Any error aborts the whole patch chain; callers fall back to the
/// unpatched program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderPatchError {
    /// A global with this name is already declared.
    DuplicateDeclaration { stage: ShaderStage, name: String },
    /// The variable to override has no declaration or assignment to rewrite.
    VariableNotFound { stage: ShaderStage, name: String },
    /// The program does not declare or assign a required variable.
    MissingRequirement { stage: ShaderStage, name: String },
    /// The program has no `main` function to wrap.
    MissingEntryPoint { stage: ShaderStage },
    /// The wrapper template does not define `main`.
    InvalidTemplate { stage: ShaderStage },
}

impl fmt::Display for ShaderPatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderPatchError::DuplicateDeclaration { stage, name } => {
                write!(f, "{stage} shader already declares `{name}`")
            }
            ShaderPatchError::VariableNotFound { stage, name } => {
                write!(f, "{stage} shader has no variable `{name}` to override")
            }
            ShaderPatchError::MissingRequirement { stage, name } => {
                write!(f, "{stage} shader does not provide required variable `{name}`")
            }
            ShaderPatchError::MissingEntryPoint { stage } => {
                write!(f, "{stage} shader has no `main` function")
            }
            ShaderPatchError::InvalidTemplate { stage } => {
                write!(f, "{stage} wrapper template does not define `main`")
            }
        }
    }
}

impl std::error::Error for ShaderPatchError {}

/// Structured text transformer for one shader program.
/// 着色器源码补丁器
///
/// Steps consume and return the patcher so a whole transformation reads as
/// one chain; the first failing step ends the chain with its error:
///
/// ```rust
/// # use bevy_vision_layers::prelude::*;
/// # fn main() -> Result<(), ShaderPatchError> {
/// let base = "uniform float alpha;\nvoid main() {\n    gl_FragColor = vec4(alpha);\n}\n";
/// let patched = ShaderPatcher::new(ShaderStage::Fragment)
///     .set_source(base)
///     .add_uniform("tint", "vec3")?
///     .wrap_main("void main() {\n    @main();\n}\n")?
///     .source();
/// assert!(patched.text().contains("uniform vec3 tint;"));
/// # Ok(())
/// # }
/// ```
///
/// Every byte outside the regions a step touches is preserved.
#[derive(Debug, Clone)]
pub struct ShaderPatcher {
    stage: ShaderStage,
    text: String,
    optimize: bool,
    wrapped: bool,
}

impl ShaderPatcher {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            text: String::new(),
            optimize: false,
            wrapped: false,
        }
    }

    /// Replaces the current source and resets the transformation state.
    pub fn set_source(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self.wrapped = false;
        self
    }

    /// Appends [`OPTIMIZE_DIRECTIVE`] after the wrapper when enabled.
    pub fn optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn add_uniform(self, name: &str, ty: &str) -> Result<Self, ShaderPatchError> {
        self.add_declaration("uniform", name, ty)
    }

    pub fn add_varying(self, name: &str, ty: &str) -> Result<Self, ShaderPatchError> {
        self.add_declaration("varying", name, ty)
    }

    fn add_declaration(mut self, qualifier: &str, name: &str, ty: &str) -> Result<Self, ShaderPatchError> {
        let program = Program::parse(&self.text);
        if program.global(name).is_some() {
            return Err(ShaderPatchError::DuplicateDeclaration {
                stage: self.stage,
                name: name.to_string(),
            });
        }

        let last_of = |q: &str| {
            program
                .declarations()
                .filter(|(_, decl)| decl.has_qualifier(q))
                .map(|(item, _)| item)
                .last()
        };
        let anchor = last_of(qualifier)
            .or_else(|| last_of("uniform"))
            .or_else(|| program.header_end());

        let line = format!("{qualifier} {ty} {name};\n");
        let edit = match anchor {
            Some(item) => {
                let at = program.line_after(item);
                if at == self.text.len() && !self.text.ends_with('\n') {
                    Edit::insert(at, format!("\n{line}"))
                } else {
                    Edit::insert(at, line)
                }
            }
            None => Edit::insert(0, line),
        };

        self.text = apply_edits(&self.text, vec![edit]);
        Ok(self)
    }

    /// Rewrites `name` so wrapper code can assign it before the original
    /// entry point runs.
    ///
    /// A storage-qualified global loses its qualifier and initializer; a local
    /// declaration in `main` is hoisted to a plain global and removed; a plain
    /// assignment in `main` is removed.
    pub fn override_variable(mut self, name: &str) -> Result<Self, ShaderPatchError> {
        let program = Program::parse(&self.text);
        let mut edits = Vec::new();

        if let Some((item, decl)) = program.global(name)
            && decl.is_storage_qualified()
            && let Some((index, declarator)) = decl.declarator(name)
        {
            let plain = format!("{} {}{};", decl.ty, declarator.name, declarator.array);
            match declarator_removal(decl, index) {
                Some(range) => {
                    edits.push(Edit::replace(range, ""));
                    edits.push(Edit::insert(program.line_after(item), format!("{plain}\n")));
                }
                None => edits.push(Edit::replace(item.span.clone(), plain)),
            }
        } else if let Some((main_item, main)) = program.function_item("main") {
            let statements = program.statements(main);
            let local = statements.iter().find_map(|s| {
                let decl = s.declaration.as_ref()?;
                let (index, declarator) = decl.declarator(name)?;
                Some((s, decl, index, declarator))
            });

            if let Some((statement, decl, index, declarator)) = local {
                let global = format!("{} {}{};\n", decl.ty, declarator.name, declarator.array);
                match declarator_removal(decl, index) {
                    Some(range) => edits.push(Edit::replace(range, "")),
                    None => edits.push(Edit::replace(statement.span.clone(), "")),
                }
                edits.push(Edit::insert(main_item.span.start, global));
            } else {
                let assignments: Vec<_> = statements
                    .iter()
                    .filter(|s| s.assigned.as_deref() == Some(name))
                    .map(|s| Edit::replace(s.span.clone(), ""))
                    .collect();
                edits.extend(assignments);
            }
        }

        if edits.is_empty() {
            return Err(ShaderPatchError::VariableNotFound {
                stage: self.stage,
                name: name.to_string(),
            });
        }

        self.text = apply_edits(&self.text, edits);
        Ok(self)
    }

    /// Fails unless `name` is declared or assigned somewhere in the program.
    pub fn require_variable(self, name: &str) -> Result<Self, ShaderPatchError> {
        if Program::parse(&self.text).declares_or_assigns(name) {
            Ok(self)
        } else {
            Err(ShaderPatchError::MissingRequirement {
                stage: self.stage,
                name: name.to_string(),
            })
        }
    }

    /// Renames the current `main` and appends `template` as the new entry
    /// point, with [`MAIN_MARKER`] replaced by a call to the renamed one.
    pub fn wrap_main(mut self, template: &str) -> Result<Self, ShaderPatchError> {
        if Program::parse(template).function("main").is_none() {
            return Err(ShaderPatchError::InvalidTemplate { stage: self.stage });
        }

        let program = Program::parse(&self.text);
        let Some(main) = program.function("main") else {
            return Err(ShaderPatchError::MissingEntryPoint { stage: self.stage });
        };

        let mut renamed = "vl_main".to_string();
        let mut suffix = 0;
        while program.is_ident_used(&renamed) || template.contains(renamed.as_str()) {
            suffix += 1;
            renamed = format!("vl_main_{suffix}");
        }

        let mut text = apply_edits(&self.text, vec![Edit::replace(main.name_span.clone(), renamed.clone())]);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&template.replace(MAIN_MARKER, &format!("{renamed}()")));
        if !text.ends_with('\n') {
            text.push('\n');
        }

        self.text = text;
        self.wrapped = true;
        Ok(self)
    }

    /// The transformed program. Calling this repeatedly without further
    /// steps yields identical text.
    pub fn source(&self) -> ShaderSource {
        let mut text = self.text.clone();
        if self.optimize && self.wrapped && !text.contains(OPTIMIZE_DIRECTIVE) {
            text.push_str(OPTIMIZE_DIRECTIVE);
            text.push('\n');
        }
        ShaderSource::new(self.stage, text)
    }
}

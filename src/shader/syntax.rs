//! Top-level structure of a GLSL ES program.
//!
//! This is not a full GLSL parser. It recognises only what the patcher needs
//! to edit safely: preprocessor lines, `precision` statements, global
//! declarations (with their qualifiers and declarators), and function
//! definitions with their body ranges. Everything else is kept as opaque
//! `Other` items.

use super::lexer::{Token, TokenKind, tokenize};
use std::ops::Range;

/// Storage and precision qualifiers that may precede a declaration's type.
const QUALIFIERS: &[&str] = &[
    "uniform",
    "varying",
    "attribute",
    "in",
    "out",
    "inout",
    "const",
    "highp",
    "mediump",
    "lowp",
    "flat",
    "smooth",
    "centroid",
    "invariant",
];

/// Identifiers that may be followed by another identifier without forming a
/// declaration.
const NON_TYPE_KEYWORDS: &[&str] = &["return", "else", "case", "discard", "break", "continue"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declarator {
    pub name: String,
    pub name_span: Range<usize>,
    /// Array suffix directly after the name, e.g. `[4]`.
    pub array: String,
    /// Name through the end of the initializer, excluding the separator.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub qualifiers: Vec<String>,
    pub ty: String,
    pub declarators: Vec<Declarator>,
}

impl Declaration {
    pub fn has_qualifier(&self, qualifier: &str) -> bool {
        self.qualifiers.iter().any(|q| q == qualifier)
    }

    /// Storage qualifiers only (precision and interpolation qualifiers excluded).
    pub fn is_storage_qualified(&self) -> bool {
        self.qualifiers.iter().any(|q| {
            matches!(
                q.as_str(),
                "uniform" | "varying" | "attribute" | "in" | "out" | "const" | "layout"
            )
        })
    }

    pub fn declarator(&self, name: &str) -> Option<(usize, &Declarator)> {
        self.declarators
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Function {
    pub name: String,
    pub name_span: Range<usize>,
    /// Significant-token indices of the opening and closing braces.
    pub body_tokens: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Preprocessor,
    Precision,
    Declaration(Declaration),
    Function(Function),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub kind: ItemKind,
    /// From the first significant byte through the terminating `;` or `}`.
    pub span: Range<usize>,
}

/// A statement found inside a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalStatement {
    pub span: Range<usize>,
    pub declaration: Option<Declaration>,
    /// Set when the statement is a plain assignment `name op= expr;`.
    pub assigned: Option<String>,
}

/// Parsed view over one program text.
#[derive(Debug)]
pub(crate) struct Program<'a> {
    pub src: &'a str,
    /// Significant tokens only (whitespace and comments dropped).
    pub tokens: Vec<Token>,
    pub items: Vec<Item>,
}

impl<'a> Program<'a> {
    pub fn parse(src: &'a str) -> Self {
        let tokens: Vec<Token> = tokenize(src)
            .into_iter()
            .filter(Token::is_significant)
            .collect();
        let mut program = Self {
            src,
            tokens,
            items: Vec::new(),
        };
        program.items = program.parse_items();
        program
    }

    fn text(&self, index: usize) -> &'a str {
        self.tokens[index].text(self.src)
    }

    fn is_punct(&self, index: usize, c: char) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.is_punct(self.src, c))
    }

    fn is_ident(&self, index: usize) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.kind == TokenKind::Ident)
    }

    fn parse_items(&self) -> Vec<Item> {
        let mut items = Vec::new();
        let mut i = 0;

        while i < self.tokens.len() {
            if self.tokens[i].kind == TokenKind::Preprocessor {
                items.push(Item {
                    kind: ItemKind::Preprocessor,
                    span: self.tokens[i].span.clone(),
                });
                i += 1;
                continue;
            }

            let start = i;
            let mut paren = 0i32;
            let mut brace = 0i32;
            let mut function_body = None;
            let mut end = self.tokens.len() - 1;

            let mut j = i;
            while j < self.tokens.len() {
                let tok = &self.tokens[j];
                if tok.kind == TokenKind::Punct {
                    match self.text(j) {
                        "(" => paren += 1,
                        ")" => paren -= 1,
                        "{" if brace == 0 && paren == 0 && j > start && self.is_punct(j - 1, ')') => {
                            let close = self.matching_brace(j);
                            function_body = Some(j..close);
                            end = close;
                            break;
                        }
                        "{" => brace += 1,
                        "}" => brace -= 1,
                        ";" if brace == 0 && paren == 0 => {
                            end = j;
                            break;
                        }
                        _ => {}
                    }
                }
                j += 1;
            }

            let span = self.tokens[start].span.start..self.tokens[end].span.end;
            let kind = match function_body {
                Some(body) => self.parse_function(start, body),
                None => self.classify_statement(start, end),
            };
            items.push(Item { kind, span });
            i = end + 1;
        }

        items
    }

    /// Index of the `}` closing the `{` at `open`, or the last token.
    fn matching_brace(&self, open: usize) -> usize {
        let mut depth = 0i32;
        for k in open..self.tokens.len() {
            if self.is_punct(k, '{') {
                depth += 1;
            } else if self.is_punct(k, '}') {
                depth -= 1;
                if depth == 0 {
                    return k;
                }
            }
        }
        self.tokens.len() - 1
    }

    fn parse_function(&self, start: usize, body: Range<usize>) -> ItemKind {
        let Some(paren) = (start..body.start).find(|&k| self.is_punct(k, '(')) else {
            return ItemKind::Other;
        };
        if paren == 0 || !self.is_ident(paren - 1) {
            return ItemKind::Other;
        }
        ItemKind::Function(Function {
            name: self.text(paren - 1).to_string(),
            name_span: self.tokens[paren - 1].span.clone(),
            body_tokens: body,
        })
    }

    fn classify_statement(&self, start: usize, end: usize) -> ItemKind {
        if self.text(start) == "precision" {
            return ItemKind::Precision;
        }
        if (start..=end).any(|k| self.is_punct(k, '{')) {
            // struct definitions and interface blocks
            return ItemKind::Other;
        }
        match self.parse_declaration(start, end) {
            Some(decl) => ItemKind::Declaration(decl),
            None => ItemKind::Other,
        }
    }

    /// Parses `qualifiers* type declarator (, declarator)*` in `start..end`,
    /// where `end` is the index of the terminating `;`.
    fn parse_declaration(&self, start: usize, end: usize) -> Option<Declaration> {
        let mut k = start;
        let mut qualifiers = Vec::new();

        while k < end && self.is_ident(k) {
            let word = self.text(k);
            if word == "layout" && self.is_punct(k + 1, '(') {
                qualifiers.push(word.to_string());
                k = self.skip_group(k + 1, '(', ')');
            } else if QUALIFIERS.contains(&word) {
                qualifiers.push(word.to_string());
                k += 1;
            } else {
                break;
            }
        }

        if k >= end || !self.is_ident(k) || NON_TYPE_KEYWORDS.contains(&self.text(k)) {
            return None;
        }
        let ty = self.text(k).to_string();
        k += 1;
        if self.is_punct(k, '[') {
            return None;
        }

        let mut declarators = Vec::new();
        loop {
            if k >= end || !self.is_ident(k) {
                return None;
            }
            let name_index = k;
            k += 1;

            let array_start = k;
            while self.is_punct(k, '[') {
                k = self.skip_group(k, '[', ']');
            }
            let array = if k > array_start {
                self.src[self.tokens[array_start].span.start..self.tokens[k - 1].span.end]
                    .to_string()
            } else {
                String::new()
            };

            let mut depth = 0i32;
            while k < end {
                match self.text(k) {
                    "(" | "[" => depth += 1,
                    ")" | "]" => depth -= 1,
                    "," if depth == 0 => break,
                    _ => {}
                }
                k += 1;
            }

            declarators.push(Declarator {
                name: self.text(name_index).to_string(),
                name_span: self.tokens[name_index].span.clone(),
                array,
                span: self.tokens[name_index].span.start..self.tokens[k - 1].span.end,
            });

            if k >= end {
                break;
            }
            k += 1; // ','
        }

        Some(Declaration {
            qualifiers,
            ty,
            declarators,
        })
    }

    /// Returns the index just past the group opened at `open`.
    fn skip_group(&self, open: usize, left: char, right: char) -> usize {
        let mut depth = 0i32;
        let mut k = open;
        while k < self.tokens.len() {
            if self.is_punct(k, left) {
                depth += 1;
            } else if self.is_punct(k, right) {
                depth -= 1;
                if depth == 0 {
                    return k + 1;
                }
            }
            k += 1;
        }
        k
    }

    pub fn declarations(&self) -> impl Iterator<Item = (&Item, &Declaration)> {
        self.items.iter().filter_map(|item| match &item.kind {
            ItemKind::Declaration(decl) => Some((item, decl)),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match &item.kind {
            ItemKind::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|f| f.name == name)
    }

    pub fn function_item(&self, name: &str) -> Option<(&Item, &Function)> {
        self.items.iter().find_map(|item| match &item.kind {
            ItemKind::Function(f) if f.name == name => Some((item, f)),
            _ => None,
        })
    }

    /// The global declaration introducing `name`, if any.
    pub fn global(&self, name: &str) -> Option<(&Item, &Declaration)> {
        self.declarations()
            .find(|(_, decl)| decl.declarator(name).is_some())
    }

    pub fn is_ident_used(&self, name: &str) -> bool {
        self.tokens.iter().any(|t| t.is_ident(self.src, name))
    }

    /// Byte offset where a new line can be inserted after `item`.
    pub fn line_after(&self, item: &Item) -> usize {
        match self.src[item.span.end..].find('\n') {
            Some(offset) => item.span.end + offset + 1,
            None => self.src.len(),
        }
    }

    /// End of the leading `#version` / `#extension` / `precision` header.
    pub fn header_end(&self) -> Option<&Item> {
        self.items
            .iter()
            .take_while(|item| matches!(item.kind, ItemKind::Preprocessor | ItemKind::Precision))
            .filter(|item| match item.kind {
                ItemKind::Precision => true,
                _ => {
                    let text = &self.src[item.span.clone()];
                    text.starts_with("#version") || text.starts_with("#extension")
                }
            })
            .last()
    }

    /// Statements directly inside `function`'s body, in order. Nested blocks
    /// are split at their braces, so statements inside `if`/`for` bodies are
    /// visited too.
    pub fn statements(&self, function: &Function) -> Vec<LocalStatement> {
        let mut statements = Vec::new();
        let body = function.body_tokens.clone();
        let mut start = body.start + 1;

        for k in body.start + 1..body.end {
            let t = self.text(k);
            let boundary = self.tokens[k].kind == TokenKind::Punct && matches!(t, ";" | "{" | "}");
            let directive = self.tokens[k].kind == TokenKind::Preprocessor;
            if !(boundary || directive) {
                continue;
            }
            if t == ";" && k > start {
                statements.push(self.local_statement(start, k));
            }
            start = k + 1;
        }

        statements
    }

    fn local_statement(&self, start: usize, end: usize) -> LocalStatement {
        let span = self.tokens[start].span.start..self.tokens[end].span.end;
        let declaration = self.parse_declaration(start, end);
        let assigned = if declaration.is_none()
            && self.is_ident(start)
            && self.is_assignment_at(start + 1)
        {
            Some(self.text(start).to_string())
        } else {
            None
        };
        LocalStatement {
            span,
            declaration,
            assigned,
        }
    }

    /// True if an assignment operator (`=`, `+=`, `<<=`, ...) starts at `k`.
    fn is_assignment_at(&self, k: usize) -> bool {
        let mut k = k;
        // swizzle or index targets: `name.x = ...`, `name[0] = ...`
        while self.is_punct(k, '.') && self.is_ident(k + 1) {
            k += 2;
        }
        if self.is_punct(k, '[') {
            k = self.skip_group(k, '[', ']');
        }
        let op_len = match self.tokens.get(k).map(|t| t.text(self.src)) {
            Some("+" | "-" | "*" | "/" | "%" | "&" | "|" | "^") => 1,
            Some(shift @ ("<" | ">")) if self.tokens.get(k + 1).map(|t| t.text(self.src)) == Some(shift) => 2,
            _ => 0,
        };
        if op_len > 0 && !self.adjacent(k, k + op_len) {
            return false;
        }
        let eq = k + op_len;
        // `==` is a comparison
        self.is_punct(eq, '=') && !self.is_punct(eq + 1, '=')
    }

    /// True if tokens `from..=to` touch without whitespace between them.
    fn adjacent(&self, from: usize, to: usize) -> bool {
        (from..to).all(|k| {
            match (self.tokens.get(k), self.tokens.get(k + 1)) {
                (Some(a), Some(b)) => a.span.end == b.span.start,
                _ => false,
            }
        })
    }

    /// True if `name` is declared (global, parameter or local) or assigned
    /// anywhere in the program.
    pub fn declares_or_assigns(&self, name: &str) -> bool {
        if self.global(name).is_some() {
            return true;
        }
        self.tokens.iter().enumerate().any(|(k, t)| {
            if !t.is_ident(self.src, name) {
                return false;
            }
            let declared = k > 0
                && self.is_ident(k - 1)
                && !NON_TYPE_KEYWORDS.contains(&self.text(k - 1));
            declared || self.is_assignment_at(k + 1)
        })
    }
}

/// A byte-range replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range: at..at,
            text: text.into(),
        }
    }

    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }
}

/// Applies non-overlapping edits; bytes outside every edit range are kept.
pub(crate) fn apply_edits(src: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.range.start.cmp(&a.range.start).then(b.range.end.cmp(&a.range.end)));
    let mut out = src.to_string();
    for edit in edits {
        out.replace_range(edit.range, &edit.text);
    }
    out
}

/// Removal range for declarator `index` of a multi-declarator list,
/// including one adjacent comma.
pub(crate) fn declarator_removal(decl: &Declaration, index: usize) -> Option<Range<usize>> {
    if decl.declarators.len() < 2 {
        return None;
    }
    Some(if index > 0 {
        decl.declarators[index - 1].span.end..decl.declarators[index].span.end
    } else {
        decl.declarators[0].span.start..decl.declarators[1].span.start
    })
}

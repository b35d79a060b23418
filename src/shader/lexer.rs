//! Span-preserving tokenizer for GLSL ES program text.
//! 保留字节区间的 GLSL ES 词法分析器
//!
//! Every token records the byte range it covers in the original text, so
//! edits computed from the token stream can be spliced back into the source
//! without disturbing anything outside the edited ranges.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Whitespace,
    Comment,
    /// A whole `#...` directive line, including backslash continuations.
    Preprocessor,
    Ident,
    Number,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.span.clone()]
    }

    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_punct(&self, src: &str, c: char) -> bool {
        self.kind == TokenKind::Punct && src[self.span.clone()].starts_with(c)
    }

    pub fn is_ident(&self, src: &str, name: &str) -> bool {
        self.kind == TokenKind::Ident && &src[self.span.clone()] == name
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Splits `src` into tokens covering every byte exactly once.
/// 将源码切分为覆盖所有字节的词法单元
pub(crate) fn tokenize(src: &str) -> Vec<Token> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    // Only whitespace seen since the last newline; `#` starts a directive here.
    let mut at_line_start = true;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];

        let kind = if b.is_ascii_whitespace() {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                if bytes[i] == b'\n' {
                    at_line_start = true;
                }
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Whitespace,
                span: start..i,
            });
            continue;
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            TokenKind::Comment
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            tokens.push(Token {
                kind: TokenKind::Comment,
                span: start..i,
            });
            continue;
        } else if b == b'#' && at_line_start {
            while i < bytes.len() && bytes[i] != b'\n' {
                if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'\n') {
                    i += 2;
                    continue;
                }
                i += 1;
            }
            TokenKind::Preprocessor
        } else if is_ident_start(b) {
            while i < bytes.len() && is_ident_continue(bytes[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if b.is_ascii_digit()
            || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
        {
            i += 1;
            while i < bytes.len() {
                let c = bytes[i];
                let exponent_sign = (c == b'+' || c == b'-')
                    && matches!(bytes[i - 1], b'e' | b'E')
                    && !src[start..i].starts_with("0x");
                if is_ident_continue(c) || c == b'.' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else {
            i += src[i..].chars().next().map_or(1, char::len_utf8);
            TokenKind::Punct
        };

        at_line_start = false;
        tokens.push(Token {
            kind,
            span: start..i,
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .into_iter()
            .filter(Token::is_significant)
            .map(|t| (t.kind, &src[t.span]))
            .collect()
    }

    #[test]
    fn tokens_cover_every_byte() {
        let src = "#version 100\nuniform vec2 a; // tail\n/* block */ void main() { a = 1.5e-3; }";
        let rebuilt: String = tokenize(src).iter().map(|t| t.text(src)).collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn hash_only_starts_directive_at_line_start() {
        let src = "  #define X 1\nfloat y = 2.0;";
        let toks = kinds(src);
        assert_eq!(toks[0], (TokenKind::Preprocessor, "#define X 1"));
        assert_eq!(toks[1], (TokenKind::Ident, "float"));
    }

    #[test]
    fn directive_continuation_is_one_token() {
        let src = "#define A \\\n  1\nint b;";
        let toks = kinds(src);
        assert_eq!(toks[0], (TokenKind::Preprocessor, "#define A \\\n  1"));
        assert_eq!(toks[1], (TokenKind::Ident, "int"));
    }

    #[test]
    fn numbers_with_exponents() {
        let toks = kinds("x=1.0e+2;");
        assert_eq!(toks[2], (TokenKind::Number, "1.0e+2"));
        assert_eq!(toks[3], (TokenKind::Punct, ";"));
    }
}

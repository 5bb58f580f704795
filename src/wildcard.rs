//! Glob-Style Wildcard Patterns
//!
//! Patterns are compiled once into a token list and then matched against
//! many candidate keys (`KEYS`/`SCAN` style filtering).
//!
//! ## Syntax
//!
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from a class
//! - `[^abc]` negates a class (`^` only negates as the first character after `[`)
//! - `\x` matches `x` literally
//!
//! Every other character, including `+ ( ) $ . { } | ^ ]`, matches itself.
//! Matching is anchored at both ends and works on Unicode scalar values;
//! candidates that are not valid UTF-8 are matched with invalid sequences
//! replaced by U+FFFD.

use std::fmt;
use thiserror::Error;

/// The pattern that matches every key.
pub const MATCH_ALL: &str = "*";

/// Errors produced while compiling a pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern ends with a lone `\`
    #[error("pattern ends with escape character")]
    DanglingEscape,

    /// A `[` was never closed
    #[error("unclosed character class starting at offset {0}")]
    UnclosedClass(usize),

    /// A class range whose start is greater than its end, e.g. `[z-a]`
    #[error("invalid character class range {0}-{1}")]
    InvalidRange(char, char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, items: Vec<ClassItem> },
}

impl Token {
    /// Whether this single-character token accepts `c`. `AnyRun` is handled
    /// by the matcher's backtracking and never reaches here.
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::AnyRun => false,
            Token::Class { negated, items } => {
                let hit = items.iter().any(|item| match item {
                    ClassItem::Char(x) => *x == c,
                    ClassItem::Range(lo, hi) => (*lo..=*hi).contains(&c),
                });
                hit != *negated
            }
        }
    }
}

/// A compiled wildcard pattern.
///
/// # Example
///
/// ```
/// use shardkv::wildcard::Pattern;
///
/// let pattern = Pattern::compile("user:*").unwrap();
/// assert!(pattern.matches(b"user:42"));
/// assert!(!pattern.matches(b"session:42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compiles `src` into a reusable matcher.
    pub fn compile(src: &str) -> Result<Self, PatternError> {
        let chars: Vec<char> = src.chars().collect();
        let mut tokens = Vec::with_capacity(chars.len());
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '\\' => {
                    let escaped = chars.get(i + 1).ok_or(PatternError::DanglingEscape)?;
                    tokens.push(Token::Literal(*escaped));
                    i += 2;
                }
                '*' => {
                    // Consecutive stars are equivalent to one
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => {
                    let (token, next) = compile_class(&chars, i)?;
                    tokens.push(token);
                    i = next;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Ok(Self {
            source: src.to_string(),
            tokens,
        })
    }

    /// Returns the source text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the pattern matches every candidate.
    pub fn is_match_all(&self) -> bool {
        self.tokens == [Token::AnyRun]
    }

    /// Matches a whole candidate key.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.matches_str(&String::from_utf8_lossy(candidate))
    }

    /// Matches a whole candidate string.
    pub fn matches_str(&self, text: &str) -> bool {
        let tokens = &self.tokens;
        let mut ti = 0;
        let mut si = 0;
        // Token index after the last `*` and the text offset it currently covers up to
        let mut star: Option<(usize, usize)> = None;

        loop {
            if tokens.get(ti) == Some(&Token::AnyRun) {
                star = Some((ti + 1, si));
                ti += 1;
                continue;
            }

            let next = text[si..].chars().next();
            match (tokens.get(ti), next) {
                (None, None) => return true,
                (Some(token), Some(c)) if token.accepts(c) => {
                    ti += 1;
                    si += c.len_utf8();
                    continue;
                }
                _ => {}
            }

            // Let the last `*` swallow one more character and retry
            let Some((resume_ti, covered)) = star else {
                return false;
            };
            let Some(c) = text[covered..].chars().next() else {
                return false;
            };
            let covered = covered + c.len_utf8();
            star = Some((resume_ti, covered));
            ti = resume_ti;
            si = covered;
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles the class starting at `chars[start] == '['`.
/// Returns the token and the index just past the closing `]`.
fn compile_class(chars: &[char], start: usize) -> Result<(Token, usize), PatternError> {
    let mut i = start + 1;
    let negated = chars.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;

    loop {
        let c = match chars.get(i) {
            None => return Err(PatternError::UnclosedClass(start)),
            // A `]` directly after `[` or `[^` is a literal member
            Some(']') if !first => return Ok((Token::Class { negated, items }, i + 1)),
            Some('\\') => {
                i += 1;
                *chars.get(i).ok_or(PatternError::DanglingEscape)?
            }
            Some(c) => *c,
        };
        i += 1;
        first = false;

        if chars.get(i) == Some(&'-') && chars.get(i + 1).is_some_and(|n| *n != ']') {
            let mut hi = chars[i + 1];
            i += 2;
            if hi == '\\' {
                hi = *chars.get(i).ok_or(PatternError::DanglingEscape)?;
                i += 1;
            }
            if c > hi {
                return Err(PatternError::InvalidRange(c, hi));
            }
            items.push(ClassItem::Range(c, hi));
        } else {
            items.push(ClassItem::Char(c));
        }
    }
}

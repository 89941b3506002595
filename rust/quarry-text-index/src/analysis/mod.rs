//! Token streams consumed by the indexer.
//!
//! The indexer does not analyze text itself: every field of a document carries a
//! [`TokenStream`] that yields [`Token`]s one at a time. Two implementations are
//! provided, [`PreTokenized`] for tokens produced elsewhere and [`WordTokenStream`]
//! which splits text on Unicode word boundaries.

mod word;

use quarry_common::Result;
use quarry_unicode::code_units::to_utf16;

pub use word::WordTokenStream;

/// A single token of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Token {
    /// Term text as UTF-16 code units.
    pub text: Vec<u16>,
    /// Distance to the previous token's position; 0 stacks the token on the
    /// previous position.
    pub position_increment: u32,
    /// Start offset in the field value, in UTF-16 code units.
    pub start_offset: u32,
    /// End offset (exclusive) in the field value, in UTF-16 code units.
    pub end_offset: u32,
    pub payload: Option<Vec<u8>>,
    /// Set by analyzers that protect the token from stemming. The indexer indexes
    /// keyword tokens like any other.
    pub keyword: bool,
}

impl Token {
    pub fn new(text: &str, start_offset: u32, end_offset: u32) -> Token {
        Token {
            text: to_utf16(text),
            position_increment: 1,
            start_offset,
            end_offset,
            payload: None,
            keyword: false,
        }
    }

    pub fn with_position_increment(mut self, increment: u32) -> Token {
        self.position_increment = increment;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Token {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_keyword(mut self, keyword: bool) -> Token {
        self.keyword = keyword;
        self
    }
}

/// A lazily advanced sequence of tokens.
///
/// Errors returned by [`increment_token`](Self::increment_token) fail only the
/// document being indexed.
pub trait TokenStream: Send {
    /// Advances to the next token, returning `false` once the stream is exhausted.
    fn increment_token(&mut self) -> Result<bool>;

    /// The current token. Only meaningful after `increment_token` returned `true`.
    fn token(&self) -> &Token;

    /// Offset just past the end of the field value, valid once the stream is
    /// exhausted. Used to continue offsets across instances of a multi-valued field.
    fn end_offset(&self) -> u32;
}

/// A token stream over tokens that were produced in advance.
#[derive(Debug, Clone, Default)]
pub struct PreTokenized {
    tokens: Vec<Token>,
    next: usize,
    end_offset: Option<u32>,
}

impl PreTokenized {
    pub fn new(tokens: Vec<Token>) -> PreTokenized {
        PreTokenized {
            tokens,
            next: 0,
            end_offset: None,
        }
    }

    /// Tokens with increment 1, offsets laid out as if the terms were separated by
    /// single spaces.
    pub fn from_terms<S: AsRef<str>>(terms: &[S]) -> PreTokenized {
        let mut offset = 0u32;
        let tokens = terms
            .iter()
            .map(|term| {
                let term = term.as_ref();
                let len = term.encode_utf16().count() as u32;
                let token = Token::new(term, offset, offset + len);
                offset += len + 1;
                token
            })
            .collect();
        PreTokenized::new(tokens)
    }

    /// Overrides the end offset reported once the stream is exhausted.
    pub fn with_end_offset(mut self, end_offset: u32) -> PreTokenized {
        self.end_offset = Some(end_offset);
        self
    }
}

impl TokenStream for PreTokenized {
    fn increment_token(&mut self) -> Result<bool> {
        if self.next < self.tokens.len() {
            self.next += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.next.saturating_sub(1)]
    }

    fn end_offset(&self) -> u32 {
        self.end_offset.unwrap_or_else(|| {
            self.tokens
                .iter()
                .map(|token| token.end_offset)
                .max()
                .unwrap_or(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_tokenized_from_terms() {
        let mut stream = PreTokenized::from_terms(&["dog", "cat"]);
        assert!(stream.increment_token().unwrap());
        assert_eq!(stream.token().text, to_utf16("dog"));
        assert_eq!((stream.token().start_offset, stream.token().end_offset), (0, 3));
        assert!(stream.increment_token().unwrap());
        assert_eq!((stream.token().start_offset, stream.token().end_offset), (4, 7));
        assert!(!stream.increment_token().unwrap());
        assert_eq!(stream.end_offset(), 7);
    }

    #[test]
    fn test_end_offset_override() {
        let stream = PreTokenized::from_terms(&["a"]).with_end_offset(10);
        assert_eq!(stream.end_offset(), 10);
        assert_eq!(PreTokenized::default().end_offset(), 0);
    }
}

use quarry_common::Result;
use unicode_segmentation::UnicodeSegmentation;

use super::{Token, TokenStream};

/// Splits a text value into words along Unicode word boundaries.
///
/// A word is a segment between two word boundaries that contains at least one
/// alphanumeric character; punctuation and whitespace segments are dropped.
/// Offsets are reported in UTF-16 code units.
pub struct WordTokenStream {
    text: String,
    /// Byte ranges of the words in `text`.
    words: Vec<(usize, usize)>,
    next: usize,
    lowercase: bool,
    /// Byte position and matching UTF-16 position of the last computed offset.
    cursor: (usize, u32),
    token: Token,
}

impl WordTokenStream {
    pub fn new(text: impl Into<String>) -> WordTokenStream {
        let text = text.into();
        let words = text
            .split_word_bound_indices()
            .filter(|(_, segment)| segment.chars().any(char::is_alphanumeric))
            .map(|(start, segment)| (start, start + segment.len()))
            .collect();
        WordTokenStream {
            text,
            words,
            next: 0,
            lowercase: false,
            cursor: (0, 0),
            token: Token::default(),
        }
    }

    /// Lowercases every word before it is emitted.
    pub fn lowercased(mut self) -> WordTokenStream {
        self.lowercase = true;
        self
    }

    fn utf16_offset(&mut self, byte_pos: usize) -> u32 {
        let (from, units) = self.cursor;
        debug_assert!(byte_pos >= from);
        let delta = self.text[from..byte_pos].encode_utf16().count() as u32;
        self.cursor = (byte_pos, units + delta);
        units + delta
    }
}

impl TokenStream for WordTokenStream {
    fn increment_token(&mut self) -> Result<bool> {
        let Some(&(start, end)) = self.words.get(self.next) else {
            return Ok(false);
        };
        self.next += 1;
        let start_offset = self.utf16_offset(start);
        let end_offset = self.utf16_offset(end);
        let word = &self.text[start..end];
        self.token.text.clear();
        if self.lowercase {
            self.token.text.extend(word.to_lowercase().encode_utf16());
        } else {
            self.token.text.extend(word.encode_utf16());
        }
        self.token.position_increment = 1;
        self.token.start_offset = start_offset;
        self.token.end_offset = end_offset;
        Ok(true)
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn end_offset(&self) -> u32 {
        self.text.encode_utf16().count() as u32
    }
}

#[cfg(test)]
mod tests {
    use quarry_unicode::conversion::utf16_to_string;

    use super::*;

    fn collect(mut stream: WordTokenStream) -> Vec<(String, u32, u32)> {
        let mut tokens = Vec::new();
        while stream.increment_token().unwrap() {
            let token = stream.token();
            tokens.push((
                utf16_to_string(&token.text),
                token.start_offset,
                token.end_offset,
            ));
        }
        tokens
    }

    #[test]
    fn test_words_and_offsets() {
        let tokens = collect(WordTokenStream::new("Typically 3-4 levels deep,"));
        let words = tokens.iter().map(|t| t.0.as_str()).collect::<Vec<_>>();
        assert_eq!(words, ["Typically", "3", "4", "levels", "deep"]);
        assert_eq!((tokens[3].1, tokens[3].2), (14, 20));
    }

    #[test]
    fn test_utf16_offsets_after_astral_chars() {
        let tokens = collect(WordTokenStream::new("\u{1F600} héllo"));
        assert_eq!(tokens, [("héllo".to_string(), 3, 8)]);
    }

    #[test]
    fn test_lowercased() {
        let tokens = collect(WordTokenStream::new("Hello WORLD").lowercased());
        let words = tokens.iter().map(|t| t.0.as_str()).collect::<Vec<_>>();
        assert_eq!(words, ["hello", "world"]);
        assert_eq!(WordTokenStream::new("Hello WORLD").end_offset(), 11);
    }

    #[test]
    fn test_empty_text() {
        assert!(collect(WordTokenStream::new("  ,. ")).is_empty());
    }
}

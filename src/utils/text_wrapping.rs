//! Word wrapping for streamed output.
//!
//! Model output arrives in arbitrary fragments, so a word may be split across
//! chunks. [`StreamWrapper`] holds back the current word until it is complete
//! and only then decides whether it still fits on the current line.

use unicode_width::UnicodeWidthChar;

/// Incremental word wrapper. With no width configured text passes through.
#[derive(Debug, Clone, Default)]
pub struct StreamWrapper {
    width: Option<usize>,
    col: usize,
    word: String,
    word_width: usize,
    spaces: String,
    spaces_width: usize,
}

impl StreamWrapper {
    pub fn new(width: Option<usize>) -> Self {
        Self {
            width: width.filter(|w| *w > 0),
            ..Self::default()
        }
    }

    /// Feed a fragment; returns the text that is ready to be printed.
    pub fn push(&mut self, fragment: &str) -> String {
        let Some(width) = self.width else {
            return fragment.to_string();
        };
        let mut out = String::new();
        for ch in fragment.chars() {
            if ch == '\n' {
                self.flush_word(width, &mut out);
                self.spaces.clear();
                self.spaces_width = 0;
                out.push('\n');
                self.col = 0;
            } else if ch.is_whitespace() {
                self.flush_word(width, &mut out);
                self.spaces.push(ch);
                self.spaces_width += UnicodeWidthChar::width(ch).unwrap_or(0);
            } else {
                self.word.push(ch);
                self.word_width += UnicodeWidthChar::width(ch).unwrap_or(0);
            }
        }
        out
    }

    /// Release everything still held back.
    pub fn finish(&mut self) -> String {
        let Some(width) = self.width else {
            return String::new();
        };
        let mut out = String::new();
        self.flush_word(width, &mut out);
        out.push_str(&self.spaces);
        self.col += self.spaces_width;
        self.spaces.clear();
        self.spaces_width = 0;
        out
    }

    /// Column of the cursor after everything emitted so far.
    pub fn column(&self) -> usize {
        self.col
    }

    fn flush_word(&mut self, width: usize, out: &mut String) {
        if self.word.is_empty() {
            return;
        }
        if self.col > 0 && self.col + self.spaces_width + self.word_width > width {
            out.push('\n');
            self.col = 0;
        } else {
            out.push_str(&self.spaces);
            self.col += self.spaces_width;
        }
        self.spaces.clear();
        self.spaces_width = 0;

        if self.word_width > width {
            for ch in self.word.chars() {
                let w = UnicodeWidthChar::width(ch).unwrap_or(0);
                if self.col > 0 && self.col + w > width {
                    out.push('\n');
                    self.col = 0;
                }
                out.push(ch);
                self.col += w;
            }
        } else {
            out.push_str(&self.word);
            self.col += self.word_width;
        }
        self.word.clear();
        self.word_width = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_chunks(width: usize, chunks: &[&str]) -> String {
        let mut wrapper = StreamWrapper::new(Some(width));
        let mut out: String = chunks.iter().map(|c| wrapper.push(c)).collect();
        out.push_str(&wrapper.finish());
        out
    }

    #[test]
    fn wraps_at_word_boundaries_across_chunks() {
        let expected = "hello\nworld this\nis a test";
        assert_eq!(wrap_chunks(10, &["hello world this is a test"]), expected);
        assert_eq!(
            wrap_chunks(10, &["hel", "lo wor", "ld this is a te", "st"]),
            expected
        );
    }

    #[test]
    fn hard_newlines_reset_the_column() {
        assert_eq!(wrap_chunks(8, &["abc\ndefgh ij"]), "abc\ndefgh ij");
    }

    #[test]
    fn long_words_are_broken() {
        assert_eq!(wrap_chunks(4, &["abcdefghij"]), "abcd\nefgh\nij");
    }

    #[test]
    fn wide_characters_count_double() {
        assert_eq!(wrap_chunks(4, &["你好 世界"]), "你好\n世界");
    }

    #[test]
    fn no_width_passes_text_through() {
        let mut wrapper = StreamWrapper::new(None);
        assert_eq!(wrapper.push("a  b\n"), "a  b\n");
        assert_eq!(wrapper.finish(), "");
    }
}

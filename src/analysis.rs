//! The analysis boundary: tokenisation, stemming, and stop-word removal are
//! explicitly out of scope (see SPEC_FULL.md §1). Fields consume whatever
//! implements `Analyzer`; this module supplies the minimal analyzers needed
//! to exercise and test the rest of the crate.

/// One token produced by an analyzer: its text, its ordinal position, and
/// (for text fields that track it) the byte range it came from in the
/// original string.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub position: u32,
    pub start_char: u32,
    pub end_char: u32,
}

pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<Token>;
}

/// Lowercases and splits on whitespace. The default analyzer for `Text` fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let lower = text.to_lowercase();
        let mut out = Vec::new();
        let mut position = 0u32;
        for (start, word) in split_with_offsets(&lower) {
            out.push(Token {
                text: word.to_string(),
                position,
                start_char: start as u32,
                end_char: (start + word.len()) as u32,
            });
            position += 1;
        }
        out
    }
}

fn split_with_offsets(s: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(st) = start.take() {
                out.push((st, &s[st..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        out.push((st, &s[st..]));
    }
    out
}

/// Treats the whole input as a single atomic token (used by `Id` fields).
#[derive(Debug, Default, Clone, Copy)]
pub struct IdAnalyzer {
    pub lowercase: bool,
}

impl Analyzer for IdAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let text = if self.lowercase { text.to_lowercase() } else { text.to_string() };
        let len = text.len() as u32;
        vec![Token { text, position: 0, start_char: 0, end_char: len }]
    }
}

/// Splits on commas or whitespace, one token per item (used by `Keyword` fields).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordAnalyzer {
    pub lowercase: bool,
}

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let normalized = text.replace(',', " ");
        let normalized = if self.lowercase { normalized.to_lowercase() } else { normalized };
        let mut out = Vec::new();
        for (position, (start, word)) in split_with_offsets(&normalized).into_iter().enumerate() {
            out.push(Token {
                text: word.to_string(),
                position: position as u32,
                start_char: start as u32,
                end_char: (start + word.len()) as u32,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_analyzer_lowercases_and_splits() {
        let toks = WhitespaceAnalyzer.analyze("Mary had a Little Lamb");
        let words: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["mary", "had", "a", "little", "lamb"]);
        assert_eq!(toks[0].position, 0);
        assert_eq!(toks[4].position, 4);
    }

    #[test]
    fn id_analyzer_is_atomic() {
        let toks = IdAnalyzer { lowercase: true }.analyze("Snow White");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text, "snow white");
    }

    #[test]
    fn keyword_analyzer_splits_on_commas_and_spaces() {
        let toks = KeywordAnalyzer { lowercase: true }.analyze("red, Green blue");
        let words: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["red", "green", "blue"]);
    }
}

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// One run of text produced by [`Highlighter::segments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub value: &'a str,
    pub is_match: bool,
}

impl<'a> Segment<'a> {
    fn plain(value: &'a str) -> Self {
        Self {
            value,
            is_match: false,
        }
    }

    fn matched(value: &'a str) -> Self {
        Self {
            value,
            is_match: true,
        }
    }
}

/// Case-insensitive literal matcher shared by the text panel, the overlay
/// fragment labels and the render surface's glyph runs.
///
/// The term is compiled once; an empty term produces a highlighter that never
/// matches and returns its input untouched.
#[derive(Debug, Clone, Default)]
pub struct Highlighter {
    term: String,
    pattern: Option<Regex>,
}

impl Highlighter {
    pub fn new(term: &str) -> Self {
        if term.is_empty() {
            return Self::default();
        }
        let escaped = regex::escape(term);
        let pattern = match RegexBuilder::new(&escaped).case_insensitive(true).build() {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                // Only reachable when the escaped term exceeds the regex size limit.
                warn!(?err, term_len = term.len(), "search term could not be compiled");
                None
            }
        };
        Self {
            term: term.to_owned(),
            pattern,
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    /// Splits `text` into alternating non-match and match runs. Concatenating
    /// the values always reproduces `text` byte for byte.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let Some(pattern) = &self.pattern else {
            return vec![Segment::plain(text)];
        };

        let mut segments = Vec::new();
        let mut cursor = 0;
        for found in pattern.find_iter(text) {
            if found.start() > cursor {
                segments.push(Segment::plain(&text[cursor..found.start()]));
            }
            segments.push(Segment::matched(found.as_str()));
            cursor = found.end();
        }
        if cursor < text.len() || segments.is_empty() {
            segments.push(Segment::plain(&text[cursor..]));
        }
        segments
    }

    pub fn has_match(&self, text: &str) -> bool {
        self.pattern
            .as_ref()
            .map(|pattern| pattern.is_match(text))
            .unwrap_or(false)
    }

    pub fn match_count(&self, text: &str) -> usize {
        self.pattern
            .as_ref()
            .map(|pattern| pattern.find_iter(text).count())
            .unwrap_or(0)
    }
}

/// One-shot form of [`Highlighter::segments`].
pub fn highlight<'a>(text: &'a str, term: &str) -> Vec<Segment<'a>> {
    Highlighter::new(term).segments(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(segments: &[Segment<'_>]) -> String {
        segments.iter().map(|segment| segment.value).collect()
    }

    #[test]
    fn empty_term_is_identity() {
        for text in ["", "hello", "A.b*C\nline two"] {
            assert_eq!(highlight(text, ""), vec![Segment::plain(text)]);
        }
    }

    #[test]
    fn matching_is_case_insensitive_and_finds_every_occurrence() {
        let segments = highlight("AAA bbb AAA", "aaa");
        assert_eq!(
            segments,
            vec![
                Segment::matched("AAA"),
                Segment::plain(" bbb "),
                Segment::matched("AAA"),
            ]
        );
    }

    #[test]
    fn metacharacters_are_matched_literally() {
        let segments = highlight("a.b", ".");
        assert_eq!(
            segments,
            vec![
                Segment::plain("a"),
                Segment::matched("."),
                Segment::plain("b"),
            ]
        );

        let segments = highlight("xa.b*cx aXb", "a.b*c");
        assert_eq!(segments.iter().filter(|s| s.is_match).count(), 1);
        assert_eq!(joined(&segments), "xa.b*cx aXb");
    }

    #[test]
    fn matches_do_not_overlap() {
        let segments = highlight("aaaa", "aa");
        assert_eq!(
            segments,
            vec![Segment::matched("aa"), Segment::matched("aa")]
        );
        assert_eq!(highlight("aaa", "aa").len(), 2);
    }

    #[test]
    fn partition_is_lossless() {
        let cases = [
            ("", "x"),
            ("no hits here", "zzz"),
            ("Straße STRASSE straße", "straße"),
            ("(x)[y]{z} $^|\\", "(x)"),
            ("tail match", "match"),
            ("ünïcödé ÜNÏ", "ünï"),
        ];
        for (text, term) in cases {
            assert_eq!(joined(&highlight(text, term)), text, "term {term:?}");
        }
    }

    #[test]
    fn counts_and_probes_share_the_same_matcher() {
        let highlighter = Highlighter::new("Page");
        assert!(highlighter.is_active());
        assert_eq!(highlighter.match_count("page PAGE pAgE"), 3);
        assert!(highlighter.has_match("front page"));
        assert!(!Highlighter::new("").has_match("anything"));
        assert_eq!(Highlighter::new("").match_count("anything"), 0);
    }
}

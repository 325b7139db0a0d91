use crate::highlight::Highlighter;

/// Active search term plus the selected match on the current page.
///
/// `match_index` of `None` means no match is selected.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    highlighter: Highlighter,
    match_index: Option<usize>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(&self) -> &str {
        self.highlighter.term()
    }

    pub fn highlighter(&self) -> &Highlighter {
        &self.highlighter
    }

    pub fn match_index(&self) -> Option<usize> {
        self.match_index
    }

    /// Replaces the term and drops the match selection. Returns `false` when
    /// the term did not change.
    pub fn set_term(&mut self, term: &str) -> bool {
        if term == self.term() {
            return false;
        }
        self.highlighter = Highlighter::new(term);
        self.match_index = None;
        true
    }

    pub fn reset_match(&mut self) {
        self.match_index = None;
    }

    /// Advances to the next match out of `total`, wrapping at the end.
    pub fn next_match(&mut self, total: usize) -> Option<usize> {
        self.match_index = match (total, self.match_index) {
            (0, _) => None,
            (_, None) => Some(0),
            (total, Some(index)) => Some((index + 1) % total),
        };
        self.match_index
    }

    pub fn prev_match(&mut self, total: usize) -> Option<usize> {
        self.match_index = match (total, self.match_index) {
            (0, _) => None,
            (total, None) => Some(total - 1),
            (total, Some(0)) => Some(total - 1),
            (total, Some(index)) => Some(index.min(total) - 1),
        };
        self.match_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_term_resets_selection() {
        let mut search = SearchState::new();
        assert!(search.set_term("pdf"));
        assert_eq!(search.next_match(3), Some(0));
        assert!(!search.set_term("pdf"));
        assert_eq!(search.match_index(), Some(0));
        assert!(search.set_term("rust"));
        assert_eq!(search.match_index(), None);
        assert_eq!(search.term(), "rust");
    }

    #[test]
    fn match_navigation_wraps() {
        let mut search = SearchState::new();
        search.set_term("a");
        assert_eq!(search.prev_match(3), Some(2));
        assert_eq!(search.next_match(3), Some(0));
        assert_eq!(search.next_match(3), Some(1));
        assert_eq!(search.prev_match(3), Some(0));
        assert_eq!(search.prev_match(3), Some(2));
        assert_eq!(search.next_match(0), None);
    }
}

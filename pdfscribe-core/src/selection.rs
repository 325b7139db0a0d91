use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::search::SearchState;
use crate::DocumentId;

/// Identity of one rendering of the extracted-text panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelId {
    pub document: DocumentId,
    pub page: u32,
}

#[derive(Debug, Default)]
struct Slot {
    active: Option<(PanelId, u64)>,
    generation: u64,
}

/// Routes selection-end events from the text panel into the search term.
///
/// At most one panel is subscribed at a time. Events from a panel whose
/// subscription was dropped or replaced are ignored.
#[derive(Debug, Clone, Default)]
pub struct SelectionBridge {
    slot: Arc<Mutex<Slot>>,
}

/// Keeps a panel subscribed until dropped.
#[must_use = "the panel is unsubscribed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SelectionSubscription {
    panel: PanelId,
    generation: u64,
    slot: Arc<Mutex<Slot>>,
}

impl SelectionSubscription {
    pub fn panel(&self) -> PanelId {
        self.panel
    }
}

impl Drop for SelectionSubscription {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.active == Some((self.panel, self.generation)) {
            slot.active = None;
            debug!(page = self.panel.page, "selection listener released");
        }
    }
}

impl SelectionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `panel`, replacing any previous subscription.
    pub fn subscribe(&self, panel: PanelId) -> SelectionSubscription {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        let generation = slot.generation;
        slot.active = Some((panel, generation));
        debug!(page = panel.page, "selection listener attached");
        SelectionSubscription {
            panel,
            generation,
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn active_panel(&self) -> Option<PanelId> {
        self.slot.lock().active.map(|(panel, _)| panel)
    }

    /// Handles the end of a selection gesture. Line breaks inside the
    /// selection collapse to single spaces so the term can match within one
    /// line. Whitespace-only or empty selections leave the current term
    /// alone. Returns `true` when the term changed.
    pub fn on_selection_end(&self, panel: PanelId, selected: &str, search: &mut SearchState) -> bool {
        if self.active_panel() != Some(panel) {
            debug!(page = panel.page, "selection from unsubscribed panel ignored");
            return false;
        }
        let term = join_lines(selected);
        if term.is_empty() {
            return false;
        }
        search.set_term(&term)
    }
}

fn join_lines(selected: &str) -> String {
    selected
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_id_for_url;

    fn panel(page: u32) -> PanelId {
        PanelId {
            document: document_id_for_url("http://example.com/a.pdf"),
            page,
        }
    }

    #[test]
    fn selection_becomes_trimmed_term() {
        let bridge = SelectionBridge::new();
        let _guard = bridge.subscribe(panel(1));
        let mut search = SearchState::new();
        assert!(bridge.on_selection_end(panel(1), "  Quarterly report \n", &mut search));
        assert_eq!(search.term(), "Quarterly report");
    }

    #[test]
    fn multi_line_selection_joins_into_one_line() {
        let bridge = SelectionBridge::new();
        let _guard = bridge.subscribe(panel(1));
        let mut search = SearchState::new();
        assert!(bridge.on_selection_end(panel(1), "net\n  revenue\r\n\n", &mut search));
        assert_eq!(search.term(), "net revenue");
        assert!(!search.term().contains('\n'));
    }

    #[test]
    fn empty_selection_keeps_existing_term() {
        let bridge = SelectionBridge::new();
        let _guard = bridge.subscribe(panel(1));
        let mut search = SearchState::new();
        search.set_term("keep");
        assert!(!bridge.on_selection_end(panel(1), "", &mut search));
        assert!(!bridge.on_selection_end(panel(1), " \t ", &mut search));
        assert_eq!(search.term(), "keep");
    }

    #[test]
    fn dropped_or_replaced_subscriptions_stop_listening() {
        let bridge = SelectionBridge::new();
        let mut search = SearchState::new();

        let first = bridge.subscribe(panel(1));
        let second = bridge.subscribe(panel(2));
        drop(first);
        assert_eq!(bridge.active_panel(), Some(panel(2)));
        assert!(!bridge.on_selection_end(panel(1), "stale", &mut search));

        drop(second);
        assert_eq!(bridge.active_panel(), None);
        assert!(!bridge.on_selection_end(panel(2), "late", &mut search));
        assert_eq!(search.term(), "");
    }

    #[test]
    fn resubscribing_same_panel_survives_old_guard() {
        let bridge = SelectionBridge::new();
        let old = bridge.subscribe(panel(3));
        let _new = bridge.subscribe(panel(3));
        drop(old);
        assert_eq!(bridge.active_panel(), Some(panel(3)));
    }
}

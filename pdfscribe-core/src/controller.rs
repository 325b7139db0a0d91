use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::service::{
    ExtractedDocument, ExtractionRequest, FetchCompletion, FetchError, FetchScope, FetchTicket,
    RequestSeq,
};
use crate::{document_id_for_url, DocumentId, PageRecord};

/// Message shown when the first load of a document fails.
pub const DOCUMENT_ERROR_MESSAGE: &str = "Error while fetching PDF";

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    Idle,
    Loading,
    Loaded { total_pages: u32 },
    Error { message: String },
}

/// Fetch state of the page currently on screen, independent of the document.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStatus {
    Idle,
    Loading { page: u32 },
    Loaded,
    Error { page: u32, error: FetchError },
}

/// Why a page request was refused. Refusals leave every piece of state as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageRejection {
    #[error("{0:?} is not a page number")]
    NotANumber(String),
    #[error("page {requested} outside 1..={total}")]
    OutOfRange { requested: i64, total: u32 },
    #[error("document is not loaded yet")]
    NotLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub url: String,
    pub id: DocumentId,
}

/// Owns page navigation and the per-page cache for one document.
///
/// The controller never performs I/O: operations hand back a [`FetchTicket`]
/// for the caller to run, and results come back through [`Controller::complete`].
/// Each ticket carries a fresh [`RequestSeq`]; only the most recent document
/// request and the most recent page request are allowed to mutate state.
#[derive(Debug)]
pub struct Controller {
    document: Option<DocumentRef>,
    status: DocumentStatus,
    page_status: PageStatus,
    current_page: u32,
    pages: HashMap<u32, PageRecord>,
    displayed_page: Option<u32>,
    next_seq: u64,
    pending_document: Option<RequestSeq>,
    pending_page: Option<(RequestSeq, u32)>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            document: None,
            status: DocumentStatus::Idle,
            page_status: PageStatus::Idle,
            current_page: 1,
            pages: HashMap::new(),
            displayed_page: None,
            next_seq: 0,
            pending_document: None,
            pending_page: None,
        }
    }

    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn status(&self) -> &DocumentStatus {
        &self.status
    }

    pub fn page_status(&self) -> &PageStatus {
        &self.page_status
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> Option<u32> {
        match self.status {
            DocumentStatus::Loaded { total_pages } => Some(total_pages),
            _ => None,
        }
    }

    pub fn record(&self, page: u32) -> Option<&PageRecord> {
        self.pages.get(&page)
    }

    /// The record both text surfaces are drawn from.
    pub fn current_record(&self) -> Option<&PageRecord> {
        self.pages.get(&self.current_page)
    }

    /// The record on screen. While the current page is loading or failed,
    /// this is the last page that was shown for the document.
    pub fn displayed_record(&self) -> Option<&PageRecord> {
        if let Some(record) = self.current_record() {
            return Some(record);
        }
        match self.page_status {
            PageStatus::Loading { .. } | PageStatus::Error { .. } => {
                self.displayed_page.and_then(|page| self.pages.get(&page))
            }
            PageStatus::Idle | PageStatus::Loaded => None,
        }
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Drops everything known about the previous document and requests page 1
    /// of the new one. A blank reference returns the controller to `Idle`.
    #[instrument(skip(self))]
    pub fn set_document(&mut self, url: &str) -> Option<FetchTicket> {
        self.pages.clear();
        self.displayed_page = None;
        self.current_page = 1;
        self.page_status = PageStatus::Idle;
        self.pending_page = None;
        self.pending_document = None;

        let url = url.trim();
        if url.is_empty() {
            warn!("ignoring empty document reference");
            self.document = None;
            self.status = DocumentStatus::Idle;
            return None;
        }

        self.document = Some(DocumentRef {
            url: url.to_owned(),
            id: document_id_for_url(url),
        });
        self.status = DocumentStatus::Loading;
        let seq = self.bump();
        self.pending_document = Some(seq);
        info!(seq = seq.0, "loading document");
        Some(FetchTicket {
            seq,
            scope: FetchScope::Document,
            request: ExtractionRequest {
                pdf_url: url.to_owned(),
                page: Some(1),
            },
        })
    }

    /// Moves to page `page`. Cached pages switch immediately; others enter a
    /// page-local loading state while the rest of the document stays visible.
    pub fn set_current_page(&mut self, page: i64) -> Result<Option<FetchTicket>, PageRejection> {
        let total = self.total_pages().ok_or(PageRejection::NotLoaded)?;
        if page < 1 || page > i64::from(total) {
            return Err(PageRejection::OutOfRange {
                requested: page,
                total,
            });
        }
        let page = page as u32;

        if self.pages.contains_key(&page) {
            self.current_page = page;
            self.displayed_page = Some(page);
            self.pending_page = None;
            self.page_status = PageStatus::Loaded;
            return Ok(None);
        }

        if self.pending_page.map(|(_, pending)| pending) == Some(page) {
            self.current_page = page;
            return Ok(None);
        }

        Ok(Some(self.request_page(page)))
    }

    /// Parses raw user input before delegating to [`Controller::set_current_page`].
    pub fn set_current_page_input(
        &mut self,
        input: &str,
    ) -> Result<Option<FetchTicket>, PageRejection> {
        let page = input
            .trim()
            .parse::<i64>()
            .map_err(|_| PageRejection::NotANumber(input.to_owned()))?;
        self.set_current_page(page)
    }

    pub fn next_page(&mut self, count: u32) -> Result<Option<FetchTicket>, PageRejection> {
        let total = self.total_pages().ok_or(PageRejection::NotLoaded)?;
        let target = self.current_page.saturating_add(count.max(1)).min(total);
        self.set_current_page(i64::from(target))
    }

    pub fn prev_page(&mut self, count: u32) -> Result<Option<FetchTicket>, PageRejection> {
        let target = self.current_page.saturating_sub(count.max(1)).max(1);
        self.set_current_page(i64::from(target))
    }

    /// Reissues whatever failed last: the whole document from `Error`, or the
    /// current page after a page-local failure.
    pub fn retry(&mut self) -> Option<FetchTicket> {
        if matches!(self.status, DocumentStatus::Error { .. }) {
            let url = self.document.as_ref()?.url.clone();
            return self.set_document(&url);
        }
        match self.page_status {
            PageStatus::Error { page, .. } if page == self.current_page => {
                Some(self.request_page(page))
            }
            _ => None,
        }
    }

    /// Applies a finished fetch. Completions from superseded requests are
    /// dropped without touching state.
    #[instrument(skip(self, completion), fields(seq = completion.ticket.seq.0))]
    pub fn complete(&mut self, completion: FetchCompletion) -> CompletionOutcome {
        let FetchCompletion { ticket, result } = completion;
        match ticket.scope {
            FetchScope::Document => {
                if self.pending_document != Some(ticket.seq) {
                    debug!("dropping stale document response");
                    return CompletionOutcome::Stale;
                }
                self.pending_document = None;
                match result {
                    Ok(document) => {
                        let total_pages = document.total_pages;
                        self.store(document, &ticket.request);
                        self.current_page = 1;
                        self.displayed_page = Some(1);
                        self.status = DocumentStatus::Loaded { total_pages };
                        self.page_status = PageStatus::Loaded;
                        info!(total_pages, "document loaded");
                    }
                    Err(err) => {
                        warn!(%err, "document load failed");
                        self.status = DocumentStatus::Error {
                            message: DOCUMENT_ERROR_MESSAGE.to_owned(),
                        };
                        self.page_status = PageStatus::Idle;
                    }
                }
            }
            FetchScope::Page(page) => {
                if self.pending_page != Some((ticket.seq, page)) {
                    debug!(page, "dropping stale page response");
                    return CompletionOutcome::Stale;
                }
                self.pending_page = None;
                match result {
                    Ok(document) => {
                        if self.total_pages() != Some(document.total_pages) {
                            debug!(
                                reported = document.total_pages,
                                "page response disagrees on page count"
                            );
                        }
                        self.store(document, &ticket.request);
                        self.displayed_page = Some(page);
                        self.page_status = PageStatus::Loaded;
                    }
                    Err(error) => {
                        warn!(page, %error, "page fetch failed");
                        self.page_status = PageStatus::Error { page, error };
                    }
                }
            }
        }
        CompletionOutcome::Applied
    }

    fn request_page(&mut self, page: u32) -> FetchTicket {
        let seq = self.bump();
        self.current_page = page;
        self.pending_page = Some((seq, page));
        self.page_status = PageStatus::Loading { page };
        debug!(page, seq = seq.0, "requesting page");
        FetchTicket {
            seq,
            scope: FetchScope::Page(page),
            request: ExtractionRequest {
                pdf_url: self
                    .document
                    .as_ref()
                    .map(|doc| doc.url.clone())
                    .unwrap_or_default(),
                page: Some(page),
            },
        }
    }

    fn store(&mut self, document: ExtractedDocument, request: &ExtractionRequest) {
        let single = document.pages.len() == 1;
        for (page, content) in document.pages {
            let page_scoped = single && request.page == Some(page);
            self.pages.insert(
                page,
                PageRecord {
                    page,
                    content,
                    file_url: document.file_url.clone(),
                    page_scoped,
                },
            );
        }
    }

    fn bump(&mut self) -> RequestSeq {
        self.next_seq += 1;
        RequestSeq(self.next_seq)
    }
}

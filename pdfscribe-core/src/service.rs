use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::geometry::BBox;
use crate::{PageContent, TextFragment};

pub const EXTRACT_PATH: &str = "/extract_text_from_pdf";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("extraction service responded with status {status}")]
    BadResponse { status: u16 },
    #[error("malformed extraction payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionRequest {
    pub pdf_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Decoded service response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub total_pages: u32,
    pub file_url: String,
    pub pages: BTreeMap<u32, PageContent>,
}

#[derive(Deserialize)]
struct RawResponse {
    extracted_text: BTreeMap<String, RawPage>,
    total_pages: u32,
    file_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPage {
    Plain(String),
    Fragments(Vec<RawFragment>),
}

#[derive(Deserialize)]
struct RawFragment {
    text: String,
    bbox: RawBBox,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBBox {
    Corners(Vec<f32>),
    Named { x0: f32, y0: f32, x1: f32, y1: f32 },
}

impl RawBBox {
    fn into_bbox(self) -> Result<BBox, FetchError> {
        match self {
            RawBBox::Corners(values) => match values.as_slice() {
                [x0, y0, x1, y1] => Ok(BBox::new(*x0, *y0, *x1, *y1)),
                other => Err(FetchError::MalformedPayload(format!(
                    "bbox must have 4 coordinates, got {}",
                    other.len()
                ))),
            },
            RawBBox::Named { x0, y0, x1, y1 } => Ok(BBox::new(x0, y0, x1, y1)),
        }
    }
}

/// Turns a raw HTTP status and body into a decoded document.
///
/// The requested page must be present in `extracted_text`; any other pages the
/// service chose to include are decoded as well.
pub fn decode_response(
    status: u16,
    body: &[u8],
    requested_page: Option<u32>,
) -> Result<ExtractedDocument, FetchError> {
    if !(200..300).contains(&status) {
        return Err(FetchError::BadResponse { status });
    }

    let raw: RawResponse = serde_json::from_slice(body)
        .map_err(|err| FetchError::MalformedPayload(err.to_string()))?;

    if raw.total_pages == 0 {
        return Err(FetchError::MalformedPayload(
            "total_pages must be positive".into(),
        ));
    }

    let mut pages = BTreeMap::new();
    for (key, page) in raw.extracted_text {
        let number: u32 = key
            .trim()
            .parse()
            .map_err(|_| FetchError::MalformedPayload(format!("page key {key:?} is not a number")))?;
        if number == 0 || number > raw.total_pages {
            return Err(FetchError::MalformedPayload(format!(
                "page {number} outside 1..={}",
                raw.total_pages
            )));
        }
        let content = match page {
            RawPage::Plain(text) => PageContent::Plain(text),
            RawPage::Fragments(fragments) => PageContent::Geometric(
                fragments
                    .into_iter()
                    .map(|fragment| {
                        Ok(TextFragment {
                            text: fragment.text,
                            bbox: fragment.bbox.into_bbox()?,
                        })
                    })
                    .collect::<Result<Vec<_>, FetchError>>()?,
            ),
        };
        pages.insert(number, content);
    }

    if let Some(page) = requested_page {
        if !pages.contains_key(&page) {
            return Err(FetchError::MalformedPayload(format!(
                "requested page {page} missing from response"
            )));
        }
    } else if pages.is_empty() {
        return Err(FetchError::MalformedPayload("no pages in response".into()));
    }

    Ok(ExtractedDocument {
        total_pages: raw.total_pages,
        file_url: raw.file_url,
        pages,
    })
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedDocument, FetchError>;

    /// Downloads the rendered file the service published for a page.
    async fn fetch_file(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub struct HttpExtractionService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExtractionService {
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", service_url.trim_end_matches('/'), EXTRACT_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn network_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Network("request timed out".into())
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedDocument, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(network_error)?;
        debug!(status, bytes = body.len(), "extraction response received");
        decode_response(status, &body, request.page)
    }

    #[instrument(skip(self))]
    async fn fetch_file(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadResponse {
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(network_error)
    }
}

/// Monotonic request token. Later requests compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestSeq(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    Document,
    Page(u32),
}

/// A fetch the controller wants executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: RequestSeq,
    pub scope: FetchScope,
    pub request: ExtractionRequest,
}

#[derive(Debug, Clone)]
pub struct FetchCompletion {
    pub ticket: FetchTicket,
    pub result: Result<ExtractedDocument, FetchError>,
}

#[derive(Debug)]
pub enum DriverEvent {
    Extraction(FetchCompletion),
    File {
        url: String,
        result: Result<Bytes, FetchError>,
    },
}

/// Runs tickets on the tokio runtime and posts their completions back to the
/// event loop. In-flight work is never cancelled.
#[derive(Clone)]
pub struct FetchDriver {
    service: Arc<dyn ExtractionService>,
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl FetchDriver {
    pub fn new(service: Arc<dyn ExtractionService>) -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self { service, events }, receiver)
    }

    pub fn dispatch(&self, ticket: FetchTicket) {
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        debug!(seq = ticket.seq.0, scope = ?ticket.scope, "dispatching extraction");
        tokio::spawn(async move {
            let result = service.extract(&ticket.request).await;
            if events
                .send(DriverEvent::Extraction(FetchCompletion { ticket, result }))
                .is_err()
            {
                warn!("event loop gone before extraction completed");
            }
        });
    }

    pub fn fetch_file(&self, url: String) {
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = service.fetch_file(&url).await;
            if events.send(DriverEvent::File { url, result }).is_err() {
                warn!("event loop gone before file download completed");
            }
        });
    }
}

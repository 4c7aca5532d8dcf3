//! arXiv Atom query API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{PaperEntry, SearchApi, SearchError, SearchQuery};

/// Public arXiv query endpoint.
pub const DEFAULT_API_URL: &str = "http://export.arxiv.org/api/query";

/// arXiv search client.
///
/// Requests are spaced at least `request_delay` apart, as the API terms ask,
/// and transport failures are retried before surfacing.
pub struct ArxivClient {
    client: Client,
    api_url: String,
    request_delay: Duration,
    retries: u32,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new(
        api_url: &str,
        user_agent: &str,
        request_delay: Duration,
        retries: u32,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            request_delay,
            retries,
            last_request: Mutex::new(None),
        })
    }

    /// Wait until the polite delay since the previous request has passed.
    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.request_delay).await;
        }
        *last = Some(Instant::now());
    }

    async fn request(&self, query: &SearchQuery) -> Result<String, SearchError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("search_query", query.expression()),
                ("start", query.start.to_string()),
                ("max_results", query.max_results.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SearchApi for ArxivClient {
    async fn fetch_page(&self, query: &SearchQuery) -> Result<Vec<PaperEntry>, SearchError> {
        let mut attempt = 0;
        loop {
            self.wait_turn().await;
            match self.request(query).await {
                Ok(body) => {
                    let entries = parse_feed(&body)?;
                    debug!(
                        category = %query.category,
                        start = query.start,
                        count = entries.len(),
                        "Fetched page"
                    );
                    return Ok(entries);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        category = %query.category,
                        start = query.start,
                        attempt,
                        error = %e,
                        "Page request failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Entry element whose text is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    JournalRef,
    Doi,
    Comment,
}

impl Field {
    fn from_local_name(name: &[u8], in_author: bool) -> Option<Self> {
        Some(match name {
            b"id" => Self::Id,
            b"title" => Self::Title,
            b"summary" => Self::Summary,
            b"published" => Self::Published,
            b"updated" => Self::Updated,
            b"name" if in_author => Self::AuthorName,
            b"journal_ref" => Self::JournalRef,
            b"doi" => Self::Doi,
            b"comment" => Self::Comment,
            _ => return None,
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl PaperEntry {
    fn set(&mut self, field: Field, text: &str) {
        let text = collapse_whitespace(text);
        match field {
            Field::Id => self.entry_id = text,
            Field::Title => self.title = text,
            Field::Summary => self.summary = text,
            Field::Published => self.published = DateTime::parse_from_rfc3339(&text).ok(),
            Field::Updated => self.updated = DateTime::parse_from_rfc3339(&text).ok(),
            Field::AuthorName => {
                if !text.is_empty() {
                    self.authors.push(text);
                }
            }
            Field::JournalRef => self.journal_ref = non_empty(text),
            Field::Doi => self.doi = non_empty(text),
            Field::Comment => self.comment = non_empty(text),
        }
    }
}

/// Parse an arXiv Atom feed into entries.
///
/// The API reports query errors as a single entry whose id points at its
/// error documentation; that is returned as [`SearchError::Api`].
pub fn parse_feed(xml: &str) -> Result<Vec<PaperEntry>, SearchError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<PaperEntry> = None;
    let mut in_author = false;
    let mut capture: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => current = Some(PaperEntry::default()),
                b"author" if current.is_some() => in_author = true,
                name if current.is_some() => {
                    if let Some(field) = Field::from_local_name(name, in_author) {
                        capture = Some(field);
                        text.clear();
                    } else {
                        record_category(current.as_mut(), name, e);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                record_category(current.as_mut(), e.local_name().as_ref(), e);
            }
            Ok(Event::Text(ref e)) => {
                if capture.is_some() {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| SearchError::Feed(err.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(ref e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        if entry.entry_id.contains("/api/errors") {
                            return Err(SearchError::Api(entry.summary));
                        }
                        if !entry.entry_id.is_empty() {
                            entries.push(entry);
                        }
                    }
                    in_author = false;
                    capture = None;
                }
                b"author" => in_author = false,
                _ => {
                    if let (Some(field), Some(entry)) = (capture.take(), current.as_mut()) {
                        entry.set(field, &text);
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SearchError::Feed(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Record `category` / `primary_category` terms on the open entry.
fn record_category(
    entry: Option<&mut PaperEntry>,
    name: &[u8],
    element: &quick_xml::events::BytesStart<'_>,
) {
    let Some(entry) = entry else {
        return;
    };
    if name != b"category" && name != b"primary_category" {
        return;
    }
    let term = element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == b"term")
        .and_then(|attr| attr.unescape_value().ok())
        .map(|v| v.into_owned());
    let Some(term) = term else {
        return;
    };
    if name == b"primary_category" {
        entry.primary_category = Some(term);
    } else if !entry.categories.contains(&term) {
        entry.categories.push(term);
    }
}

//! HubSpot implementation of the CRM gateway.
//!
//! Lists come from the v3 list search, memberships from the paginated v3
//! memberships endpoint, and record details from the object batch-read
//! endpoints in groups of at most `batch_size` ids. Consecutive pages and
//! batches are separated by `page_delay` to stay under the API rate limit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use url::Url;

use exposecast_shared::{
    CompanyRecord, ContactRecord, CrmConfig, ExposecastError, ListDescriptor, RecordBase, Result,
    resolve_secret,
};

use crate::CrmGateway;

/// User-Agent string for CRM requests.
const USER_AGENT: &str = concat!("exposecast/", env!("CARGO_PKG_VERSION"));

const LIST_PAGE_SIZE: u64 = 250;
const MEMBERSHIP_PAGE_SIZE: &str = "250";

/// Properties requested for every object type.
const BASE_PROPERTIES: &[&str] = &["hs_object_id", "createdate", "lastmodifieddate", "lifecyclestage"];
const CONTACT_PROPERTIES: &[&str] = &["email", "firstname", "lastname"];
const COMPANY_PROPERTIES: &[&str] = &["name"];

/// Base delay for 429 backoff when the server sends no `Retry-After`.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a server-requested `Retry-After` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListSearchResponse {
    #[serde(default)]
    lists: Vec<RawList>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
    #[serde(default)]
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct RawList {
    #[serde(default)]
    name: String,
    #[serde(rename = "listId")]
    list_id: Value,
}

#[derive(Debug, Deserialize)]
struct MembershipPage {
    #[serde(default)]
    results: Vec<Membership>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    #[serde(rename = "recordId")]
    record_id: Value,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchReadResponse {
    #[serde(default)]
    results: Vec<BatchRecord>,
}

#[derive(Debug, Deserialize)]
struct BatchRecord {
    #[serde(default)]
    properties: HashMap<String, Value>,
}

type Properties = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HubSpot CRM client authenticated with a private-app access token.
pub struct HubSpotClient {
    client: Client,
    base_url: Url,
    access_token: String,
    batch_size: usize,
    page_delay: Duration,
    max_retries: u32,
    retry_delay: Duration,
    max_retry_after: Duration,
}

impl HubSpotClient {
    /// Create a client from config, reading the token from its env var.
    pub fn from_config(config: &CrmConfig) -> Result<Self> {
        let token = resolve_secret(&config.access_token_env)?;
        Self::new(config, token)
    }

    /// Create a client with an explicit access token.
    pub fn new(config: &CrmConfig, access_token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ExposecastError::config(format!("invalid CRM base_url '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ExposecastError::config(format!(
                "CRM base_url '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExposecastError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            batch_size: config.batch_size.clamp(1, 100),
            page_delay: config.page_delay(),
            max_retries: config.max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_after: MAX_RETRY_AFTER,
        })
    }

    /// Override the base backoff delay used after a 429 without `Retry-After`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Override the cap on waits requested through `Retry-After`.
    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = cap;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request, backing off and retrying while the API answers 429.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let response = build()
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| ExposecastError::Crm(format!("request failed: {e}")))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= self.max_retries {
                return Ok(response);
            }

            let wait = retry_after(&response)
                .map(|wait| wait.min(self.max_retry_after))
                .unwrap_or_else(|| self.retry_delay * 2u32.saturating_pow(attempt));
            warn!(attempt, wait_ms = wait.as_millis() as u64, "CRM rate limit hit, backing off");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    /// Read `properties` of every record in `ids`, one paced request per batch.
    async fn batch_read(
        &self,
        object: &str,
        ids: &[String],
        properties: &[&str],
    ) -> Result<Vec<Properties>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&["crm", "v3", "objects", object, "batch", "read"]);
        let properties: Vec<&str> = BASE_PROPERTIES.iter().chain(properties).copied().collect();
        let mut records = Vec::with_capacity(ids.len());

        for (index, batch) in ids.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.page_delay).await;
            }

            let inputs: Vec<Value> = batch.iter().map(|id| json!({ "id": id })).collect();
            let body = json!({ "properties": properties, "inputs": inputs });
            let response = self.send(|| self.client.post(url.clone()).json(&body)).await?;

            // Ids belonging to another object type are reported as not found.
            if response.status() == StatusCode::NOT_FOUND {
                debug!(object, batch = index, "no records of this type in batch");
                continue;
            }

            let page: BatchReadResponse = decode(ensure_success(response, &url).await?, &url).await?;
            records.extend(
                page.results
                    .into_iter()
                    .map(|record| record.properties)
                    .filter(|props| !props.is_empty()),
            );
        }

        debug!(object, requested = ids.len(), received = records.len(), "batch read complete");
        Ok(records)
    }
}

#[async_trait]
impl CrmGateway for HubSpotClient {
    #[instrument(skip_all)]
    async fn list_all(&self) -> Result<Vec<ListDescriptor>> {
        let url = self.endpoint(&["crm", "v3", "lists", "search"]);
        let mut lists = Vec::new();
        let mut offset = 0;

        loop {
            let body = json!({ "query": "", "count": LIST_PAGE_SIZE, "offset": offset });
            let response = self.send(|| self.client.post(url.clone()).json(&body)).await?;

            let status = response.status();
            if !status.is_success() {
                warn!(%status, "list search refused, continuing without lists");
                return Ok(Vec::new());
            }

            let page: ListSearchResponse = decode(response, &url).await?;
            let received = page.lists.len() as u64;
            lists.extend(page.lists.into_iter().map(|raw| ListDescriptor {
                name: raw.name,
                list_id: value_to_string(&raw.list_id),
            }));

            if !page.has_more || received == 0 {
                break;
            }
            offset = page.offset.max(offset + received);
            tokio::time::sleep(self.page_delay).await;
        }

        info!(count = lists.len(), "fetched CRM lists");
        Ok(lists)
    }

    #[instrument(skip(self))]
    async fn members_of(&self, list_id: &str) -> Result<Vec<String>> {
        let mut first = self.endpoint(&["crm", "v3", "lists", list_id, "memberships"]);
        first.query_pairs_mut().append_pair("limit", MEMBERSHIP_PAGE_SIZE);

        let mut ids = Vec::new();
        let mut pages = 0;
        let mut next = Some(first);

        while let Some(url) = next.take() {
            if pages > 0 {
                tokio::time::sleep(self.page_delay).await;
            }

            let response = self.send(|| self.client.get(url.clone())).await?;
            let page: MembershipPage = decode(ensure_success(response, &url).await?, &url).await?;
            pages += 1;

            ids.extend(page.results.iter().map(|m| value_to_string(&m.record_id)));

            next = next_page_url(page.paging, &url)?;
            if next.as_ref() == Some(&url) {
                warn!(%url, "membership paging points at the current page, stopping");
                next = None;
            }
        }

        info!(members = ids.len(), pages, "fetched list memberships");
        Ok(ids)
    }

    #[instrument(skip_all, fields(ids = ids.len()))]
    async fn contact_details(&self, ids: &[String]) -> Result<Vec<ContactRecord>> {
        let records = self.batch_read("contacts", ids, CONTACT_PROPERTIES).await?;
        Ok(records
            .iter()
            .map(|props| ContactRecord {
                base: record_base(props),
                email: property(props, "email"),
                firstname: property(props, "firstname"),
                lastname: property(props, "lastname"),
            })
            .collect())
    }

    #[instrument(skip_all, fields(ids = ids.len()))]
    async fn company_details(&self, ids: &[String]) -> Result<Vec<CompanyRecord>> {
        let records = self.batch_read("companies", ids, COMPANY_PROPERTIES).await?;
        Ok(records
            .iter()
            .map(|props| CompanyRecord {
                base: record_base(props),
                name: property(props, "name"),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve the next membership page: the absolute `link` wins, else the `after` cursor.
fn next_page_url(paging: Option<Paging>, current: &Url) -> Result<Option<Url>> {
    let Some(next) = paging.and_then(|p| p.next) else {
        return Ok(None);
    };

    if let Some(link) = next.link.filter(|link| !link.is_empty()) {
        return Url::parse(&link)
            .map(Some)
            .map_err(|e| ExposecastError::Crm(format!("invalid paging link '{link}': {e}")));
    }

    let Some(after) = next.after.filter(|after| !after.is_empty()) else {
        return Ok(None);
    };

    let mut url = current.clone();
    let kept: Vec<(String, String)> = current
        .query_pairs()
        .filter(|(key, _)| key != "after")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("after", &after);
    Ok(Some(url))
}

async fn ensure_success(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ExposecastError::Crm(format!(
        "{url}: HTTP {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

async fn decode<T: DeserializeOwned>(response: Response, url: &Url) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| ExposecastError::Crm(format!("{url}: invalid response body: {e}")))
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn property(props: &Properties, key: &str) -> String {
    props.get(key).map(value_to_string).unwrap_or_default()
}

fn record_base(props: &Properties) -> RecordBase {
    RecordBase {
        hs_object_id: property(props, "hs_object_id"),
        createdate: property(props, "createdate"),
        lastmodifieddate: property(props, "lastmodifieddate"),
        lifecycle_stage: property(props, "lifecyclestage"),
        associations: property(props, "associations"),
    }
}

//! Fulfillment API client
//!
//! Bearer-authenticated JSON calls against the fulfillment backend. Any call
//! answered 401/403 is retried once after forcing a credential refresh.
//!
//! Request URLs are built segment by segment from the base URL, so record
//! ids and search terms are always percent-encoded and never change the
//! shape of the path.

use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::record::{decode_records, DocType, PendingBatch, Record};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Profile of the authenticated console user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorProfile {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub permissions: Vec<String>,
    pub groups: Vec<Value>,
    pub locations: Vec<Value>,
}

impl ActorProfile {
    /// Identity used for queue ownership; None if the profile has none
    pub fn actor_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingResponse {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    needs_review: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ManufacturersResponse {
    #[serde(default)]
    manufacturers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ClientsResponse {
    #[serde(default)]
    clients: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MatchesResponse {
    #[serde(default)]
    matches: Vec<Value>,
}

/// Queue-state action forwarded to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Queue,
    Dequeue,
}

impl QueueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Queue => "queue",
            QueueAction::Dequeue => "dequeue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One page of the active records listing
///
/// `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveRecordsQuery {
    pub page: u32,
    pub limit: u32,
    pub search: String,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl Default for ActiveRecordsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: String::new(),
            sort_by: None,
            sort_order: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pagination {
    pub total_items: u64,
    /// Page bookkeeping the backend adds (current page, page count, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveRecordsPage {
    pub datasheets: Vec<Value>,
    pub pagination: Pagination,
}

/// Criteria for matching an incoming record against existing datasheets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasheetQuery {
    pub product_identifier: Option<String>,
    pub man_name: Option<String>,
    pub aka: Vec<String>,
    pub upc: Vec<String>,
}

impl DatasheetQuery {
    pub fn is_empty(&self) -> bool {
        self.product_identifier.as_deref().map_or(true, str::is_empty)
            && self.man_name.as_deref().map_or(true, str::is_empty)
            && self.aka.is_empty()
            && self.upc.is_empty()
    }
}

/// Single path segment carrying a caller-supplied id
fn id_segment(id: &str) -> Result<&str> {
    match id {
        "" | "." | ".." => Err(Error::InvalidRequest(format!("invalid record id '{}'", id))),
        _ => Ok(id),
    }
}

pub struct FulfillClient<C> {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<C>,
    min_validity: Duration,
}

impl<C: CredentialProvider> FulfillClient<C> {
    pub fn new(http: reqwest::Client, base_url: Url, credentials: Arc<C>, min_validity: Duration) -> Self {
        Self {
            http,
            base_url,
            credentials,
            min_validity,
        }
    }

    pub fn credentials(&self) -> &Arc<C> {
        &self.credentials
    }

    /// Base URL with `segments` appended, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("API URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Pending records and review items
    pub async fn fetch_pending(&self) -> Result<PendingBatch> {
        let url = self.endpoint(&["fulfill", "pending"])?;
        let body: PendingResponse = self.send(Method::GET, url).await?.json().await?;

        let batch = PendingBatch {
            records: decode_records(body.records, "records"),
            needs_review: decode_records(body.needs_review, "needsReview"),
        };
        info!(
            records = batch.records.len(),
            needs_review = batch.needs_review.len(),
            "Fetched pending records"
        );
        Ok(batch)
    }

    /// Profile of the user the credential belongs to
    pub async fn fetch_actor(&self) -> Result<ActorProfile> {
        let url = self.endpoint(&["users", "permissions"])?;
        let profile: ActorProfile = self.send(Method::GET, url).await?.json().await?;
        debug!(actor = ?profile.actor_id(), "Fetched actor profile");
        Ok(profile)
    }

    /// Full record detail
    pub async fn fetch_record(&self, doc_type: DocType, id: &str) -> Result<Record> {
        let collection = match doc_type {
            DocType::Record => "record",
            DocType::RevTree => "revision",
        };
        let url = self.endpoint(&["fulfill", collection, id_segment(id)?])?;
        let record = self.send(Method::GET, url).await?.json().await?;
        Ok(record)
    }

    /// Ask the backend to queue or dequeue a record
    ///
    /// The response body is discarded; the resulting state change arrives
    /// through the live feed.
    pub async fn update_queue(&self, action: QueueAction, doc_type: DocType, id: &str) -> Result<()> {
        let doc_type_name = doc_type.to_string();
        let url = self.endpoint(&[
            "fulfill",
            "status",
            "update",
            action.as_str(),
            &doc_type_name,
            id_segment(id)?,
        ])?;
        self.send(Method::PATCH, url).await?;
        info!(action = action.as_str(), %doc_type, record_id = %id, "Queue action accepted");
        Ok(())
    }

    pub async fn queue(&self, doc_type: DocType, id: &str) -> Result<()> {
        self.update_queue(QueueAction::Queue, doc_type, id).await
    }

    pub async fn dequeue(&self, doc_type: DocType, id: &str) -> Result<()> {
        self.update_queue(QueueAction::Dequeue, doc_type, id).await
    }

    // ========================================
    // Reference data
    // ========================================

    pub async fn fetch_manufacturers(&self) -> Result<Vec<Value>> {
        let url = self.endpoint(&["fulfill", "manufacturers"])?;
        let body: ManufacturersResponse = self.send(Method::GET, url).await?.json().await?;
        debug!(count = body.manufacturers.len(), "Fetched manufacturers");
        Ok(body.manufacturers)
    }

    /// Manufacturer groups whose names match `man_name`
    ///
    /// A blank name matches nothing and is not sent.
    pub async fn search_manufacturers(&self, man_name: &str) -> Result<Vec<Value>> {
        if man_name.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint(&["fulfill", "manufacturers", "search"])?;
        url.query_pairs_mut().append_pair("manName", man_name);
        let body: MatchesResponse = self.send(Method::GET, url).await?.json().await?;
        Ok(body.matches)
    }

    pub async fn fetch_clients(&self) -> Result<Vec<Value>> {
        let url = self.endpoint(&["fulfill", "clients"])?;
        let body: ClientsResponse = self.send(Method::GET, url).await?.json().await?;
        debug!(count = body.clients.len(), "Fetched clients");
        Ok(body.clients)
    }

    /// Existing datasheets matching `query`; an empty query is not sent
    pub async fn search_datasheets(&self, query: &DatasheetQuery) -> Result<Vec<Value>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint(&["fulfill", "datasheets", "search"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(product_identifier) = query.product_identifier.as_deref().filter(|s| !s.is_empty()) {
                pairs.append_pair("productIdentifier", product_identifier);
            }
            if let Some(man_name) = query.man_name.as_deref().filter(|s| !s.is_empty()) {
                pairs.append_pair("manName", man_name);
            }
            if !query.aka.is_empty() {
                pairs.append_pair("aka", &query.aka.join(","));
            }
            if !query.upc.is_empty() {
                pairs.append_pair("upc", &query.upc.join(","));
            }
        }
        let body: MatchesResponse = self.send(Method::GET, url).await?.json().await?;
        Ok(body.matches)
    }

    /// One page of active records
    pub async fn fetch_active_records(&self, query: &ActiveRecordsQuery) -> Result<ActiveRecordsPage> {
        let mut url = self.endpoint(&["fulfill", "activeRecords"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("page", &query.page.max(1).to_string())
                .append_pair("limit", &query.limit.to_string())
                .append_pair("search", &query.search);
            if let Some(sort_by) = query.sort_by.as_deref() {
                pairs.append_pair("sortBy", sort_by).append_pair(
                    "sortOrder",
                    query.sort_order.unwrap_or(SortOrder::Asc).as_str(),
                );
            }
        }
        let page: ActiveRecordsPage = self.send(Method::GET, url).await?.json().await?;
        debug!(
            rows = page.datasheets.len(),
            total = page.pagination.total_items,
            "Fetched active records page"
        );
        Ok(page)
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        let request = |token: &str| -> RequestBuilder {
            self.http.request(method.clone(), url.clone()).bearer_auth(token)
        };

        let token = self.credentials.refresh(self.min_validity).await?;
        let response = request(&token).send().await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            warn!(status = %response.status(), path = url.path(), "Request rejected; refreshing credential and retrying");
            self.credentials.invalidate();
            let token = self.credentials.refresh(self.min_validity).await?;
            return check(request(&token).send().await?).await;
        }

        check(response).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        body,
    })
}

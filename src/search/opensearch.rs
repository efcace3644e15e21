use super::{BulkItemError, BulkResponse, DeleteOutcome, SearchIndex};
use crate::config::SearchConf;
use crate::error::{Result, SyncError};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tracing::debug;

const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Opensearch rest client, one for both plain http and tls secured clusters.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    http: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

impl OpenSearchClient {
    /// create a new client from search configuration.
    pub fn new(conf: &SearchConf) -> Result<OpenSearchClient> {
        let base = Url::parse(conf.url()).map_err(|e| {
            SyncError::InvalidConfig(format!("invalid opensearch url {:?}: {}", conf.url(), e))
        })?;
        let http = Client::builder()
            .timeout(conf.request_timeout())
            .connect_timeout(conf.connect_timeout())
            .pool_max_idle_per_host(4)
            .danger_accept_invalid_certs(!conf.verify_tls())
            .build()?;
        let (username, password) = match conf.credentials() {
            Some((user, pass)) => (Some(user.to_string()), pass.map(|p| p.to_string())),
            None => (None, None),
        };
        Ok(OpenSearchClient {
            http,
            base,
            username,
            password,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::InvalidConfig(format!("{} can't be used as base url", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }
}

impl SearchIndex for OpenSearchClient {
    fn ping(&self) -> Result<()> {
        let resp = self.authed(self.http.get(self.base.clone())).send()?;
        ensure_success(resp, "").map(|_| ())
    }

    fn index_exists(&self, index: &str) -> Result<bool> {
        let resp = self.authed(self.http.head(self.endpoint(&[index])?)).send()?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(status_error(resp, index)),
        }
    }

    fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let resp = self
            .authed(self.http.put(self.endpoint(&[index])?))
            .json(body)
            .send()?;
        if resp.status() == StatusCode::BAD_REQUEST {
            let text = resp.text().unwrap_or_default();
            // somebody else created it between our exists check and now.
            if text.contains(ALREADY_EXISTS) {
                debug!(%index, "Index already exists when creating");
                return Ok(());
            }
            return Err(SyncError::SearchIndexError {
                index: index.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
                body: text,
            });
        }
        ensure_success(resp, index).map(|_| ())
    }

    fn index_document(&self, index: &str, id: &str, doc: &Value) -> Result<()> {
        let resp = self
            .authed(self.http.put(self.endpoint(&[index, "_doc", id])?))
            .json(doc)
            .send()?;
        ensure_success(resp, index).map(|_| ())
    }

    fn delete_document(&self, index: &str, id: &str) -> Result<DeleteOutcome> {
        let resp = self
            .authed(self.http.delete(self.endpoint(&[index, "_doc", id])?))
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        ensure_success(resp, index).map(|_| DeleteOutcome::Deleted)
    }

    fn bulk_index(&self, index: &str, docs: &[(String, Value)]) -> Result<BulkResponse> {
        if docs.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = build_bulk_body(index, docs)?;
        let resp = self
            .authed(self.http.post(self.endpoint(&["_bulk"])?))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()?;
        let resp = ensure_success(resp, index)?;
        let result: Value = resp.json()?;
        Ok(parse_bulk_response(docs.len(), &result))
    }
}

fn ensure_success(resp: Response, index: &str) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(status_error(resp, index))
    }
}

fn status_error(resp: Response, index: &str) -> SyncError {
    let status = resp.status().as_u16();
    SyncError::SearchIndexError {
        index: index.to_string(),
        status,
        body: resp.text().unwrap_or_default(),
    }
}

/// Build newline delimited bulk request body, one `index` action line and one source line per doc.
pub(crate) fn build_bulk_body(index: &str, docs: &[(String, Value)]) -> Result<String> {
    let mut body = String::new();
    for (id, doc) in docs {
        let action = json!({"index": {"_index": index, "_id": id}});
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

/// Collect failed items out of a bulk response.
///
/// Response structure:
/// { "errors": true, "items": [ {"index": {"_id": "a", "status": 400, "error": {..}}} ] }
pub(crate) fn parse_bulk_response(total: usize, result: &Value) -> BulkResponse {
    let mut failed = vec![];
    if result.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        let items = result
            .get("items")
            .and_then(Value::as_array)
            .map(|v| v.as_slice())
            .unwrap_or_default();
        for item in items {
            let action = match item.get("index") {
                Some(a) => a,
                None => continue,
            };
            if let Some(reason) = action.get("error") {
                failed.push(BulkItemError {
                    id: action
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status: action.get("status").and_then(Value::as_u64).unwrap_or(0) as u16,
                    reason: reason.clone(),
                });
            }
        }
    }
    BulkResponse { total, failed }
}

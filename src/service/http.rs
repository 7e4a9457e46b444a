use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use super::{AlertFilter, ApiResult, DataService, PageRequest, ReadingFilter};
use crate::error::ApiError;
use crate::models::{
    Alert, AlertId, LinkForm, NetworkLink, NodeForm, Page, SensorNode, SensorReading, Threshold,
    ThresholdForm, ThresholdId, UserId,
};

// ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    user_id: UserId,
}

/// REST client for the WSN backend.
///
/// Every request carries the current bearer token. A 401 gets exactly one
/// refresh-and-retry; if the refresh is rejected, or the retried request is
/// rejected again, the tokens are dropped and the call fails with
/// [`ApiError::SessionExpired`]. Every later call fails the same way until
/// [`HttpDataService::login`] succeeds again.
pub struct HttpDataService {
    // ---
    client: Client,
    base_url: Url,
    tokens: RwLock<Option<Tokens>>,
    /// Serializes refreshes so concurrent 401s spend one refresh token.
    refresh_lock: Mutex<()>,
}

impl HttpDataService {
    // ---
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        // ---
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{} cannot carry a path", base_url)));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            tokens: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub async fn login(&self, username: &str, password: &str) -> ApiResult<()> {
        // ---
        let url = self.endpoint(&["api", "auth", "login"])?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let tokens: Tokens = Self::decode(Self::check(response).await?).await?;

        *self.tokens.write().await = Some(tokens);
        info!("Logged in as {}", username);
        Ok(())
    }

    /// Drop the session's tokens.
    pub async fn logout(&self) {
        self.tokens.write().await.take();
    }

    pub async fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        // ---
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// `rejected` is the access token that just got a 401. If another task
    /// already replaced it, the refresh has happened and nothing is sent.
    async fn refresh(&self, rejected: &str) -> ApiResult<()> {
        // ---
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                None => return Err(ApiError::SessionExpired),
                Some(t) if t.access_token != rejected => return Ok(()),
                Some(t) => t.refresh_token.clone().ok_or(ApiError::SessionExpired)?,
            }
        };

        let url = self.endpoint(&["api", "auth", "refresh"])?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;
        let mut fresh: Tokens = Self::decode(Self::check(response).await?).await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        *self.tokens.write().await = Some(fresh);
        info!("Access token refreshed");
        Ok(())
    }

    async fn terminate_session(&self) {
        // ---
        warn!("Session terminated, dropping credentials");
        self.logout().await;
    }

    /// Send an authenticated request, handling the single refresh-and-retry.
    async fn send<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        // ---
        let token = self.access_token().await.ok_or(ApiError::SessionExpired)?;

        let first = Self::check(build(&self.client).bearer_auth(&token).send().await?).await;
        match first {
            Err(e) if e.is_unauthorized() => {
                debug!("Access token rejected, attempting refresh");
            }
            other => return other,
        }

        match self.refresh(&token).await {
            Ok(()) => {}
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.terminate_session().await;
                return Err(ApiError::SessionExpired);
            }
        }

        let token = self.access_token().await.ok_or(ApiError::SessionExpired)?;
        let retried = Self::check(build(&self.client).bearer_auth(&token).send().await?).await;
        match retried {
            Err(e) if e.is_unauthorized() => {
                warn!("Request rejected again after refresh");
                self.terminate_session().await;
                Err(ApiError::SessionExpired)
            }
            other => other,
        }
    }

    async fn send_json<T, F>(&self, build: F) -> ApiResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        Self::decode(self.send(build).await?).await
    }

    /// Turn a non-success status into a classified error.
    async fn check(response: Response) -> ApiResult<Response> {
        // ---
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("HTTP {} body: {}", status, body);
        Err(ApiError::from_status(status, &body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        // ---
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// A caller-supplied id used as one path segment. `.` and `..` would be
/// dropped by URL normalization and address the parent collection.
fn id_segment<'a>(field: &str, id: &'a str) -> ApiResult<&'a str> {
    // ---
    if id.is_empty() || id == "." || id == ".." {
        return Err(ApiError::validation(
            format!("invalid {}", field),
            [(field.to_string(), "must be a non-empty identifier".to_string())],
        ));
    }
    Ok(id)
}

fn page_query(page: u32, size: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("size", size.to_string())]
}

impl DataService for HttpDataService {
    // ---
    async fn list_alerts(&self, request: &PageRequest<AlertFilter>) -> ApiResult<Page<Alert>> {
        // ---
        let url = self.endpoint(&["api", "alerts"])?;
        let mut query = page_query(request.page, request.size);
        if let Some(acknowledged) = request.filter.acknowledged {
            query.push(("acknowledged", acknowledged.to_string()));
        }
        debug!("GET {} {:?}", url, query);
        self.send_json(|c| c.get(url.clone()).query(&query)).await
    }

    async fn acknowledge_alert(&self, alert_id: AlertId, user_id: UserId) -> ApiResult<Alert> {
        // ---
        let id = alert_id.to_string();
        let url = self.endpoint(&["api", "alerts", id.as_str(), "acknowledge"])?;
        debug!("PUT {}", url);
        let body = AcknowledgeRequest { user_id };
        self.send_json(|c| c.put(url.clone()).json(&body)).await
    }

    async fn list_nodes(&self, request: &PageRequest<()>) -> ApiResult<Page<SensorNode>> {
        // ---
        let url = self.endpoint(&["api", "nodes"])?;
        let query = page_query(request.page, request.size);
        debug!("GET {} {:?}", url, query);
        self.send_json(|c| c.get(url.clone()).query(&query)).await
    }

    async fn get_node(&self, node_id: &str) -> ApiResult<SensorNode> {
        let url = self.endpoint(&["api", "nodes", id_segment("nodeId", node_id)?])?;
        debug!("GET {}", url);
        self.send_json(|c| c.get(url.clone())).await
    }

    async fn create_node(&self, form: &NodeForm) -> ApiResult<SensorNode> {
        let url = self.endpoint(&["api", "nodes"])?;
        debug!("POST {}", url);
        self.send_json(|c| c.post(url.clone()).json(form)).await
    }

    async fn update_node(&self, node_id: &str, form: &NodeForm) -> ApiResult<SensorNode> {
        let url = self.endpoint(&["api", "nodes", id_segment("nodeId", node_id)?])?;
        debug!("PUT {}", url);
        self.send_json(|c| c.put(url.clone()).json(form)).await
    }

    async fn delete_node(&self, node_id: &str) -> ApiResult<()> {
        // ---
        let url = self.endpoint(&["api", "nodes", id_segment("nodeId", node_id)?])?;
        debug!("DELETE {}", url);
        self.send(|c| c.delete(url.clone())).await?;
        Ok(())
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> ApiResult<Vec<SensorReading>> {
        // ---
        let url = self.endpoint(&["api", "readings"])?;
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(sensor_id) = &filter.sensor_id {
            query.push(("sensorId", sensor_id.clone()));
        }
        if let Some(node_id) = &filter.node_id {
            query.push(("nodeId", node_id.clone()));
        }
        if let Some(range) = &filter.range {
            query.push(("start", range.start.to_rfc3339()));
            query.push(("end", range.end.to_rfc3339()));
        }
        debug!("GET {} {:?}", url, query);
        self.send_json(|c| c.get(url.clone()).query(&query)).await
    }

    async fn get_topology(&self) -> ApiResult<Vec<NetworkLink>> {
        let url = self.endpoint(&["api", "topology"])?;
        debug!("GET {}", url);
        self.send_json(|c| c.get(url.clone())).await
    }

    async fn create_link(&self, form: &LinkForm) -> ApiResult<NetworkLink> {
        let url = self.endpoint(&["api", "topology", "links"])?;
        debug!("POST {}", url);
        self.send_json(|c| c.post(url.clone()).json(form)).await
    }

    async fn list_thresholds(&self, request: &PageRequest<()>) -> ApiResult<Page<Threshold>> {
        // ---
        let url = self.endpoint(&["api", "thresholds"])?;
        let query = page_query(request.page, request.size);
        debug!("GET {} {:?}", url, query);
        self.send_json(|c| c.get(url.clone()).query(&query)).await
    }

    async fn update_threshold(
        &self,
        threshold_id: ThresholdId,
        form: &ThresholdForm,
    ) -> ApiResult<Threshold> {
        // ---
        let id = threshold_id.to_string();
        let url = self.endpoint(&["api", "thresholds", id.as_str()])?;
        debug!("PUT {}", url);
        self.send_json(|c| c.put(url.clone()).json(form)).await
    }
}

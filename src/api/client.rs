use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use super::error::ApiError;
use super::types::{AccountSettings, DecisionCallback, TriggerRunRequest, TriggerRunResponse};
use super::OptimizerApi;
use crate::decision::DecisionView;
use crate::jobs::ProgressSnapshot;

/// HTTP client for the optimizer backend.
pub struct OptimizerClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl OptimizerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

/// Map rate limits and non-success statuses to [`ApiError`].
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or(1000);
        return Err(ApiError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response)
}

impl OptimizerApi for OptimizerClient {
    async fn trigger_run(&self, req: &TriggerRunRequest) -> Result<TriggerRunResponse, ApiError> {
        debug!(ad_account_id = %req.ad_account_id, mode = %req.mode, "triggering run");
        let response = self
            .authorized(self.client.post(self.url("/runs")))
            .json(req)
            .send()
            .await?;
        Ok(check(response).await?.json::<TriggerRunResponse>().await?)
    }

    async fn send_decision_callback(&self, callback: &DecisionCallback) -> Result<(), ApiError> {
        debug!(
            decision_id = %callback.decision_id,
            action = %callback.action,
            idempotency_key = %callback.idempotency_key,
            "sending decision callback"
        );
        let path = format!("/decisions/{}/callback", callback.decision_id);
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .header("Idempotency-Key", &callback.idempotency_key)
            .json(callback)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn fetch_decision(&self, decision_id: &str) -> Result<DecisionView, ApiError> {
        let path = format!("/decisions/{decision_id}");
        let response = self.authorized(self.client.get(self.url(&path))).send().await?;
        Ok(check(response).await?.json::<DecisionView>().await?)
    }

    async fn fetch_progress(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError> {
        let path = format!("/jobs/{job_id}/progress");
        let response = self.authorized(self.client.get(self.url(&path))).send().await?;
        Ok(check(response).await?.json::<ProgressSnapshot>().await?)
    }

    async fn save_settings(&self, ad_account_id: &str, settings: &AccountSettings) -> Result<(), ApiError> {
        let path = format!("/accounts/{ad_account_id}/settings");
        let response = self
            .authorized(self.client.put(self.url(&path)))
            .json(settings)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

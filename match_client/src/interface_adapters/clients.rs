use crate::domain::{AuthProvider, BoxError, MatchAssignment, MatchmakerProvider, Session};
use crate::interface_adapters::protocol::{
    DeviceAuthRequest, ErrorResponse, MatchRpcResponse, SessionResponse,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

// Thin wrapper around reqwest for the auth and match RPC endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    pub base_url: String,
}

#[derive(Debug)]
pub enum ApiClientError {
    Transport(reqwest::Error),
    Upstream {
        status: StatusCode,
        message: Option<String>,
    },
    Decode(reqwest::Error),
}

impl fmt::Display for ApiClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiClientError::Transport(err) => write!(f, "api transport error: {err}"),
            ApiClientError::Upstream { status, message } => {
                if let Some(message) = message {
                    write!(f, "api upstream error {status}: {message}")
                } else {
                    write!(f, "api upstream error {status}")
                }
            }
            ApiClientError::Decode(err) => write!(f, "api response decode error: {err}"),
        }
    }
}

impl std::error::Error for ApiClientError {}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiClientError> {
        let status = res.status();

        // Keep upstream status/message so callers can tell 4xx from outages.
        if !status.is_success() {
            let message = res
                .json::<ErrorResponse>()
                .await
                .ok()
                .map(|payload| payload.message);
            return Err(ApiClientError::Upstream { status, message });
        }

        res.json::<T>().await.map_err(ApiClientError::Decode)
    }
}

#[async_trait]
impl AuthProvider for ApiClient {
    async fn authenticate_device(&self, device_id: &str) -> Result<Session, BoxError> {
        let url = format!("{}/v2/account/authenticate/device", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&DeviceAuthRequest {
                device_id,
                create: true,
            })
            .send()
            .await
            .map_err(ApiClientError::Transport)?;

        let session = Self::read_json::<SessionResponse>(res).await?;
        Ok(Session::from(session))
    }
}

#[async_trait]
impl MatchmakerProvider for ApiClient {
    async fn request_match(
        &self,
        session: &Session,
        rpc_name: &str,
    ) -> Result<MatchAssignment, BoxError> {
        let url = format!("{}/v2/rpc/{}", self.base_url, rpc_name);
        let res = self
            .http
            .post(url)
            .bearer_auth(&session.token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(ApiClientError::Transport)?;

        let response = Self::read_json::<MatchRpcResponse>(res).await?;
        Ok(MatchAssignment::from(response))
    }
}

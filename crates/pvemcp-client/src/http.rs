//! HTTP client for the Proxmox VE API

use std::fmt;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use pvemcp_core::{GuestKind, NodeEntry, Vmid};

use crate::error::{ClientError, Result};
use crate::types::{
    AgentExecRequest, AgentExecStarted, AgentExecStatusRecord, ClusterMember, Envelope,
    GuestRecord,
};

/// API token credentials (`user!token_name=token_value`)
#[derive(Clone)]
pub struct ApiToken {
    pub user: String,
    pub token_name: String,
    pub token_value: String,
}

impl ApiToken {
    pub fn new(
        user: impl Into<String>,
        token_name: impl Into<String>,
        token_value: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            token_name: token_name.into(),
            token_value: token_value.into(),
        }
    }

    fn header(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_value
        )
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("user", &self.user)
            .field("token_name", &self.token_name)
            .field("token_value", &"<redacted>")
            .finish()
    }
}

/// Connection settings for [`ProxmoxClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub verify_ssl: bool,
    pub timeout: Duration,
    pub token: ApiToken,
}

impl ClientOptions {
    pub fn new(host: impl Into<String>, token: ApiToken) -> Self {
        Self {
            host: host.into(),
            port: 8006,
            verify_ssl: true,
            timeout: Duration::from_secs(30),
            token,
        }
    }

    /// `https://{host}:{port}/api2/json/`
    ///
    /// # Errors
    /// Returns an error if host and port do not form a valid URL
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!(
            "https://{}:{}/api2/json/",
            self.host, self.port
        ))?)
    }
}

/// HTTP client for the Proxmox VE REST API
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    client: Client,
    base_url: Url,
}

impl ProxmoxClient {
    /// Create a client authenticated with an API token
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the TLS client cannot be built.
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&options.token.header())
            .map_err(|e| ClientError::Settings(format!("invalid API token: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_ssl)
            .build()
            .map_err(|e| ClientError::Settings(format!("cannot build HTTP client: {e}")))?;

        Self::with_client(options.base_url()?, client)
    }

    /// Create a client around a preconfigured `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if `base_url` cannot be a base for API paths.
    pub fn with_client(mut base_url: Url, client: Client) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Settings(format!("{base_url} cannot be a base URL")));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    /// Build a full URL from a path relative to the API root
    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(ClientError::Url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ClientError::from_request)?;
        Self::data(response).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: impl serde::Serialize) -> Result<T> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_request)?;
        Self::data(response).await
    }

    /// Check the status and unwrap the `data` envelope
    async fn data<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(ClientError::from_request)?;
        let envelope: Envelope<Option<T>> = serde_json::from_str(&body)?;
        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("response has no data".into()))
    }

    // Cluster endpoints

    /// `GET /nodes`
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn nodes(&self) -> Result<Vec<NodeEntry>> {
        self.get(self.url("nodes")?).await
    }

    /// `GET /cluster/status`
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn cluster_status(&self) -> Result<Vec<ClusterMember>> {
        self.get(self.url("cluster/status")?).await
    }

    /// `GET /nodes/{node}/qemu` or `/nodes/{node}/lxc`
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestRecord>> {
        self.get(self.url(&format!("nodes/{node}/{}", kind.as_str()))?)
            .await
    }

    // Guest agent endpoints

    /// `POST /nodes/{node}/qemu/{vmid}/agent/exec`, returning the guest pid
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    #[instrument(skip(self, argv))]
    pub async fn agent_exec(&self, node: &str, vmid: Vmid, argv: &[String]) -> Result<u64> {
        let url = self.url(&format!("nodes/{node}/qemu/{vmid}/agent/exec"))?;
        let started: AgentExecStarted = self.post(url, AgentExecRequest { command: argv }).await?;
        debug!(pid = started.pid, "agent accepted command");
        Ok(started.pid)
    }

    /// `GET /nodes/{node}/qemu/{vmid}/agent/exec-status?pid={pid}`
    ///
    /// # Errors
    /// Returns an error if the request fails or the API returns an error.
    pub async fn agent_exec_status(
        &self,
        node: &str,
        vmid: Vmid,
        pid: u64,
    ) -> Result<AgentExecStatusRecord> {
        let mut url = self.url(&format!("nodes/{node}/qemu/{vmid}/agent/exec-status"))?;
        url.query_pairs_mut().append_pair("pid", &pid.to_string());
        self.get(url).await
    }
}

/// Error text from a Proxmox error body (`message` or the `errors` map)
fn api_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        return Some(message.trim().to_string());
    }
    let errors = value.get("errors")?.as_object()?;
    let parts: Vec<String> = errors
        .iter()
        .map(|(field, reason)| format!("{field}: {}", reason.as_str().unwrap_or_default().trim()))
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

//! HTTP client for the node RPC surface

use crate::common::{
    encode_key, DirectoryEntry, Error, PeerHandle, ProtocolMessage, RegisterRequest, Response,
    Result, Snapshot,
};
use crate::transport::{Connector, Peer};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// A node reached over HTTP.
pub struct HttpPeer {
    handle: PeerHandle,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(handle: PeerHandle, client: reqwest::Client) -> Self {
        Self { handle, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.handle.as_str().trim_end_matches('/'), path)
    }

    fn unreachable(&self, reason: impl ToString) -> Error {
        Error::Unreachable {
            node: self.handle.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Decode a 2xx body; any other status means the call did not complete.
    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let reason = error_reason(resp).await;
            return Err(self.unreachable(format!("{}: {}", status, reason)));
        }
        resp.json::<T>().await.map_err(|e| self.unreachable(e))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.decode(resp).await
    }

    // === Client operations ===

    pub async fn put(&self, key: &str, value: &str) -> Result<Response> {
        let resp = self
            .client
            .put(self.url(&format!("/kv/{}", encode_key(key))))
            .json(&json!({ "value": value }))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.decode(resp).await
    }

    pub async fn get(&self, key: &str) -> Result<Response> {
        self.get_json(&format!("/kv/{}", encode_key(key))).await
    }

    pub async fn delete(&self, key: &str) -> Result<Response> {
        let resp = self
            .client
            .delete(self.url(&format!("/kv/{}", encode_key(key))))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.decode(resp).await
    }
}

#[async_trait]
impl Peer for HttpPeer {
    fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    async fn send(&self, message: ProtocolMessage) -> Result<ProtocolMessage> {
        let resp = self
            .client
            .post(self.url("/internal/send"))
            .json(&message)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        // The peer answered but refused the message (409 vote, or a request
        // it would not accept). Only a silent or failing peer is unreachable.
        if resp.status().is_client_error() {
            return Err(Error::Abort {
                node: self.handle.to_string(),
                reason: error_reason(resp).await,
            });
        }
        self.decode(resp).await
    }

    async fn get_storage(&self) -> Result<Snapshot> {
        self.get_json("/internal/storage").await
    }

    async fn server_id(&self) -> Result<String> {
        self.get_json("/internal/id").await
    }

    async fn register_new_server(&self, id: &str, handle: &PeerHandle) -> Result<()> {
        let body = RegisterRequest {
            id: id.to_string(),
            handle: handle.clone(),
        };
        let resp = self
            .client
            .post(self.url("/internal/register"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(Error::AlreadyRegistered(id.to_string())),
            s => Err(self.unreachable(format!("{}: {}", s, error_reason(resp).await))),
        }
    }

    async fn directory(&self) -> Result<Vec<DirectoryEntry>> {
        self.get_json("/internal/directory").await
    }
}

/// Pull the `error` field out of an error body, falling back to the raw text.
async fn error_reason(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text)
}

/// Hands out [`HttpPeer`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Connector for HttpConnector {
    fn connect(&self, handle: &PeerHandle) -> Arc<dyn Peer> {
        Arc::new(HttpPeer::new(handle.clone(), self.client.clone()))
    }
}

//! Remote record-store calls: the thin layer between the coordinator and the
//! PDS XRPC surface.

use crate::error::RepoError;
use anchor_agent::{Agent, HttpResponse, RequestBody, SessionStore};
use async_trait::async_trait;
use http::Method;
use lexicons::{BlobRef, StrongRef};
use std::sync::Arc;
use url::Url;

/// The repo operations the coordinator sequences. One implementation talks to
/// a live PDS; tests substitute a scripted double.
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// The authenticated user's DID.
    async fn did(&self) -> String;

    async fn create_record(
        &self,
        collection: &str,
        rkey: Option<&str>,
        record: serde_json::Value,
    ) -> Result<StrongRef, RepoError>;

    /// Public read, no authentication.
    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<serde_json::Value, RepoError>;

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), RepoError>;

    async fn upload_blob(&self, data: Vec<u8>, content_type: &str) -> Result<BlobRef, RepoError>;

    async fn delete_blob(&self, cid: &str) -> Result<(), RepoError>;
}

/// [`RepoClient`] backed by an authenticated [`Agent`] for writes and a plain
/// HTTP client for public reads.
pub struct PdsRepoClient<S: SessionStore> {
    agent: Arc<Agent<S>>,
    public: reqwest::Client,
}

impl<S: SessionStore> PdsRepoClient<S> {
    pub fn new(agent: Arc<Agent<S>>) -> Self {
        Self {
            agent,
            public: reqwest::Client::new(),
        }
    }

    async fn xrpc_url(&self, nsid: &str) -> Result<Url, RepoError> {
        self.agent
            .pds_url()
            .await
            .join(&format!("/xrpc/{}", nsid))
            .map_err(|e| RepoError::Internal(e.to_string()))
    }

    async fn call(
        &self,
        nsid: &str,
        body: RequestBody,
    ) -> Result<HttpResponse, RepoError> {
        let url = self.xrpc_url(nsid).await?;
        let response = self
            .agent
            .authenticated_call(Method::POST, url, Some(body))
            .await
            .map_err(agent_error)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(classify(&response))
        }
    }
}

#[async_trait]
impl<S: SessionStore> RepoClient for PdsRepoClient<S> {
    async fn did(&self) -> String {
        self.agent.did().await
    }

    async fn create_record(
        &self,
        collection: &str,
        rkey: Option<&str>,
        record: serde_json::Value,
    ) -> Result<StrongRef, RepoError> {
        let mut body = serde_json::json!({
            "repo": self.did().await,
            "collection": collection,
            "record": record,
        });
        if let Some(rkey) = rkey {
            body["rkey"] = serde_json::Value::String(rkey.to_string());
        }

        let response = self
            .call("com.atproto.repo.createRecord", RequestBody::Json(body))
            .await?;
        response
            .json::<StrongRef>()
            .map_err(|e| RepoError::Internal(e.to_string()))
    }

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<serde_json::Value, RepoError> {
        let mut url = self.xrpc_url("com.atproto.repo.getRecord").await?;
        url.query_pairs_mut()
            .append_pair("repo", repo)
            .append_pair("collection", collection)
            .append_pair("rkey", rkey);

        let response = self
            .public
            .get(url)
            .send()
            .await
            .map_err(|e| RepoError::Transient(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RepoError::Transient(e.to_string()))?
            .to_vec();

        let response = HttpResponse {
            status,
            headers: Vec::new(),
            body,
        };
        if !response.is_success() {
            return Err(classify(&response));
        }
        response
            .json()
            .map_err(|e| RepoError::Internal(e.to_string()))
    }

    async fn delete_record(&self, collection: &str, rkey: &str) -> Result<(), RepoError> {
        let body = serde_json::json!({
            "repo": self.did().await,
            "collection": collection,
            "rkey": rkey,
        });
        self.call("com.atproto.repo.deleteRecord", RequestBody::Json(body))
            .await?;
        Ok(())
    }

    async fn upload_blob(&self, data: Vec<u8>, content_type: &str) -> Result<BlobRef, RepoError> {
        let response = self
            .call(
                "com.atproto.repo.uploadBlob",
                RequestBody::Bytes {
                    content_type: content_type.to_string(),
                    data,
                },
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct UploadBlobResponse {
            blob: BlobRef,
        }
        let parsed: UploadBlobResponse = response
            .json()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        Ok(parsed.blob)
    }

    async fn delete_blob(&self, cid: &str) -> Result<(), RepoError> {
        let body = serde_json::json!({
            "did": self.did().await,
            "cid": cid,
        });
        self.call("com.atproto.repo.deleteBlob", RequestBody::Json(body))
            .await?;
        Ok(())
    }
}

fn agent_error(error: anchor_agent::Error) -> RepoError {
    use anchor_agent::Error;
    match error {
        Error::SessionExpired | Error::RefreshFailed(_) => RepoError::Auth,
        Error::NetworkError(message) => RepoError::Transient(message),
        other => RepoError::Internal(other.to_string()),
    }
}

/// Sort a non-2xx PDS response into the retryable/permanent taxonomy.
fn classify(response: &HttpResponse) -> RepoError {
    let code = response.error_code();
    match response.status {
        401 => RepoError::Auth,
        404 => RepoError::NotFound,
        400 if matches!(code.as_deref(), Some("RecordNotFound") | Some("NotFound")) => {
            RepoError::NotFound
        }
        429 | 500..=599 => RepoError::Transient(format!(
            "status {}: {}",
            response.status,
            response.body_text()
        )),
        _ => RepoError::Rejected(format!(
            "status {}: {}",
            response.status,
            response.body_text()
        )),
    }
}

use std::time::Duration;

use reqwest::header::COOKIE;
use reqwest::multipart::Form;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::backoff::RetryPolicy;
use crate::listing::{DirectoryListing, parse_listing};
use crate::session::Session;

const ANTI_CSRF_HEADER: &str = "X-Hfs-Anti-Csrf";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HfsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("malformed response body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("access denied")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// What the server should do when the upload target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Skip,
    Overwrite,
}

impl UploadMode {
    pub fn as_query_value(self) -> &'static str {
        match self {
            UploadMode::Skip => "skip",
            UploadMode::Overwrite => "overwrite",
        }
    }
}

pub enum UploadPayload {
    /// Whole file content sent as the request body.
    Bytes(Vec<u8>),
    /// Streamed `multipart/form-data` body.
    Multipart(Form),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub status: StatusCode,
    pub body: String,
}

impl PutResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateFolder {
    Created,
    AlreadyExists,
}

/// Extra attributes returned for an existing path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteDetails {
    #[serde(default, rename = "s")]
    pub size: Option<u64>,
    #[serde(default, rename = "m")]
    pub modified: Option<String>,
}

/// Result of a file details query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    /// The server answered `null` for the path.
    Unknown,
    Absent,
    Present(RemoteDetails),
}

impl Existence {
    pub fn is_present(&self) -> bool {
        matches!(self, Existence::Present(_))
    }
}

#[derive(Debug, Deserialize)]
struct FileDetailsResponse {
    details: Vec<Value>,
}

#[derive(Clone)]
pub struct HfsClient {
    http: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HfsClient {
    pub fn new(base_url: &str) -> Result<Self, HfsError> {
        Self::with_config(base_url, ClientConfig::default())
    }

    pub fn for_domain(domain: &str) -> Result<Self, HfsError> {
        Self::new(&format!("https://{domain}"))
    }

    pub fn with_config(base_url: &str, config: ClientConfig) -> Result<Self, HfsError> {
        // Login answers with a redirect that carries the session cookie.
        let http = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn login(&self, login: &str, password: &str) -> Result<Session, HfsError> {
        let mut url = self.endpoint("/")?;
        url.query_pairs_mut()
            .append_pair("login", &format!("{login}:{password}"));
        let response = self.send(self.http.get(url)).await?;
        match response.status() {
            StatusCode::OK | StatusCode::FOUND => Ok(Session::from_set_cookie(response.headers())),
            status => {
                debug!(%status, "login rejected");
                Err(HfsError::Unauthorized)
            }
        }
    }

    pub async fn file_details(&self, session: &Session, path: &str) -> Result<Existence, HfsError> {
        let response = self
            .post_api(session, "/~/api/get_file_details", &json!({ "uris": [path] }))
            .await?;
        let payload: FileDetailsResponse = Self::handle_response(response).await?;
        let first = payload
            .details
            .into_iter()
            .next()
            .ok_or_else(|| HfsError::InvalidResponse("file details are empty".into()))?;
        match first {
            Value::Null => Ok(Existence::Unknown),
            Value::Bool(false) => Ok(Existence::Absent),
            Value::Object(_) => Ok(Existence::Present(serde_json::from_value(first)?)),
            other => Err(HfsError::InvalidResponse(format!(
                "unexpected file details value: {other}"
            ))),
        }
    }

    pub async fn exists(&self, session: &Session, path: &str) -> Result<bool, HfsError> {
        Ok(self.file_details(session, path).await?.is_present())
    }

    pub async fn create_folder(
        &self,
        session: &Session,
        parent: &str,
        name: &str,
    ) -> Result<CreateFolder, HfsError> {
        let response = self
            .post_api(
                session,
                "/~/api/create_folder",
                &json!({ "uri": parent, "name": name }),
            )
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(CreateFolder::AlreadyExists),
            StatusCode::NOT_FOUND => Err(HfsError::NotFound(parent.to_string())),
            status if status.is_success() => Ok(CreateFolder::Created),
            _ => Err(Self::error_from(response).await),
        }
    }

    pub async fn put_file(
        &self,
        session: &Session,
        remote_path: &str,
        payload: UploadPayload,
        mode: UploadMode,
    ) -> Result<PutResponse, HfsError> {
        let mut url = self.file_url(remote_path)?;
        url.query_pairs_mut()
            .append_pair("existing", mode.as_query_value());
        let request = self.with_session(self.http.put(url), session);
        let request = match payload {
            UploadPayload::Bytes(bytes) => request.body(bytes),
            UploadPayload::Multipart(form) => request.multipart(form),
        };
        let response = self.send(request).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(HfsError::Unauthorized);
        }
        let body = response.text().await?;
        Ok(PutResponse { status, body })
    }

    pub async fn list_directory(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<DirectoryListing, HfsError> {
        let mut url = self.endpoint("/~/api/get_file_list")?;
        url.query_pairs_mut().append_pair("uri", path);
        let response = self.send(self.with_session(self.http.get(url), session)).await?;
        if response.status() != StatusCode::OK {
            return Err(Self::error_from(response).await);
        }
        let body = response.text().await?;
        parse_listing(&body, path)
    }

    pub async fn delete(&self, session: &Session, path: &str) -> Result<(), HfsError> {
        let response = self
            .post_api(session, "/~/api/delete", &json!({ "uri": path }))
            .await?;
        match response.status() {
            // HFS answers 500 when the path is missing.
            StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR => {
                Err(HfsError::NotFound(path.to_string()))
            }
            status if status.is_success() => Ok(()),
            _ => Err(Self::error_from(response).await),
        }
    }

    pub async fn rename(
        &self,
        session: &Session,
        path: &str,
        new_name: &str,
    ) -> Result<(), HfsError> {
        let response = self
            .post_api(
                session,
                "/~/api/rename",
                &json!({ "uri": path, "dest": new_name }),
            )
            .await?;
        Self::expect_success(response, path).await
    }

    pub async fn move_files(
        &self,
        session: &Session,
        from: &[&str],
        to: &str,
    ) -> Result<(), HfsError> {
        let response = self
            .post_api(
                session,
                "/~/api/move_files",
                &json!({ "uri_from": from, "uri_to": to }),
            )
            .await?;
        Self::expect_success(response, to).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, HfsError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_url(&self, remote_path: &str) -> Result<Url, HfsError> {
        let mut url = self.endpoint("/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(remote_path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn with_session(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        match session.cookie_header() {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    async fn post_api(
        &self,
        session: &Session,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Response, HfsError> {
        let request = self
            .with_session(self.http.post(self.endpoint(endpoint)?), session)
            .header(ANTI_CSRF_HEADER, "1")
            .json(payload);
        let response = self.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(HfsError::Unauthorized);
        }
        Ok(response)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, HfsError> {
        let mut attempt = 0u32;
        let mut pending = request;
        loop {
            let replay = if attempt < self.retry.attempts {
                pending.try_clone()
            } else {
                None
            };
            match pending.send().await {
                Ok(response) => return Ok(response),
                Err(err) if RetryPolicy::is_retryable(&err) => {
                    let Some(next) = replay else {
                        return Err(err.into());
                    };
                    let delay = self.retry.backoff.delay(attempt);
                    warn!(attempt, ?delay, "request failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    pending = next;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn expect_success(response: Response, path: &str) -> Result<(), HfsError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(HfsError::NotFound(path.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, HfsError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn error_from(response: Response) -> HfsError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return HfsError::Unauthorized;
        }
        let body = response.text().await.unwrap_or_default();
        HfsError::Api { status, body }
    }
}

impl HfsError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HfsError::Unauthorized)
    }

    /// True when no HTTP response was received at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, HfsError::Request(err) if !err.is_decode() && !err.is_body())
    }
}

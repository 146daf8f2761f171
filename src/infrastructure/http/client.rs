use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{header, Client as ReqwestClient, Response};
use tracing::{debug, instrument};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{ObjectKey, Watermark};
use crate::domain::ports::{CatalogServer, MetadataUpdate, ObjectUpload, RemoteResponse};
use crate::infrastructure::wire::{self, XmlRpcValue};

const CSRF_COOKIE: &str = "csrftoken";
const SESSION_COOKIE: &str = "sessionid";
const CSRF_HEADER: &str = "X-CSRFToken";
const XML_CONTENT_TYPE: &str = "text/xml";

/// Configuration for the catalog server client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout; catalog downloads can be large
    pub timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// Authenticated session with one catalog server over HTTP
///
/// Logging in follows the server's form flow: the login page sets a CSRF
/// cookie, the credentials are posted back with that token, and the session
/// cookie is kept in the client's cookie jar for every later call.
pub struct HttpCatalogServer {
    address: String,
    base_url: String,
    http_client: ReqwestClient,
    csrf_token: String,
    session_id: String,
}

impl HttpCatalogServer {
    /// Log in to the server at `address` (`host[:port]`).
    pub async fn connect(address: &str, login: &str, password: &str) -> HarnessResult<Self> {
        Self::connect_with_config(address, login, password, &HttpClientConfig::default()).await
    }

    #[instrument(skip(password, config), err)]
    pub async fn connect_with_config(
        address: &str,
        login: &str,
        password: &str,
        config: &HttpClientConfig,
    ) -> HarnessResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_provider(Arc::new(Jar::default()))
            .build()
            .map_err(|e| transport_error("login", &e))?;
        let base_url = format!("http://{address}");
        let login_url = format!("{base_url}/login");

        let page = http_client
            .get(&login_url)
            .send()
            .await
            .map_err(|e| transport_error("login", &e))?;
        let csrf_token = cookie_value(&page, CSRF_COOKIE).ok_or_else(|| {
            HarnessError::infrastructure(
                "login",
                Some(page.status().as_u16()),
                format!("{address} did not set a {CSRF_COOKIE} cookie"),
            )
        })?;

        let response = http_client
            .post(&login_url)
            .header(CSRF_HEADER, &csrf_token)
            .form(&[("login", login), ("password", password)])
            .send()
            .await
            .map_err(|e| transport_error("login", &e))?;
        let session_id = cookie_value(&response, SESSION_COOKIE).ok_or_else(|| {
            HarnessError::infrastructure(
                "login",
                Some(response.status().as_u16()),
                format!("{address} rejected the credentials of {login}"),
            )
        })?;

        debug!(server = address, "logged in");
        Ok(Self {
            address: address.to_string(),
            base_url,
            http_client,
            csrf_token,
            session_id,
        })
    }

    /// Session id assigned at login; XML-RPC calls pass it explicitly.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn post_xml(&self, operation: &str, path: &str, body: String) -> HarnessResult<RemoteResponse> {
        let response = self
            .http_client
            .post(format!("{}/{path}", self.base_url))
            .header(CSRF_HEADER, &self.csrf_token)
            .header(header::CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;
        into_remote(operation, response).await
    }
}

#[async_trait]
impl CatalogServer for HttpCatalogServer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn fetch_catalog(&self, from: Watermark) -> HarnessResult<RemoteResponse> {
        self.post_xml("GetCatalog", "api/easo/GetCatalog", wire::catalog_request(from))
            .await
    }

    async fn fetch_archive_catalog(&self, id: &str) -> HarnessResult<RemoteResponse> {
        self.post_xml(
            "GetArchiveCatalog",
            "api/easo/GetArchiveCatalog",
            wire::archive_catalog_request(id),
        )
        .await
    }

    async fn run_remote_job(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> HarnessResult<RemoteResponse> {
        let response = self
            .http_client
            .post(format!("{}/jsonrpc/{method}", self.base_url))
            .header(CSRF_HEADER, &self.csrf_token)
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(method, &e))?;
        into_remote(method, response).await
    }

    async fn delete_object(&self, key: &ObjectKey) -> HarnessResult<RemoteResponse> {
        self.post_xml(
            "DeleteObjects",
            "api/easo/DeleteObjects",
            wire::delete_version_request(key),
        )
        .await
    }

    async fn upload_object(&self, upload: &ObjectUpload) -> HarnessResult<RemoteResponse> {
        let form = reqwest::multipart::Form::new()
            .text("object_attrs", upload.metadata_document.clone())
            .part(
                "object_file",
                reqwest::multipart::Part::bytes(upload.archive.clone())
                    .file_name(upload.file_name.clone()),
            );
        let response = self
            .http_client
            .post(format!("{}/api/easo/PutObject", self.base_url))
            .header(CSRF_HEADER, &self.csrf_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("PutObject", &e))?;
        into_remote("PutObject", response).await
    }

    async fn set_metadata(&self, update: &MetadataUpdate) -> HarnessResult<RemoteResponse> {
        let chart_ids = XmlRpcValue::Array(vec![XmlRpcValue::Struct(vec![
            ("id".to_string(), XmlRpcValue::String(update.object_id.clone())),
            ("updated".to_string(), XmlRpcValue::Double(update.updated)),
        ])]);
        let metadata = XmlRpcValue::Struct(
            update
                .metadata
                .iter()
                .map(|(name, value)| (name.clone(), XmlRpcValue::from(value)))
                .collect(),
        );
        let tags = XmlRpcValue::Array(
            update
                .tags
                .iter()
                .cloned()
                .map(XmlRpcValue::String)
                .collect(),
        );
        let body = wire::xmlrpc_call(
            "set_chart_metadata",
            &[
                XmlRpcValue::String(self.session_id.clone()),
                XmlRpcValue::String(update.classifier_version.clone()),
                chart_ids,
                metadata,
                tags,
            ],
        );
        self.post_xml("set_chart_metadata", "webapi", body).await
    }
}

fn cookie_value(response: &Response, name: &str) -> Option<String> {
    response
        .cookies()
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

fn transport_error(operation: &str, error: &reqwest::Error) -> HarnessError {
    HarnessError::infrastructure(
        operation,
        error.status().map(|s| s.as_u16()),
        error.to_string(),
    )
}

async fn into_remote(operation: &str, response: Response) -> HarnessResult<RemoteResponse> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(operation, &e))?;
    Ok(RemoteResponse::with_status(
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        body.to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(HttpClientConfig::default().timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_is_infrastructure_failure() {
        let config = HttpClientConfig { timeout_secs: 1 };
        let result =
            HttpCatalogServer::connect_with_config("127.0.0.1:9", "user", "pw", &config).await;
        assert!(matches!(
            result,
            Err(HarnessError::Infrastructure { ref operation, .. }) if operation == "login"
        ));
    }
}

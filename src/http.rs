use crate::client::{LogClient, PutLogsRequest};
use crate::config::ProjectConfig;
use crate::error::{codes, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

const API_VERSION: &str = "0.6.0";

/// Configuration for [`HttpLogClient`].
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Per-request timeout; an expired request fails with `RequestError`
    /// and is retried like any other transport failure.
    pub request_timeout: Duration,
    /// Scheme used for bare host endpoints.
    pub use_https: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            use_https: true,
        }
    }
}

/// [`LogClient`] speaking the JSON tracking interface over HTTP.
///
/// Each batch becomes one `POST {base}/logstores/{log_store}/track` whose
/// body carries topic, source and records. The base URL is
/// `{scheme}://{project}.{endpoint}` for bare host endpoints; an endpoint
/// that already has a scheme is used as-is. The tracking interface picks
/// the shard itself, so shard hashes are not transmitted.
///
/// Requests are not signed: `access_key_id` and `access_key_secret` are
/// ignored and only an STS `security_token` is forwarded. This works only
/// against log stores with web tracking enabled; anything else answers
/// `Unauthorized`.
#[derive(Clone)]
pub struct HttpLogClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpLogClient {
    /// Construct a new client instance using the provided configuration.
    pub fn new(config: HttpClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn endpoint(&self, project: &ProjectConfig, log_store: &str) -> String {
        let base = if project.endpoint.starts_with("http://") || project.endpoint.starts_with("https://") {
            project.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.config.use_https { "https" } else { "http" };
            format!("{}://{}.{}", scheme, project.project, project.endpoint.trim_end_matches('/'))
        };
        format!("{}/logstores/{}/track", base, urlencoding::encode(log_store))
    }

    fn map_request(request: &PutLogsRequest<'_>) -> Value {
        let logs: Vec<Value> = request
            .items
            .iter()
            .map(|item| {
                let mut log = Map::with_capacity(item.contents.len() + 1);
                log.insert("__time__".to_string(), Value::from(item.time));
                for content in &item.contents {
                    log.insert(content.key.clone(), Value::String(content.value.clone()));
                }
                Value::Object(log)
            })
            .collect();
        json!({
            "__topic__": request.topic,
            "__source__": request.source,
            "__logs__": logs,
            "__tags__": { "__pack_id__": request.package_id },
        })
    }
}

impl Default for HttpLogClient {
    fn default() -> Self {
        Self::new(HttpClientConfig::default())
    }
}

/// Error document returned by the service on non-2xx responses.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: String,
    error_message: String,
}

fn error_from_response(status: StatusCode, text: &str) -> ServiceError {
    if let Ok(body) = serde_json::from_str::<ErrorBody>(text) {
        return ServiceError::new(body.error_code, body.error_message);
    }
    let code = if status.is_server_error() {
        codes::INTERNAL_SERVER_ERROR.to_string()
    } else {
        format!("Http{}", status.as_u16())
    };
    ServiceError::new(code, format!("unexpected status {}: {}", status, text))
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn put_logs(
        &self,
        project: &ProjectConfig,
        request: &PutLogsRequest<'_>,
    ) -> Result<(), ServiceError> {
        let body = serde_json::to_vec(&Self::map_request(request))
            .map_err(|e| ServiceError::new(codes::PRODUCER_EXCEPTION, e.to_string()))?;
        let mut builder = self
            .client
            .post(self.endpoint(project, request.log_store))
            .header("Content-Type", "application/json")
            .header("x-log-apiversion", API_VERSION)
            .header("x-log-bodyrawsize", body.len().to_string());
        if let Some(token) = &project.security_token {
            builder = builder.header("x-acs-security-token", token.as_str());
        }

        let resp = builder.body(body).send().await.map_err(ServiceError::request_error)?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(error_from_response(status, &text))
        }
    }
}

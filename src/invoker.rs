//! HTTP invoker
//!
//! Executes the outbound request described by a job template with bounded
//! resources and returns a structured outcome. The invoker never raises into
//! the dispatcher: every network-layer failure becomes an outcome with a
//! categorized error message, recorded like any other execution.

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants::http::{CONNECT_TIMEOUT, MAX_REDIRECTS};
use crate::database::{ExecutionOutcome, ExecutionStatus, HeaderMap, HttpMethod, Job};

/// Immutable copy of a job's request template, taken at the firing instant
/// so a concurrent job update cannot change a request mid-flight.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RequestSnapshot {
    pub fn from_job(job: &Job) -> Self {
        Self {
            method: job.method,
            url: job.url.clone(),
            headers: job.headers.clone(),
            body: job.body.clone(),
        }
    }
}

pub struct HttpInvoker {
    client: Client,
    user_agent: String,
    request_timeout: Duration,
    body_limit: usize,
}

impl HttpInvoker {
    /// Build the shared client. Redirects are followed up to 5 hops; reqwest
    /// drops Authorization and other sensitive headers when a redirect
    /// leaves the origin.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
            body_limit: config.response_body_limit_bytes,
        })
    }

    /// Execute exactly one invocation. Success means an HTTP status in
    /// [200, 300); any received non-2xx status is `failed`, an elapsed
    /// deadline is `timeout`.
    pub async fn invoke(&self, snapshot: &RequestSnapshot) -> ExecutionOutcome {
        let started = Instant::now();
        debug!("Invoking {} {}", snapshot.method, snapshot.url);

        let request = match self.build_request(snapshot) {
            Ok(r) => r,
            Err(message) => {
                return failure_outcome(
                    ExecutionStatus::Failed,
                    message,
                    elapsed_ms(started),
                )
            }
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                let (status, message) = categorize_error(&e, elapsed);
                return failure_outcome(status, message, elapsed);
            }
        };

        let code = response.status().as_u16() as i64;
        let response_headers = capture_headers(&response);

        let body = match response.bytes().await {
            Ok(bytes) => truncate_body(&bytes, self.body_limit),
            Err(e) => {
                return ExecutionOutcome {
                    status: ExecutionStatus::Failed,
                    duration_ms: elapsed_ms(started),
                    response_code: Some(code),
                    response_body: None,
                    response_headers: Some(response_headers),
                    error_message: Some(format!(
                        "response_truncated_read_error: {}",
                        e
                    )),
                };
            }
        };

        let duration_ms = elapsed_ms(started);
        if (200..300).contains(&code) {
            ExecutionOutcome {
                status: ExecutionStatus::Success,
                duration_ms,
                response_code: Some(code),
                response_body: Some(body),
                response_headers: Some(response_headers),
                error_message: None,
            }
        } else {
            ExecutionOutcome {
                status: ExecutionStatus::Failed,
                duration_ms,
                response_code: Some(code),
                response_body: Some(body),
                response_headers: Some(response_headers),
                error_message: Some(format!("http_non_2xx: status {}", code)),
            }
        }
    }

    fn build_request(
        &self,
        snapshot: &RequestSnapshot,
    ) -> Result<reqwest::RequestBuilder, String> {
        let method = match snapshot.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let url = reqwest::Url::parse(&snapshot.url)
            .map_err(|e| format!("invalid URL '{}': {}", snapshot.url, e))?;
        let mut request = self.client.request(method, url).timeout(self.request_timeout);

        let mut has_user_agent = false;
        let mut has_content_type = false;
        for (name, value) in &snapshot.headers {
            let header_name = match HeaderName::try_from(name.as_str()) {
                Ok(n) => n,
                Err(_) => {
                    warn!("Skipping invalid header name '{}'", name);
                    continue;
                }
            };
            let header_value = match HeaderValue::try_from(value.as_str()) {
                Ok(v) => v,
                Err(_) => {
                    warn!("Skipping invalid value for header '{}'", name);
                    continue;
                }
            };
            if header_name == USER_AGENT {
                has_user_agent = true;
            }
            if header_name == CONTENT_TYPE {
                has_content_type = true;
            }
            request = request.header(header_name, header_value);
        }

        if !has_user_agent {
            request = request.header(USER_AGENT, self.user_agent.as_str());
        }

        if snapshot.method.allows_body() {
            if let Some(body) = &snapshot.body {
                if !has_content_type {
                    // The body is sent verbatim either way; JSON detection
                    // only picks the default Content-Type.
                    let content_type =
                        if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                            "application/json"
                        } else {
                            "application/octet-stream"
                        };
                    request = request.header(CONTENT_TYPE, content_type);
                }
                request = request.body(body.clone());
            }
        }

        Ok(request)
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn failure_outcome(status: ExecutionStatus, message: String, duration_ms: i64) -> ExecutionOutcome {
    ExecutionOutcome {
        status,
        duration_ms,
        response_code: None,
        response_body: None,
        response_headers: None,
        error_message: Some(message),
    }
}

fn capture_headers(response: &reqwest::Response) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    headers
}

fn truncate_body(bytes: &[u8], limit: usize) -> String {
    let slice = if bytes.len() > limit {
        &bytes[..limit]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).into_owned()
}

/// Map a transport error onto the outcome taxonomy: `timeout`,
/// `dns_failure`, `connect_refused`, or `tls_failure`.
fn categorize_error(error: &reqwest::Error, elapsed_ms: i64) -> (ExecutionStatus, String) {
    if error.is_timeout() {
        return (
            ExecutionStatus::Timeout,
            format!("timeout: no response within {} ms", elapsed_ms),
        );
    }

    let chain = error_chain(error).to_lowercase();
    if chain.contains("dns") || chain.contains("resolve") || chain.contains("name or service") {
        return (
            ExecutionStatus::Failed,
            format!("dns_failure: {}", error),
        );
    }
    if chain.contains("certificate")
        || chain.contains("tls")
        || chain.contains("ssl")
        || chain.contains("handshake")
    {
        return (
            ExecutionStatus::Failed,
            format!("tls_failure: {}", error),
        );
    }
    if error.is_connect() {
        return (
            ExecutionStatus::Failed,
            format!("connect_refused: {}", error),
        );
    }

    (ExecutionStatus::Failed, format!("request_error: {}", error))
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

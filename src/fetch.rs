//! Sandboxed fetch implementation with origin allowlist.
//!
//! The server bundle fetches article and category data from the news API
//! while rendering. Only origins listed in configuration are reachable, and
//! redirects are followed manually so they cannot leave the original origin.

use anyhow::anyhow;
use deno_core::{error::AnyError, op2, OpState};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Upper bound on manually followed redirects for a single fetch.
const MAX_REDIRECTS: usize = 5;

/// Fetch allowlist plus the client used for permitted requests.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Allowed origins (scheme + host + port), e.g. "https://api.example.com"
    pub allowed_origins: Vec<String>,
    client: Client,
}

impl FetchPolicy {
    /// `timeout` bounds each request, from connecting to the end of the body.
    pub fn new(allowed_origins: Vec<String>, timeout: Duration) -> Result<Self, AnyError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let allowed_origins = allowed_origins
            .into_iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            allowed_origins,
            client,
        })
    }

    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        if self.allowed_origins.is_empty() {
            return false;
        }
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
    }
}

/// Request info passed from JS
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Response info returned to JS
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub url: String,
    pub body: String,
}

#[op2(async)]
#[serde]
pub async fn op_fetch(
    state: Rc<RefCell<OpState>>,
    #[serde] request: FetchRequest,
) -> Result<FetchResponse, AnyError> {
    let policy = {
        let state_ref = state.borrow();
        state_ref.borrow::<FetchPolicy>().clone()
    };

    do_fetch(request, &policy).await
}

fn parse_method(method: Option<&str>) -> Result<Method, AnyError> {
    let method = match method.unwrap_or("GET").to_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "PATCH" => Method::PATCH,
        "HEAD" => Method::HEAD,
        "OPTIONS" => Method::OPTIONS,
        other => return Err(anyhow!("Unsupported HTTP method: {}", other)),
    };
    Ok(method)
}

/// Perform `request`, following same-origin redirects by hand.
async fn do_fetch(mut request: FetchRequest, policy: &FetchPolicy) -> Result<FetchResponse, AnyError> {
    let origin = Url::parse(&request.url)
        .map_err(|e| anyhow!("Invalid URL '{}': {}", request.url, e))?
        .origin();

    for _ in 0..=MAX_REDIRECTS {
        let url = Url::parse(&request.url)
            .map_err(|e| anyhow!("Invalid URL '{}': {}", request.url, e))?;
        if !policy.is_origin_allowed(&url) {
            return Err(anyhow!(
                "Fetch blocked: origin '{}' is not in the allowlist. Allowed: {:?}",
                url.origin().ascii_serialization(),
                policy.allowed_origins
            ));
        }

        let mut builder = policy
            .client
            .request(parse_method(request.method.as_deref())?, url.clone());
        for (key, value) in request.headers.iter().flatten() {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body.take() {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!("Fetch failed for '{}': {}", url, e))?;
        let status = response.status();

        let location = if status.is_redirection() {
            response
                .headers()
                .get(reqwest::header::LOCATION)
                .map(|value| value.to_str().map(str::to_string))
        } else {
            None
        };
        let Some(location) = location else {
            return into_fetch_response(response).await;
        };

        let location =
            location.map_err(|_| anyhow!("Invalid redirect location from '{}'", url))?;
        let next = url
            .join(&location)
            .map_err(|e| anyhow!("Invalid redirect URL: {}", e))?;
        if next.origin() != origin {
            return Err(anyhow!(
                "Fetch blocked: redirect to different origin '{}' (original: '{}')",
                next.origin().ascii_serialization(),
                origin.ascii_serialization()
            ));
        }

        tracing::debug!(from = %url, to = %next, %status, "sandbox fetch redirected");
        request.url = next.to_string();
        request.method = Some("GET".to_string());
    }

    Err(anyhow!("Fetch blocked: too many redirects from '{}'", request.url))
}

async fn into_fetch_response(response: reqwest::Response) -> Result<FetchResponse, AnyError> {
    let status = response.status();
    let url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(key, value)| Some((key.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from '{}': {}", url, e))?;

    Ok(FetchResponse {
        ok: status.is_success(),
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
        headers,
        url,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_origin_matching() {
        let policy = FetchPolicy::new(
            vec![
                "https://api.chrononews.id".to_string(),
                "http://localhost:3000/".to_string(),
            ],
            TIMEOUT,
        )
        .unwrap();

        assert!(policy.is_origin_allowed(&Url::parse("https://api.chrononews.id/posts").unwrap()));
        assert!(policy.is_origin_allowed(&Url::parse("https://api.chrononews.id/").unwrap()));
        // trailing slash in configuration is tolerated
        assert!(policy.is_origin_allowed(&Url::parse("http://localhost:3000/api").unwrap()));

        assert!(!policy.is_origin_allowed(&Url::parse("https://evil.com/api").unwrap()));
        assert!(!policy.is_origin_allowed(&Url::parse("http://api.chrononews.id/posts").unwrap()));
        assert!(!policy.is_origin_allowed(&Url::parse("https://api.chrononews.id:8080/").unwrap()));
    }

    #[test]
    fn test_empty_allowlist() {
        let policy = FetchPolicy::new(vec![String::new(), "  ".to_string()], TIMEOUT).unwrap();
        assert!(policy.allowed_origins.is_empty());
        assert!(!policy.is_origin_allowed(&Url::parse("https://anything.com").unwrap()));
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method(None).unwrap(), Method::GET);
        assert_eq!(parse_method(Some("post")).unwrap(), Method::POST);
        assert!(parse_method(Some("TRACE")).is_err());
    }

    #[tokio::test]
    async fn test_blocked_fetch_never_hits_network() {
        let policy = FetchPolicy::new(vec!["https://api.chrononews.id".to_string()], TIMEOUT).unwrap();
        let request = FetchRequest {
            url: "https://tracker.example/pixel".to_string(),
            method: None,
            headers: None,
            body: None,
        };

        let err = do_fetch(request, &policy).await.unwrap_err();
        assert!(err.to_string().contains("not in the allowlist"));
    }

    #[tokio::test]
    async fn test_hung_origin_times_out() {
        let app = axum::Router::new().route(
            "/posts",
            axum::routing::get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "[]"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let policy = FetchPolicy::new(vec![origin.clone()], Duration::from_millis(100)).unwrap();
        let request = FetchRequest {
            url: format!("{origin}/posts"),
            method: None,
            headers: None,
            body: None,
        };

        let started = std::time::Instant::now();
        let err = do_fetch(request, &policy).await.unwrap_err();
        assert!(err.to_string().contains("Fetch failed"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! External semantic matcher client
//!
//! The matcher is an opaque HTTP service: `GET {base_url}/search?q=<query>`
//! answers with a JSON array of ranked hits such as
//!
//! ```json
//! [{"Title_Code": "7212.0100", "Title": "Welder", "Score": "87%", "Description": "..."}]
//! ```
//!
//! Hits are resolved against local NCO codes by the job search service.

use crate::config::MatcherConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// One ranked hit returned by the matcher
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatcherHit {
    #[serde(rename = "Title_Code")]
    pub title_code: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Score", default)]
    pub score: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}

impl MatcherHit {
    /// Score as a fraction in `0.0..=1.0`; unparseable scores count as zero
    pub fn score_fraction(&self) -> f64 {
        parse_score(&self.score).unwrap_or(0.0)
    }

    /// The hit's code with separators removed (`"7212.0100"` becomes `"72120100"`)
    pub fn normalized_code(&self) -> String {
        self.title_code.chars().filter(|c| c.is_ascii_digit()).collect()
    }
}

/// Parse a percentage such as `"87%"` (or a bare `"87"`) into `0.87`.
///
/// Values are clamped to `0.0..=1.0`.
pub fn parse_score(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().trim_end_matches('%').trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value / 100.0).clamp(0.0, 1.0))
}

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Matcher request timed out")]
    Timeout,

    #[error("Matcher responded with status {0}")]
    Status(u16),

    #[error("Matcher request failed: {0}")]
    Request(String),

    #[error("Invalid matcher response: {0}")]
    Decode(String),
}

impl MatcherError {
    /// HTTP status returned by the matcher, if it answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            MatcherError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Client for the semantic matching service
#[async_trait]
pub trait MatcherClient: Send + Sync {
    /// Name recorded with every outbound request
    fn service_name(&self) -> &str;

    /// Endpoint recorded with every outbound request
    fn endpoint(&self) -> String;

    async fn search(&self, query: &str) -> Result<Vec<MatcherHit>, MatcherError>;
}

/// reqwest-backed matcher client
pub struct HttpMatcherClient {
    client: reqwest::Client,
    base_url: String,
    service_name: String,
}

impl HttpMatcherClient {
    pub fn new(
        base_url: impl Into<String>,
        service_name: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nco-portal/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create matcher HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_name: service_name.into(),
        })
    }

    /// Build a client from configuration; `None` when no base URL is set
    pub fn from_config(config: &MatcherConfig) -> anyhow::Result<Option<Self>> {
        match config.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(Some(Self::new(
                url,
                config.service_name.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MatcherClient for HttpMatcherClient {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn endpoint(&self) -> String {
        format!("{}/search", self.base_url)
    }

    async fn search(&self, query: &str) -> Result<Vec<MatcherHit>, MatcherError> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MatcherError::Timeout
                } else {
                    MatcherError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MatcherError::Status(status.as_u16()));
        }

        response
            .json::<Vec<MatcherHit>>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MatcherError::Timeout
                } else {
                    MatcherError::Decode(e.to_string())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("87%"), Some(0.87));
        assert_eq!(parse_score(" 100 % "), Some(1.0));
        assert_eq!(parse_score("42"), Some(0.42));
        assert_eq!(parse_score("140%"), Some(1.0));
        assert_eq!(parse_score("-3%"), Some(0.0));
        assert_eq!(parse_score("high"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_hit_decoding_and_code() {
        let hits: Vec<MatcherHit> = serde_json::from_str(
            r#"[{"Title_Code":"7212.0100","Title":"Welder","Score":"91%","Description":"Welds..."}]"#,
        )
        .unwrap();
        assert_eq!(hits[0].normalized_code(), "72120100");
        assert!((hits[0].score_fraction() - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_from_config_without_url() {
        assert!(HttpMatcherClient::from_config(&MatcherConfig::default())
            .unwrap()
            .is_none());

        let config = MatcherConfig {
            base_url: Some("http://matcher.local:8000/".into()),
            ..Default::default()
        };
        let client = HttpMatcherClient::from_config(&config).unwrap().unwrap();
        assert_eq!(client.endpoint(), "http://matcher.local:8000/search");
        assert_eq!(client.service_name(), "nco-matcher");
    }

    async fn spawn_matcher(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_search_roundtrip() {
        let router = Router::new().route(
            "/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(serde_json::json!([{
                    "Title_Code": "7212.0100",
                    "Title": format!("Match for {}", params.get("q").cloned().unwrap_or_default()),
                    "Score": "87%",
                    "Description": "Joins metal parts"
                }]))
            }),
        );
        let base = spawn_matcher(router).await;

        let client = HttpMatcherClient::new(base, "nco-matcher", Duration::from_secs(5)).unwrap();
        let hits = client.search("metal welder").await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Match for metal welder");
        assert_eq!(hits[0].score, "87%");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let router = Router::new().route(
            "/search",
            get(|| async { (axum::http::StatusCode::BAD_REQUEST, "Please provide a query") }),
        );
        let base = spawn_matcher(router).await;

        let client = HttpMatcherClient::new(base, "nco-matcher", Duration::from_secs(5)).unwrap();
        let err = client.search("x").await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let router = Router::new().route(
            "/search",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(serde_json::json!([]))
            }),
        );
        let base = spawn_matcher(router).await;

        let client = HttpMatcherClient::new(base, "nco-matcher", Duration::from_millis(200)).unwrap();
        let err = client.search("slow").await.unwrap_err();
        assert!(matches!(err, MatcherError::Timeout));
    }

    proptest! {
        #[test]
        fn percent_scores_map_into_unit_range(n in 0u32..=100) {
            let score = parse_score(&format!("{}%", n)).unwrap();
            prop_assert!((score - n as f64 / 100.0).abs() < 1e-9);
        }
    }
}

//! # Research Services
//!
//! Outbound knowledge-query collaborators. The orchestrator only sees the
//! `ResearchService` trait; which backend answers is a wiring decision.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: String,
}

/// Whatever a research query returned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResearchInsights {
    /// Backend that answered, e.g. `searxng`
    pub source: String,
    pub findings: Vec<Finding>,
}

impl ResearchInsights {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// A research/knowledge query service
#[async_trait]
pub trait ResearchService: Send + Sync {
    async fn perform_research(&self, query: &str, topics: &[String]) -> Result<ResearchInsights>;
}

/// Answers every query with nothing
pub struct NoResearch;

#[async_trait]
impl ResearchService for NoResearch {
    async fn perform_research(&self, _query: &str, _topics: &[String]) -> Result<ResearchInsights> {
        Ok(ResearchInsights {
            source: "none".to_string(),
            findings: Vec::new(),
        })
    }
}

/// Answers every query with the same insights
pub struct StaticResearch {
    insights: ResearchInsights,
}

impl StaticResearch {
    pub fn new(insights: ResearchInsights) -> Self {
        Self { insights }
    }
}

#[async_trait]
impl ResearchService for StaticResearch {
    async fn perform_research(&self, _query: &str, _topics: &[String]) -> Result<ResearchInsights> {
        Ok(self.insights.clone())
    }
}

/// Queries a SearXNG instance through its JSON API
pub struct SearxResearchService {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl SearxResearchService {
    pub fn new(base_url: &str, max_results: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build research HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
            max_results,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ResearchService for SearxResearchService {
    async fn perform_research(&self, query: &str, topics: &[String]) -> Result<ResearchInsights> {
        let full_query = if topics.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", query, topics.join(" "))
        };
        let url = format!(
            "{}?q={}&format=json",
            self.endpoint,
            urlencoding::encode(&full_query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Research request to {} failed", self.endpoint))?
            .error_for_status()
            .context("Research backend returned an error status")?;

        let body: serde_json::Value = response
            .json()
            .await
            .context("Research backend returned invalid JSON")?;

        Ok(ResearchInsights {
            source: "searxng".to_string(),
            findings: parse_searx_results(&body, self.max_results),
        })
    }
}

/// Extract findings from a SearXNG JSON response body
pub fn parse_searx_results(body: &serde_json::Value, max_results: usize) -> Vec<Finding> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|r| {
                    let title = r.get("title")?.as_str()?.trim();
                    if title.is_empty() {
                        return None;
                    }
                    Some(Finding {
                        title: title.to_string(),
                        url: r.get("url").and_then(|u| u.as_str()).map(String::from),
                        snippet: r
                            .get("content")
                            .and_then(|c| c.as_str())
                            .unwrap_or("")
                            .trim()
                            .to_string(),
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_searx_results() {
        let body = json!({
            "query": "finance agents",
            "results": [
                {"title": "Pricing engines", "url": "https://a.example", "content": " tiers "},
                {"title": "", "url": "https://skip.example"},
                {"title": "Risk models"},
                {"title": "Third", "content": "x"}
            ]
        });

        let findings = parse_searx_results(&body, 2);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].snippet, "tiers");
        assert_eq!(findings[1].title, "Risk models");
        assert_eq!(findings[1].url, None);
    }

    #[test]
    fn test_parse_without_results_key() {
        assert!(parse_searx_results(&json!({"error": "rate limited"}), 5).is_empty());
    }

    #[test]
    fn test_endpoint_normalization() {
        let service =
            SearxResearchService::new("http://localhost:8888/", 3, Duration::from_secs(1)).unwrap();
        assert_eq!(service.endpoint(), "http://localhost:8888/search");
    }

    #[tokio::test]
    async fn test_static_research_returns_insights() {
        let insights = ResearchInsights {
            source: "fixture".into(),
            findings: vec![Finding {
                title: "t".into(),
                url: None,
                snippet: "s".into(),
            }],
        };
        let service = StaticResearch::new(insights.clone());
        let got = service.perform_research("q", &[]).await.unwrap();
        assert_eq!(got, insights);

        let none = NoResearch.perform_research("q", &[]).await.unwrap();
        assert!(none.is_empty());
    }
}

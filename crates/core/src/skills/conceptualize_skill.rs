//! # Conceptualize Skill
//!
//! Deterministic conceptualizer that turns a creation request into an agent
//! concept: slug, normalized capabilities, one handler component per
//! capability, and the risks worth flagging before generation.

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::artifact_registry::{ComponentSpec, Concept};
use super::{Conceptualizer, StageContext};
use crate::state::CreationRequest;

const MAX_CAPABILITIES: usize = 12;
const MAX_RESEARCH_NOTES: usize = 5;
const FALLBACK_CAPABILITY: &str = "handle_request";

/// Kebab-case slug, e.g. `Pricing Bot` → `pricing-bot`
pub fn slugify(name: &str) -> String {
    separate(name, '-')
}

/// Snake-case identifier, e.g. `Quote Price` → `quote_price`
pub fn snake_case(name: &str) -> String {
    separate(name, '_')
}

fn separate(name: &str, sep: char) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with(sep) {
            out.push(sep);
        }
    }
    while out.ends_with(sep) {
        out.pop();
    }
    out
}

pub struct BlueprintConceptualizer;

impl BlueprintConceptualizer {
    /// Explicit capabilities first, then free-form field keys
    fn capabilities(request: &CreationRequest) -> Vec<String> {
        let source: Vec<&str> = if request.capabilities.is_empty() {
            request.fields.keys().map(String::as_str).collect()
        } else {
            request.capabilities.iter().map(String::as_str).collect()
        };

        let mut capabilities: Vec<String> = Vec::new();
        for raw in source {
            let ident = snake_case(raw);
            if !ident.is_empty() && !capabilities.contains(&ident) {
                capabilities.push(ident);
            }
        }
        capabilities
    }
}

#[async_trait]
impl Conceptualizer for BlueprintConceptualizer {
    async fn conceptualize(&self, request: &CreationRequest, ctx: &StageContext) -> Result<Concept> {
        let slug = slugify(&request.name);
        if slug.is_empty() {
            bail!("name '{}' has no usable characters for a slug", request.name);
        }

        let mut risks = Vec::new();
        let mut capabilities = Self::capabilities(request);
        if capabilities.is_empty() {
            risks.push("No capabilities declared; generated a single generic handler".to_string());
            capabilities.push(FALLBACK_CAPABILITY.to_string());
        }
        if capabilities.len() > MAX_CAPABILITIES {
            risks.push(format!(
                "{} capabilities declared; consider splitting into several agents",
                capabilities.len()
            ));
        }
        if request.description.is_none() {
            risks.push("No description provided; summary is derived from name and domain".to_string());
        }

        let mut components: Vec<ComponentSpec> = capabilities
            .iter()
            .map(|cap| ComponentSpec {
                name: format!("{}_handler", cap),
                responsibility: format!("Handle the '{}' capability", cap),
            })
            .collect();
        components.push(ComponentSpec {
            name: "router".to_string(),
            responsibility: "Dispatch incoming tasks to capability handlers".to_string(),
        });
        components.push(ComponentSpec {
            name: "config".to_string(),
            responsibility: format!("Settings for the {} domain", request.domain.trim()),
        });

        let research_notes = ctx
            .research
            .as_ref()
            .map(|insights| {
                insights
                    .findings
                    .iter()
                    .take(MAX_RESEARCH_NOTES)
                    .map(|f| {
                        if f.snippet.is_empty() {
                            f.title.clone()
                        } else {
                            format!("{}: {}", f.title, f.snippet)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let summary = match &request.description {
            Some(description) => description.trim().to_string(),
            None => format!("A {} agent named {}", request.domain.trim(), request.name.trim()),
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            slug = %slug,
            capabilities = capabilities.len(),
            "Concept drafted"
        );

        Ok(Concept {
            name: request.name.trim().to_string(),
            slug,
            domain: request.domain.trim().to_string(),
            summary,
            capabilities,
            components,
            risks,
            research_notes,
        })
    }
}

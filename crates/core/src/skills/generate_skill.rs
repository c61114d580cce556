//! # Generate Skill
//!
//! Template generator producing a small agent package from a concept:
//! a manifest, a README, the handler module and, optionally, its tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;

use super::artifact_registry::{Concept, GeneratedAgent, GeneratedFile, GenerationOptions};
use super::conceptualize_skill::snake_case;
use super::{Generator, StageContext};

pub const MANIFEST_PATH: &str = "agent.json";
pub const README_PATH: &str = "README.md";
const DEFAULT_VERSION: &str = "0.1.0";

/// Path of the generated handler module
pub fn module_path(slug: &str) -> String {
    format!("src/{}.rs", snake_case(slug))
}

/// Path of the generated test file
pub fn test_path(slug: &str) -> String {
    format!("tests/{}_test.rs", snake_case(slug))
}

/// Handler function name for a capability
pub fn handler_name(capability: &str) -> String {
    format!("handle_{}", snake_case(capability))
}

pub struct BlueprintGenerator;

impl BlueprintGenerator {
    fn manifest(concept: &Concept, options: &GenerationOptions) -> serde_json::Value {
        json!({
            "name": concept.name,
            "slug": concept.slug,
            "domain": concept.domain,
            "version": options.version.as_deref().unwrap_or(DEFAULT_VERSION),
            "author": options.author,
            "description": concept.summary,
            "entrypoint": module_path(&concept.slug),
            "capabilities": concept.capabilities,
            "components": concept.components.iter().map(|c| &c.name).collect::<Vec<_>>(),
        })
    }

    fn readme(concept: &Concept) -> String {
        let mut out = format!("# {}\n\n{}\n\n## Capabilities\n\n", concept.name, concept.summary);
        for cap in &concept.capabilities {
            let _ = writeln!(out, "- `{}`", cap);
        }
        if !concept.risks.is_empty() {
            out.push_str("\n## Known Risks\n\n");
            for risk in &concept.risks {
                let _ = writeln!(out, "- {}", risk);
            }
        }
        if !concept.research_notes.is_empty() {
            out.push_str("\n## Research Notes\n\n");
            for note in &concept.research_notes {
                let _ = writeln!(out, "- {}", note);
            }
        }
        out
    }

    fn module(concept: &Concept) -> String {
        let mut out = format!("//! {} ({} domain)\n//!\n", concept.name, concept.domain);
        for line in concept.summary.lines().map(str::trim_end) {
            if line.is_empty() {
                out.push_str("//!\n");
            } else {
                let _ = writeln!(out, "//! {}", line);
            }
        }
        out.push('\n');
        for cap in &concept.capabilities {
            let _ = writeln!(
                out,
                "pub fn {}(input: &str) -> String {{\n    format!(\"{}: {{}}\", input)\n}}\n",
                handler_name(cap),
                cap
            );
        }
        out.push_str("pub fn route(capability: &str, input: &str) -> Option<String> {\n");
        out.push_str("    match capability {\n");
        for cap in &concept.capabilities {
            let _ = writeln!(
                out,
                "        \"{}\" => Some({}(input)),",
                cap,
                handler_name(cap)
            );
        }
        out.push_str("        _ => None,\n    }\n}\n");
        out
    }

    fn tests(concept: &Concept) -> String {
        let crate_name = snake_case(&concept.slug);
        let mut out = format!("use {}::route;\n\n", crate_name);
        for cap in &concept.capabilities {
            let _ = writeln!(
                out,
                "#[test]\nfn routes_{}() {{\n    assert!(route(\"{}\", \"ping\").is_some());\n}}\n",
                snake_case(cap),
                cap
            );
        }
        out.push_str(
            "#[test]\nfn unknown_capability_is_rejected() {\n    assert!(route(\"unknown\", \"ping\").is_none());\n}\n",
        );
        out
    }
}

#[async_trait]
impl Generator for BlueprintGenerator {
    async fn generate(
        &self,
        concept: &Concept,
        options: &GenerationOptions,
        ctx: &StageContext,
    ) -> Result<GeneratedAgent> {
        if concept.capabilities.is_empty() {
            bail!("concept '{}' has no capabilities to generate", concept.slug);
        }

        let manifest = Self::manifest(concept, options);
        let mut files = vec![
            GeneratedFile {
                path: MANIFEST_PATH.to_string(),
                contents: serde_json::to_string_pretty(&manifest)?,
            },
            GeneratedFile {
                path: README_PATH.to_string(),
                contents: Self::readme(concept),
            },
            GeneratedFile {
                path: module_path(&concept.slug),
                contents: Self::module(concept),
            },
        ];
        if options.include_tests {
            files.push(GeneratedFile {
                path: test_path(&concept.slug),
                contents: Self::tests(concept),
            });
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            files = files.len(),
            "Agent package generated"
        );

        Ok(GeneratedAgent {
            name: concept.name.clone(),
            slug: concept.slug.clone(),
            manifest,
            files,
        })
    }
}

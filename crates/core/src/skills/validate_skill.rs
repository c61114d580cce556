//! # Validate Skill
//!
//! Structural checks over a generated agent package. Every check runs and
//! is reported; the report passes only when all checks pass.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::artifact_registry::{
    Concept, GeneratedAgent, GenerationOptions, ValidationCheck, ValidationReport,
};
use super::generate_skill::{handler_name, module_path, test_path, MANIFEST_PATH};
use super::Validator;

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid slug regex"))
}

pub struct BlueprintValidator;

impl BlueprintValidator {
    fn manifest_name(concept: &Concept, agent: &GeneratedAgent) -> ValidationCheck {
        const NAME: &str = "manifest_name";
        if agent.file(MANIFEST_PATH).is_none() {
            return ValidationCheck::fail(NAME, format!("{} is missing", MANIFEST_PATH));
        }
        match agent.manifest.get("name").and_then(|n| n.as_str()) {
            Some(name) if name == concept.name => ValidationCheck::pass(NAME, name),
            Some(name) => ValidationCheck::fail(
                NAME,
                format!("manifest names '{}', concept names '{}'", name, concept.name),
            ),
            None => ValidationCheck::fail(NAME, "manifest has no name"),
        }
    }

    fn slug_format(agent: &GeneratedAgent) -> ValidationCheck {
        if slug_pattern().is_match(&agent.slug) {
            ValidationCheck::pass("slug_format", &agent.slug)
        } else {
            ValidationCheck::fail("slug_format", format!("'{}' is not kebab-case", agent.slug))
        }
    }

    fn non_empty_files(agent: &GeneratedAgent) -> ValidationCheck {
        let empty: Vec<&str> = agent
            .files
            .iter()
            .filter(|f| f.contents.trim().is_empty())
            .map(|f| f.path.as_str())
            .collect();
        if agent.files.is_empty() {
            ValidationCheck::fail("non_empty_files", "package has no files")
        } else if empty.is_empty() {
            ValidationCheck::pass("non_empty_files", format!("{} files", agent.files.len()))
        } else {
            ValidationCheck::fail("non_empty_files", format!("empty: {}", empty.join(", ")))
        }
    }

    fn unique_paths(agent: &GeneratedAgent) -> ValidationCheck {
        let mut seen = HashSet::new();
        let duplicates: Vec<&str> = agent
            .files
            .iter()
            .filter(|f| !seen.insert(f.path.as_str()))
            .map(|f| f.path.as_str())
            .collect();
        if duplicates.is_empty() {
            ValidationCheck::pass("unique_paths", "no duplicate paths")
        } else {
            ValidationCheck::fail("unique_paths", format!("duplicated: {}", duplicates.join(", ")))
        }
    }

    fn capability_handlers(concept: &Concept, agent: &GeneratedAgent) -> ValidationCheck {
        const NAME: &str = "capability_handlers";
        let path = module_path(&agent.slug);
        let Some(module) = agent.file(&path) else {
            return ValidationCheck::fail(NAME, format!("{} is missing", path));
        };
        let missing: Vec<String> = concept
            .capabilities
            .iter()
            .map(|c| handler_name(c))
            .filter(|h| !module.contents.contains(&format!("fn {}(", h)))
            .collect();
        if missing.is_empty() {
            ValidationCheck::pass(NAME, format!("{} handlers", concept.capabilities.len()))
        } else {
            ValidationCheck::fail(NAME, format!("missing: {}", missing.join(", ")))
        }
    }

    fn tests_present(agent: &GeneratedAgent, options: &GenerationOptions) -> ValidationCheck {
        const NAME: &str = "tests_present";
        if !options.include_tests {
            return ValidationCheck::pass(NAME, "tests not requested");
        }
        let path = test_path(&agent.slug);
        if agent.file(&path).is_some() {
            ValidationCheck::pass(NAME, path)
        } else {
            ValidationCheck::fail(NAME, format!("{} is missing", path))
        }
    }
}

#[async_trait]
impl Validator for BlueprintValidator {
    async fn validate(
        &self,
        concept: &Concept,
        agent: &GeneratedAgent,
        options: &GenerationOptions,
    ) -> Result<ValidationReport> {
        let report = ValidationReport::from_checks(vec![
            Self::manifest_name(concept, agent),
            Self::slug_format(agent),
            Self::non_empty_files(agent),
            Self::unique_paths(agent),
            Self::capability_handlers(concept, agent),
            Self::tests_present(agent, options),
        ]);
        if !report.passed {
            tracing::debug!(
                slug = %agent.slug,
                failed = report.failures().len(),
                "Validation found problems"
            );
        }
        Ok(report)
    }
}

//! Output quality scoring
//!
//! Scores candidate outputs 0-100 with additive penalties: a syntactic
//! pass checks artifact-specific structure, a semantic pass checks the
//! output actually talks about what the request asked for. No single
//! finding rejects an output on its own; the score floors at 0 and the
//! pass verdict compares against the policy's threshold.

mod semantic;
mod syntactic;

use crate::policy::ArtifactKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Penalty magnitudes and the keyword coverage floor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Deducted per missing structural expectation
    pub structural_penalty: u8,
    /// Deducted when keyword coverage falls below the floor
    pub keyword_penalty: u8,
    /// Deducted for generic boilerplate with no request-specific terms
    pub placeholder_penalty: u8,
    /// Minimum fraction of intent keywords the output must contain
    pub min_keyword_coverage: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            structural_penalty: 15,
            keyword_penalty: 50,
            placeholder_penalty: 25,
            min_keyword_coverage: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One triggered penalty, named for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub score: u8,
    pub findings: Vec<Finding>,
    pub pass: bool,
}

/// Scores one output against one request intent.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Score `output` for `kind`, passing iff the score clears `pass_threshold`.
    ///
    /// `intent` is the request's free-text instruction; its salient keywords
    /// drive the semantic pass.
    pub fn validate(
        &self,
        kind: ArtifactKind,
        output: &str,
        intent: &str,
        pass_threshold: u8,
    ) -> ValidationResult {
        let mut findings = Vec::new();
        let mut penalty: u32 = 0;

        for miss in syntactic::check(kind, output) {
            penalty += u32::from(self.config.structural_penalty);
            findings.push(Finding::warning(miss));
        }

        let keywords = semantic::extract_keywords(intent);
        let matched = semantic::matched(&keywords, output);

        if !keywords.is_empty() {
            let coverage = matched as f32 / keywords.len() as f32;
            if coverage < self.config.min_keyword_coverage {
                penalty += u32::from(self.config.keyword_penalty);
                findings.push(Finding::error(format!(
                    "only {} of {} intent keywords present in output",
                    matched,
                    keywords.len()
                )));
            }
        }

        if matched == 0 && semantic::contains_placeholder(kind, output) {
            penalty += u32::from(self.config.placeholder_penalty);
            findings.push(Finding::warning(
                "generic placeholder content with no request-specific terms",
            ));
        }

        let score = 100u32.saturating_sub(penalty) as u8;
        let pass = score >= pass_threshold;

        debug!(
            artifact = %kind,
            score,
            pass,
            findings = findings.len(),
            "output validated"
        );

        ValidationResult {
            score,
            findings,
            pass,
        }
    }
}

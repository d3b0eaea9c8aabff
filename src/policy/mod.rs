//! Artifact policies and the candidate selector
//!
//! A policy is data, not code: for each artifact kind it lists the local and
//! remote candidates in priority order plus the two quality bars. The table
//! is built once at startup and never changes afterwards.

use crate::backend::BackendCandidate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("no policy registered for artifact type '{0}'")]
    UnknownArtifactType(ArtifactKind),

    #[error("unknown artifact type '{0}'")]
    UnknownArtifactName(String),

    #[error("duplicate policy for artifact type '{0}'")]
    DuplicatePolicy(ArtifactKind),

    #[error("policy for '{artifact}' sets capture threshold {capture} below pass threshold {pass}")]
    ThresholdOrder {
        artifact: ArtifactKind,
        pass: u8,
        capture: u8,
    },

    #[error("policy for '{artifact}' sets a threshold above 100")]
    ThresholdRange { artifact: ArtifactKind },
}

/// The closed set of artifact types this system generates.
///
/// Validation rules, placeholder-term lists and system lines are resolved
/// per variant by `match`, never by open-ended string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Entity-relationship diagram (Mermaid erDiagram)
    Erd,
    /// Process flowchart (Mermaid flowchart)
    Flowchart,
    /// Single source file
    Code,
    /// Task ticket with summary and acceptance criteria
    Jira,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Erd,
        ArtifactKind::Flowchart,
        ArtifactKind::Code,
        ArtifactKind::Jira,
    ];

    /// One-line system instruction handed to every backend for this kind.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            ArtifactKind::Erd => {
                "You produce Mermaid erDiagram definitions. Output only the diagram, no prose."
            }
            ArtifactKind::Flowchart => {
                "You produce Mermaid flowchart definitions. Output only the diagram, no prose."
            }
            ArtifactKind::Code => {
                "You write one self-contained source file implementing the request. Output only code."
            }
            ArtifactKind::Jira => {
                "You write one task ticket with Summary, Description and Acceptance Criteria sections."
            }
        }
    }

    /// Boilerplate terms that signal a generic template answer when none of
    /// the request's own keywords made it into the output.
    pub fn placeholder_terms(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Erd => &["user", "order", "customer", "product", "item", "entity"],
            ArtifactKind::Flowchart => &["start", "process", "decision", "step", "end"],
            ArtifactKind::Code => &["foo", "bar", "baz", "example", "placeholder", "todo"],
            ArtifactKind::Jira => &["lorem", "ipsum", "as a user", "something", "tbd"],
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Erd => write!(f, "erd"),
            ArtifactKind::Flowchart => write!(f, "flowchart"),
            ArtifactKind::Code => write!(f, "code"),
            ArtifactKind::Jira => write!(f, "jira"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "erd" => Ok(ArtifactKind::Erd),
            "flowchart" => Ok(ArtifactKind::Flowchart),
            "code" => Ok(ArtifactKind::Code),
            "jira" => Ok(ArtifactKind::Jira),
            other => Err(PolicyError::UnknownArtifactName(other.to_string())),
        }
    }
}

/// Routing and quality configuration for one artifact kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    pub artifact: ArtifactKind,

    /// Local candidates in priority order
    pub local: Vec<BackendCandidate>,

    /// Remote candidates in priority order
    pub remote: Vec<BackendCandidate>,

    /// Minimum validation score to accept an output (0-100)
    pub pass_threshold: u8,

    /// Minimum score for a remote output to be captured for fine-tuning;
    /// always >= the pass threshold
    pub capture_threshold: u8,

    /// Cap on executor invocations in the local tier
    pub max_local_attempts: usize,

    /// Cap on executor invocations in the remote tier
    pub max_remote_attempts: usize,
}

impl ArtifactPolicy {
    fn validate(&self) -> Result<(), PolicyError> {
        if self.pass_threshold > 100 || self.capture_threshold > 100 {
            return Err(PolicyError::ThresholdRange {
                artifact: self.artifact,
            });
        }
        if self.capture_threshold < self.pass_threshold {
            return Err(PolicyError::ThresholdOrder {
                artifact: self.artifact,
                pass: self.pass_threshold,
                capture: self.capture_threshold,
            });
        }
        Ok(())
    }
}

/// Immutable lookup table from artifact kind to policy.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<ArtifactKind, ArtifactPolicy>,
}

impl PolicyTable {
    /// Build the table, rejecting duplicate registrations and inconsistent
    /// thresholds up front.
    pub fn new(policies: Vec<ArtifactPolicy>) -> Result<Self, PolicyError> {
        let mut table = HashMap::with_capacity(policies.len());
        for policy in policies {
            policy.validate()?;
            if table.insert(policy.artifact, policy.clone()).is_some() {
                return Err(PolicyError::DuplicatePolicy(policy.artifact));
            }
        }
        Ok(Self { policies: table })
    }

    /// Pure lookup. Unregistered kinds fail loudly; there is no default
    /// policy to fall back to.
    pub fn policy_for(&self, kind: ArtifactKind) -> Result<&ArtifactPolicy, PolicyError> {
        self.policies
            .get(&kind)
            .ok_or(PolicyError::UnknownArtifactType(kind))
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds: Vec<_> = self.policies.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendTier, CostClass};

    fn candidate(id: &str, tier: BackendTier) -> BackendCandidate {
        BackendCandidate {
            id: id.to_string(),
            tier,
            model: format!("{id}-model"),
            max_input_tokens: 4096,
            cost: CostClass::Budget,
        }
    }

    fn erd_policy() -> ArtifactPolicy {
        ArtifactPolicy {
            artifact: ArtifactKind::Erd,
            local: vec![candidate("local-a", BackendTier::Local)],
            remote: vec![candidate("remote-a", BackendTier::Remote)],
            pass_threshold: 70,
            capture_threshold: 85,
            max_local_attempts: 2,
            max_remote_attempts: 2,
        }
    }

    #[test]
    fn test_policy_lookup_is_idempotent() {
        let table = PolicyTable::new(vec![erd_policy()]).unwrap();

        let first = table.policy_for(ArtifactKind::Erd).unwrap().clone();
        let second = table.policy_for(ArtifactKind::Erd).unwrap().clone();

        assert_eq!(first, second);
    }

    #[test]
    fn test_unregistered_kind_fails_loudly() {
        let table = PolicyTable::new(vec![erd_policy()]).unwrap();

        assert_eq!(
            table.policy_for(ArtifactKind::Jira),
            Err(PolicyError::UnknownArtifactType(ArtifactKind::Jira))
        );
    }

    #[test]
    fn test_duplicate_policy_rejected() {
        let result = PolicyTable::new(vec![erd_policy(), erd_policy()]);
        assert_eq!(result.err(), Some(PolicyError::DuplicatePolicy(ArtifactKind::Erd)));
    }

    #[test]
    fn test_capture_bar_must_not_undercut_pass_bar() {
        let mut policy = erd_policy();
        policy.capture_threshold = 50;

        let result = PolicyTable::new(vec![policy]);
        assert!(matches!(result, Err(PolicyError::ThresholdOrder { .. })));
    }

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in ArtifactKind::ALL {
            assert_eq!(kind.to_string().parse::<ArtifactKind>().unwrap(), kind);
        }
        assert!(matches!(
            "gantt".parse::<ArtifactKind>(),
            Err(PolicyError::UnknownArtifactName(_))
        ));
    }
}

//! Generation request structures

use crate::policy::ArtifactKind;
use serde::{Deserialize, Serialize};

/// A request to generate one artifact.
///
/// Immutable once built: the orchestrator never mutates a request, and the
/// remote-only escalation switch is carried here per request rather than in
/// any shared session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Which artifact to generate
    pub artifact: ArtifactKind,

    /// Free-text instruction describing the desired artifact
    pub instruction: String,

    /// Context segments, pre-ranked by the caller (highest relevance first)
    pub context: Vec<ContextSegment>,

    /// Skip the local tier entirely and go straight to remote candidates
    #[serde(default)]
    pub force_remote: bool,
}

/// A piece of retrieved or supplied context.
///
/// Segments arrive already ranked; the orchestrator compresses but never
/// re-orders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSegment {
    pub name: String,
    pub text: String,
    /// Relevance score assigned by the retrieval layer (0.0 - 1.0)
    pub relevance: f32,
    pub origin: SegmentOrigin,
}

/// Where a context segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentOrigin {
    /// Semantic/keyword search over the document corpus
    Retrieval,
    /// Structural dependency-graph analyzer
    DependencyGraph,
    /// Code pattern detector
    PatternDetector,
    /// Supplied directly by the caller
    User,
}

impl ContextSegment {
    pub fn new(name: impl Into<String>, text: impl Into<String>, relevance: f32) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            relevance,
            origin: SegmentOrigin::User,
        }
    }

    pub fn with_origin(mut self, origin: SegmentOrigin) -> Self {
        self.origin = origin;
        self
    }
}

impl GenerationRequest {
    pub fn new(artifact: ArtifactKind, instruction: impl Into<String>) -> Self {
        Self {
            artifact,
            instruction: instruction.into(),
            context: Vec::new(),
            force_remote: false,
        }
    }

    pub fn with_context(mut self, context: Vec<ContextSegment>) -> Self {
        self.context = context;
        self
    }

    pub fn with_segment(mut self, segment: ContextSegment) -> Self {
        self.context.push(segment);
        self
    }

    /// Request remote candidates only, skipping the local tier
    pub fn force_remote(mut self) -> Self {
        self.force_remote = true;
        self
    }

    /// Assemble the prompt sent to a backend from this request and an
    /// already-compressed context bundle.
    pub fn render_prompt(&self, bundle: &[ContextSegment]) -> String {
        let mut prompt = String::new();

        if !bundle.is_empty() {
            prompt.push_str("Context:\n");
            for segment in bundle {
                prompt.push_str(&format!(
                    "### {}\n```\n{}\n```\n\n",
                    segment.name, segment.text
                ));
            }
        }

        prompt.push_str(&format!("Task: {}", self.instruction));
        prompt
    }

    /// Short form of the instruction for logs and capture records
    pub fn summary(&self, max_len: usize) -> String {
        if self.instruction.len() > max_len {
            let cut = floor_char_boundary(&self.instruction, max_len);
            format!("{}...", &self.instruction[..cut])
        } else {
            self.instruction.clone()
        }
    }
}

/// Largest index <= `max` that falls on a char boundary of `s`.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

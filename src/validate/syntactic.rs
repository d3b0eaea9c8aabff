//! Structural expectations per artifact kind
//!
//! Each check is a cheap line-level scan; a miss is reported by name and
//! penalized by the caller. Checks never reject an output outright.

use crate::policy::ArtifactKind;

/// Names of the structural expectations `output` fails to meet.
pub(super) fn check(kind: ArtifactKind, output: &str) -> Vec<String> {
    match kind {
        ArtifactKind::Erd => check_erd(output),
        ArtifactKind::Flowchart => check_flowchart(output),
        ArtifactKind::Code => check_code(output),
        ArtifactKind::Jira => check_jira(output),
    }
}

fn check_erd(output: &str) -> Vec<String> {
    let mut misses = Vec::new();

    let mut has_declaration = false;
    let mut entities = 0usize;
    let mut has_attribute = false;
    let mut has_relationship = false;
    let mut in_block = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("erDiagram") {
            has_declaration = true;
        } else if in_block {
            if trimmed == "}" {
                in_block = false;
            } else if !trimmed.is_empty() {
                has_attribute = true;
            }
        } else if trimmed.ends_with('{') {
            entities += 1;
            in_block = true;
        } else if trimmed.contains("--") {
            has_relationship = true;
        }
    }

    if !has_declaration {
        misses.push("missing erDiagram declaration".to_string());
    }
    if entities < 2 {
        misses.push(format!("only {entities} entities defined, expected at least 2"));
    }
    if !has_attribute {
        misses.push("no entity declares any attributes".to_string());
    }
    if !has_relationship {
        misses.push("no relationships between entities".to_string());
    }

    misses
}

fn check_flowchart(output: &str) -> Vec<String> {
    let mut misses = Vec::new();

    let has_declaration = output.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with("flowchart") || trimmed.starts_with("graph")
    });
    if !has_declaration {
        misses.push("missing flowchart declaration".to_string());
    }

    let nodes = output.matches('[').count();
    if nodes < 2 {
        misses.push(format!("only {nodes} nodes defined, expected at least 2"));
    }

    if !output.contains("-->") {
        misses.push("no edges between nodes".to_string());
    }

    misses
}

const CODE_DECLARATIONS: &[&str] = &[
    "fn ", "pub ", "class ", "def ", "function ", "struct ", "enum ", "impl ", "interface ",
    "public ", "static ", "void ", "const ",
];

fn check_code(output: &str) -> Vec<String> {
    let mut misses = Vec::new();

    let has_declaration = output.lines().any(|line| {
        let trimmed = line.trim_start();
        CODE_DECLARATIONS
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
    });
    if !has_declaration {
        misses.push("no top-level declaration found".to_string());
    }

    let body_lines = output.lines().filter(|l| !l.trim().is_empty()).count();
    if body_lines < 5 {
        misses.push(format!(
            "only {body_lines} non-empty lines, implausibly short for a source file"
        ));
    }

    let opens = output.matches('{').count();
    let closes = output.matches('}').count();
    if opens != closes {
        misses.push(format!("unbalanced braces ({opens} open, {closes} close)"));
    }

    misses
}

fn check_jira(output: &str) -> Vec<String> {
    let mut misses = Vec::new();
    let lowered = output.to_lowercase();

    for section in ["summary", "description", "acceptance criteria"] {
        if !lowered.contains(section) {
            misses.push(format!("missing '{section}' section"));
        }
    }

    let has_list_item = output.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed
                .split_once('.')
                .is_some_and(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
    });
    if !has_list_item {
        misses.push("no list items in acceptance criteria".to_string());
    }

    misses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_erd_has_no_misses() {
        let output = "\
erDiagram
    ACCOUNT {
        int id
    }
    INVOICE {
        int id
    }
    ACCOUNT ||--o{ INVOICE : receives
";
        assert!(check(ArtifactKind::Erd, output).is_empty());
    }

    #[test]
    fn test_erd_without_relationships() {
        let output = "\
erDiagram
    ACCOUNT {
        int id
    }
    INVOICE {
        int id
    }
";
        let misses = check(ArtifactKind::Erd, output);
        assert_eq!(misses.len(), 1);
        assert!(misses[0].contains("relationships"));
    }

    #[test]
    fn test_garbage_misses_every_erd_expectation() {
        assert_eq!(check(ArtifactKind::Erd, "todo").len(), 4);
    }

    #[test]
    fn test_complete_flowchart() {
        let output = "\
flowchart TD
    A[Receive request] --> B{Valid?}
    B --> C[Process]
    C --> D[Done]
";
        assert!(check(ArtifactKind::Flowchart, output).is_empty());
    }

    #[test]
    fn test_flowchart_without_edges() {
        let output = "\
flowchart TD
    A[Start]
    B[End]
";
        let misses = check(ArtifactKind::Flowchart, output);
        assert_eq!(misses.len(), 1);
        assert!(misses[0].contains("edges"));
    }

    #[test]
    fn test_code_with_declaration_and_body() {
        let output = "\
pub fn add(a: i32, b: i32) -> i32 {
    let sum = a + b;
    sum
}

fn main() {
    println!(\"{}\", add(1, 2));
}
";
        assert!(check(ArtifactKind::Code, output).is_empty());
    }

    #[test]
    fn test_code_unbalanced_braces_flagged() {
        let output = "\
fn incomplete() {
    let x = 1;
    if x > 0 {
        do_thing();
";
        let misses = check(ArtifactKind::Code, output);
        assert!(misses.iter().any(|m| m.contains("unbalanced")));
    }

    #[test]
    fn test_jira_sections_and_list_items() {
        let output = "\
Summary: swap flow broken

Description: customers cannot request a swap.

Acceptance Criteria:
- a swap request can be opened
- the requester is notified
";
        assert!(check(ArtifactKind::Jira, output).is_empty());
    }

    #[test]
    fn test_jira_missing_sections() {
        let misses = check(ArtifactKind::Jira, "fix the thing");
        assert_eq!(misses.len(), 4);
    }
}

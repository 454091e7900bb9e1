//! Trigger matching and evaluation.

use tollgate_core::events::TriggerEvent;
use tollgate_core::pipeline::TriggerSpec;

/// Decides whether an event satisfies a pipeline's trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// True iff the event kind is declared and the branch matches at least
    /// one of its patterns. An empty pattern set never matches.
    pub fn matches(&self, event: &TriggerEvent, spec: &TriggerSpec) -> bool {
        match spec.patterns(event.kind) {
            Some(patterns) => self.branch_matches(patterns, &event.branch),
            None => false,
        }
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        patterns.iter().any(|p| glob_match(p, branch))
    }
}

/// Branch pattern matching: `*` and `**` match anything, `prefix/**` any
/// depth below `prefix`, `prefix/*` exactly one segment below it, and a
/// single `*` elsewhere matches any run of characters. Everything else is
/// compared exactly.
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return text
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|segment| !segment.is_empty() && !segment.contains('/'));
    }
    if let Some((head, tail)) = pattern.split_once('*') {
        if !tail.contains('*') {
            return text.len() >= head.len() + tail.len()
                && text.starts_with(head)
                && text.ends_with(tail);
        }
    }
    pattern == text
}

//! Trigger matching and evaluation.

use trellis_core::context::{EventKind, RunContext};
use trellis_core::pipeline::{TriggerConfig, TriggerType, WorkflowDefinition};

/// Matcher for determining if a workflow should be triggered.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a workflow should be triggered by the run context.
    pub fn matches(&self, workflow: &WorkflowDefinition, ctx: &RunContext) -> bool {
        if workflow.triggers.is_empty() {
            return true;
        }

        let Some(trigger_type) = self.trigger_type(&ctx.event_kind()) else {
            return false;
        };

        workflow
            .triggers
            .iter()
            .any(|trigger| self.trigger_matches(trigger, trigger_type, &ctx.branch))
    }

    fn trigger_type(&self, event: &EventKind) -> Option<TriggerType> {
        match event {
            EventKind::Push => Some(TriggerType::Push),
            EventKind::PullRequest => Some(TriggerType::PullRequest),
            EventKind::Schedule => Some(TriggerType::Schedule),
            EventKind::Manual => Some(TriggerType::Manual),
            EventKind::Other(_) => None,
        }
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, trigger_type: TriggerType, branch: &str) -> bool {
        trigger.trigger_type == trigger_type && self.branch_matches(&trigger.branches, branch)
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text == prefix || text.starts_with(&format!("{}/", prefix));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let prefix_slash = format!("{}/", prefix);
            if let Some(rest) = text.strip_prefix(&prefix_slash) {
                return !rest.contains('/');
            }
            return false;
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
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

//! `${{ ... }}` substitution in step command templates.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use trellis_core::run::JobDescriptor;
use trellis_core::secrets::Secrets;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("expression pattern is valid")
});

/// Values visible to a command template.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Matrix fields of the job, rendered.
    pub matrix: BTreeMap<String, String>,
    /// Resolved job environment.
    pub env: BTreeMap<String, String>,
    pub flags: BTreeMap<String, bool>,
    /// Only populated for actions that receive secrets.
    pub secrets: Secrets,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_job(job: &JobDescriptor) -> Self {
        Self {
            matrix: job
                .values
                .keys()
                .filter_map(|k| job.value_str(k).map(|v| (k.clone(), v)))
                .collect(),
            env: job.env.clone(),
            flags: job.flags.clone(),
            secrets: Secrets::new(),
        }
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    /// Interpolate expressions in a string.
    ///
    /// Supports:
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ env.VAR }}` - resolved job variable
    /// - `${{ flags.NAME }}` - `1` or `0`
    /// - `${{ secrets.NAME }}` - secret value, when provided
    ///
    /// Unknown expressions expand to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .into_owned()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self.env.get(var_name).cloned().unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if let Some(flag) = expr.strip_prefix("flags.") {
            let on = self.flags.get(flag).copied().unwrap_or(false);
            return if on { "1" } else { "0" }.to_string();
        }

        if let Some(name) = expr.strip_prefix("secrets.") {
            return self.secrets.get(name).unwrap_or_default().to_string();
        }

        String::new()
    }
}

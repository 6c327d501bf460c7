//! Feature flags derived from a job's free-text option string.
//!
//! The option string is one matrix field (e.g. `options: "COVERAGE BUILD_DOCS"`).
//! Only names in a closed, explicit set are recognized; any other token is
//! ignored so that older runners keep working with newer workflow files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Built-in flags understood by the default steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Coverage,
    BuildDocs,
    DeployDocs,
    UsePre,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Coverage, Flag::BuildDocs, Flag::DeployDocs, Flag::UsePre];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Coverage => "COVERAGE",
            Flag::BuildDocs => "BUILD_DOCS",
            Flag::DeployDocs => "DEPLOY_DOCS",
            Flag::UsePre => "USE_PRE",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parser over a fixed set of recognized flag names.
#[derive(Debug, Clone)]
pub struct FlagParser {
    known: BTreeSet<String>,
}

impl FlagParser {
    /// Parser recognizing exactly `known`.
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    /// Parser recognizing the built-in flags plus `extra`.
    pub fn with_builtin<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parser = Self::new(Flag::ALL.iter().map(Flag::as_str));
        parser.known.extend(extra.into_iter().map(Into::into));
        parser
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    pub fn parse(&self, options: Option<&str>) -> BTreeMap<String, bool> {
        parse(options, &self.known)
    }
}

impl Default for FlagParser {
    fn default() -> Self {
        Self::with_builtin(std::iter::empty::<String>())
    }
}

/// Map every known flag to whether it appears as a whitespace-delimited
/// token of `options`. Matching is case-sensitive.
pub fn parse(options: Option<&str>, known: &BTreeSet<String>) -> BTreeMap<String, bool> {
    let tokens: BTreeSet<&str> = options
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    known
        .iter()
        .map(|flag| (flag.clone(), tokens.contains(flag.as_str())))
        .collect()
}

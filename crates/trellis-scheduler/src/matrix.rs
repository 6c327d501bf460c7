//! Matrix expansion for parallel job generation.

use indexmap::IndexMap;
use trellis_core::error::{Error, Result};
use trellis_core::pipeline::{MatrixConfig, MatrixEntry, MatrixValue};
use trellis_core::run::{JobDescriptor, render_value};
use tracing::debug;

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub workflow: String,
    pub jobs: Vec<JobDescriptor>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a matrix into its ordered job list.
    ///
    /// The Cartesian product runs in axis declaration order with the
    /// leftmost axis varying slowest. Excludes are removed from the
    /// product, then each include is merged into the product jobs that
    /// match its axis values, or appended as a job of its own when none
    /// match.
    pub fn expand(&self, matrix: &MatrixConfig, workflow: &str) -> Result<MatrixExpansion> {
        self.validate(matrix)?;

        let mut combinations = self.generate_combinations(&matrix.axes);

        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(combo, exclude))
        });

        // Only product jobs are merge targets; appended includes are not.
        let product_len = if matrix.axes.is_empty() { 0 } else { combinations.len() };
        if matrix.axes.is_empty() {
            combinations.clear();
        }

        for include in &matrix.include {
            let (axis_fields, extra_fields) = self.split_include(&matrix.axes, include);
            let mut merged = false;

            for combo in combinations.iter_mut().take(product_len) {
                if axis_fields.iter().all(|(k, v)| combo.get(*k) == Some(*v)) {
                    for (key, value) in &extra_fields {
                        combo.insert((*key).clone(), (*value).clone());
                    }
                    merged = true;
                }
            }

            if !merged {
                combinations.push(include.clone());
            }
        }

        if matrix.axes.is_empty() && matrix.include.is_empty() {
            combinations.push(MatrixEntry::new());
        }

        if combinations.is_empty() {
            return Err(Error::InvalidMatrix(
                "matrix expands to zero jobs".to_string(),
            ));
        }

        let jobs: Vec<JobDescriptor> = combinations
            .into_iter()
            .enumerate()
            .map(|(idx, values)| {
                let display_name = self.format_display_name(workflow, &values);
                JobDescriptor::new(idx, display_name, values)
            })
            .collect();

        debug!(workflow, jobs = jobs.len(), "Expanded matrix");

        Ok(MatrixExpansion {
            workflow: workflow.to_string(),
            jobs,
            fail_fast: matrix.fail_fast,
            max_parallel: matrix.max_parallel,
        })
    }

    fn validate(&self, matrix: &MatrixConfig) -> Result<()> {
        for (axis, values) in &matrix.axes {
            if values.is_empty() {
                return Err(Error::InvalidMatrix(format!("axis '{}' has no values", axis)));
            }
            for (i, value) in values.iter().enumerate() {
                if values[..i].contains(value) {
                    return Err(Error::DuplicateAxisValue {
                        axis: axis.clone(),
                        value: render_value(value),
                    });
                }
            }
        }

        for exclude in &matrix.exclude {
            if let Some(unknown) = exclude.keys().find(|k| !matrix.axes.contains_key(*k)) {
                return Err(Error::InvalidMatrix(format!(
                    "exclude names unknown axis '{}'",
                    unknown
                )));
            }
        }

        if matrix.strict_includes {
            let entries = matrix
                .include
                .iter()
                .map(|e| ("include", e))
                .chain(matrix.exclude.iter().map(|e| ("exclude", e)));
            for (kind, entry) in entries {
                for (axis, value) in entry {
                    if let Some(declared) = matrix.axes.get(axis) {
                        if !declared.contains(value) {
                            return Err(Error::UnknownAxisValue {
                                entry: kind.to_string(),
                                axis: axis.clone(),
                                value: render_value(value),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn generate_combinations(&self, axes: &IndexMap<String, Vec<MatrixValue>>) -> Vec<MatrixEntry> {
        let mut result = vec![MatrixEntry::new()];

        for (key, values) in axes {
            let mut new_result = Vec::with_capacity(result.len() * values.len());

            for combo in result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(key.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn split_include<'a>(
        &self,
        axes: &IndexMap<String, Vec<MatrixValue>>,
        include: &'a MatrixEntry,
    ) -> (Vec<(&'a String, &'a MatrixValue)>, Vec<(&'a String, &'a MatrixValue)>) {
        include.iter().partition(|(k, _)| axes.contains_key(*k))
    }

    fn matches_exclude(&self, combo: &MatrixEntry, exclude: &MatrixEntry) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(&self, workflow: &str, values: &MatrixEntry) -> String {
        if values.is_empty() {
            return workflow.to_string();
        }

        let parts: Vec<String> = values
            .iter()
            .map(|(k, v)| format!("{}={}", k, render_value(v)))
            .collect();

        format!("{} ({})", workflow, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

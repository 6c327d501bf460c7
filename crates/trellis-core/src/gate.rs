//! Declarative step gates and their evaluation.
//!
//! Each step of a job carries one [`Gate`]. A gate that does not hold skips
//! the step; a skip is never a failure and never influences the gates of
//! sibling steps except through `prior_succeeded`, which only looks for
//! failed steps.

use crate::context::{EventKind, RunContext, effective_os};
use crate::flags::Flag;
use crate::pipeline::WorkflowDefinition;
use crate::run::{JobDescriptor, StepKind, StepRecord, StepResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Gate {
    Always,
    /// Effective job OS equals `os` exactly.
    OsEquals { os: String },
    /// Effective job OS starts with `prefix`.
    OsPrefix { prefix: String },
    Event {
        #[schemars(with = "String")]
        event: EventKind,
    },
    /// Run branch equals the workflow's deploy branch.
    DeployBranch,
    /// A derived flag is set for the job.
    Flag { flag: String },
    /// None of `steps` failed; an empty list means every earlier step.
    PriorSucceeded {
        #[serde(default)]
        steps: Vec<StepKind>,
    },
    /// Every gate holds, checked left to right.
    All { gates: Vec<Gate> },
}

impl Gate {
    pub fn prior_succeeded() -> Self {
        Gate::PriorSucceeded { steps: Vec::new() }
    }

    /// Deploy only from a push to the deploy branch, on a Linux runner,
    /// for jobs that asked for it, after everything before succeeded.
    pub fn default_deploy() -> Self {
        Gate::All {
            gates: vec![
                Gate::OsPrefix {
                    prefix: "ubuntu".to_string(),
                },
                Gate::Event {
                    event: EventKind::Push,
                },
                Gate::DeployBranch,
                Gate::Flag {
                    flag: Flag::DeployDocs.as_str().to_string(),
                },
                Gate::prior_succeeded(),
            ],
        }
    }
}

/// One entry of a job's step plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub kind: StepKind,
    pub gate: Gate,
    pub timeout_minutes: u32,
}

impl StepDescriptor {
    /// The fixed five-step plan with default gates.
    pub fn defaults(timeout_minutes: u32) -> Vec<StepDescriptor> {
        StepKind::ORDER
            .iter()
            .map(|&kind| StepDescriptor {
                kind,
                gate: default_gate(kind),
                timeout_minutes,
            })
            .collect()
    }

    /// The fixed plan with the workflow's per-step overrides applied.
    pub fn for_workflow(definition: &WorkflowDefinition) -> Vec<StepDescriptor> {
        let mut steps = Self::defaults(definition.timeout_minutes);
        for step in &mut steps {
            if let Some(over) = definition.steps.for_step(step.kind) {
                if let Some(gate) = &over.gate {
                    step.gate = gate.clone();
                }
                if let Some(minutes) = over.timeout_minutes {
                    step.timeout_minutes = minutes;
                }
            }
        }
        steps
    }
}

fn default_gate(kind: StepKind) -> Gate {
    match kind {
        StepKind::CacheRestore => Gate::Always,
        StepKind::Setup | StepKind::Install | StepKind::Test => Gate::prior_succeeded(),
        StepKind::DeployDocs => Gate::default_deploy(),
    }
}

/// Central evaluator for every step gate of a run.
#[derive(Debug, Clone)]
pub struct GateEvaluator {
    deploy_branch: String,
    os_axis: String,
}

impl GateEvaluator {
    pub fn new(deploy_branch: impl Into<String>, os_axis: impl Into<String>) -> Self {
        Self {
            deploy_branch: deploy_branch.into(),
            os_axis: os_axis.into(),
        }
    }

    pub fn from_workflow(definition: &WorkflowDefinition) -> Self {
        Self::new(&definition.deploy_branch, &definition.resolver.os_axis)
    }

    pub fn deploy_branch(&self) -> &str {
        &self.deploy_branch
    }

    pub fn should_run(
        &self,
        step: &StepDescriptor,
        job: &JobDescriptor,
        ctx: &RunContext,
        prior: &[StepRecord],
    ) -> bool {
        self.first_unmet(&step.gate, job, ctx, prior).is_none()
    }

    /// The first predicate, in left-to-right order, that does not hold.
    /// Predicates after it are not evaluated.
    pub fn first_unmet<'g>(
        &self,
        gate: &'g Gate,
        job: &JobDescriptor,
        ctx: &RunContext,
        prior: &[StepRecord],
    ) -> Option<&'g Gate> {
        match gate {
            Gate::All { gates } => gates
                .iter()
                .find_map(|g| self.first_unmet(g, job, ctx, prior)),
            leaf if self.holds(leaf, job, ctx, prior) => None,
            leaf => Some(leaf),
        }
    }

    fn holds(&self, gate: &Gate, job: &JobDescriptor, ctx: &RunContext, prior: &[StepRecord]) -> bool {
        match gate {
            Gate::Always => true,
            Gate::OsEquals { os } => effective_os(job, ctx, &self.os_axis) == *os,
            Gate::OsPrefix { prefix } => effective_os(job, ctx, &self.os_axis).starts_with(prefix.as_str()),
            Gate::Event { event } => ctx.event_kind() == *event,
            Gate::DeployBranch => ctx.branch == self.deploy_branch,
            Gate::Flag { flag } => job.flag(flag),
            Gate::PriorSucceeded { steps } => prior
                .iter()
                .filter(|r| steps.is_empty() || steps.contains(&r.kind))
                .all(|r| r.result != StepResult::Failed),
            Gate::All { gates } => gates.iter().all(|g| self.holds(g, job, ctx, prior)),
        }
    }
}

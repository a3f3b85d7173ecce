//! Component split computation: turns a total token budget into four
//! per-component budgets, shaped by task type, request flags, and the
//! smoothed adjustment factors learned from history.

use once_cell::sync::Lazy;

use crate::budget::types::{
    AdjustmentFactors, Component, ComponentBudgets, TaskRequirements, TaskType,
};
use crate::error::{BudgetError, Result};
use crate::profile::ModelProfile;

/// A single task-type ratio shift.
#[derive(Debug, Clone, Copy)]
struct TaskMultiplier {
    task: TaskType,
    component: Component,
    factor: f64,
}

// Fixed task-shaping table. Summarization leans on context, QA on
// instructions, chat on the response. General tasks shift nothing.
static TASK_MULTIPLIERS: Lazy<Vec<TaskMultiplier>> = Lazy::new(|| {
    vec![
        TaskMultiplier {
            task: TaskType::Summarization,
            component: Component::Context,
            factor: 1.2,
        },
        TaskMultiplier {
            task: TaskType::Summarization,
            component: Component::Response,
            factor: 0.8,
        },
        TaskMultiplier {
            task: TaskType::Qa,
            component: Component::Context,
            factor: 0.9,
        },
        TaskMultiplier {
            task: TaskType::Qa,
            component: Component::Instruction,
            factor: 1.1,
        },
        TaskMultiplier {
            task: TaskType::Chat,
            component: Component::System,
            factor: 0.8,
        },
        TaskMultiplier {
            task: TaskType::Chat,
            component: Component::Response,
            factor: 1.2,
        },
    ]
});

/// Further multiplier applied to `response` when a detailed answer is
/// requested.
const DETAILED_RESPONSE_FACTOR: f64 = 1.2;
/// Further multiplier applied to `context` when the caller wants it kept
/// minimal.
const MINIMAL_CONTEXT_FACTOR: f64 = 0.8;

/// Computes normalized component splits of a total token budget.
pub struct RatioAdjuster;

impl RatioAdjuster {
    /// Split `total_tokens` across the four components.
    ///
    /// Starts from the profile's ratios, applies task-type and requirement
    /// multipliers (multiplicatively), scales by the smoothed adjustment
    /// factors, renormalizes to sum 1.0, then floors each share to an
    /// integer with the rounding remainder assigned to `response`. The
    /// returned budgets always sum to exactly `total_tokens`.
    pub fn compute_split(
        profile: &ModelProfile,
        task: TaskType,
        requirements: &TaskRequirements,
        factors: &AdjustmentFactors,
        total_tokens: u64,
    ) -> Result<ComponentBudgets> {
        if total_tokens == 0 {
            return Err(BudgetError::InvalidBudgetRequest(
                "total token budget must be positive".to_string(),
            ));
        }

        let ratios = Self::normalized_ratios(profile, task, requirements, factors)?;

        let mut budgets = ComponentBudgets::default();
        let mut assigned = 0u64;
        for (slot, component) in Component::ALL.iter().enumerate() {
            let share = (ratios[slot] * total_tokens as f64).floor() as u64;
            budgets.set(*component, share);
            assigned += share;
        }
        // Flooring can only under-assign; the remainder goes to response.
        let remainder = total_tokens - assigned;
        budgets.set(
            Component::Response,
            budgets.get(Component::Response) + remainder,
        );

        Ok(budgets)
    }

    /// The post-multiplier normalized ratios, indexed in `Component::ALL`
    /// order. Always sums to 1.0 within floating tolerance.
    pub fn normalized_ratios(
        profile: &ModelProfile,
        task: TaskType,
        requirements: &TaskRequirements,
        factors: &AdjustmentFactors,
    ) -> Result<[f64; 4]> {
        let mut ratios = [0.0f64; 4];
        for (slot, component) in Component::ALL.iter().enumerate() {
            ratios[slot] = profile.component_ratios.get(*component);
        }

        for multiplier in TASK_MULTIPLIERS.iter().filter(|m| m.task == task) {
            let slot = slot_of(multiplier.component);
            ratios[slot] *= multiplier.factor;
        }

        if requirements.detailed_response {
            ratios[slot_of(Component::Response)] *= DETAILED_RESPONSE_FACTOR;
        }
        if requirements.minimal_context {
            ratios[slot_of(Component::Context)] *= MINIMAL_CONTEXT_FACTOR;
        }

        for (slot, component) in Component::ALL.iter().enumerate() {
            ratios[slot] *= factors.get(*component);
        }

        let sum: f64 = ratios.iter().sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(BudgetError::Configuration(format!(
                "Adjusted component ratios sum to {}, cannot normalize",
                sum
            )));
        }
        for ratio in ratios.iter_mut() {
            *ratio /= sum;
        }
        Ok(ratios)
    }
}

fn slot_of(component: Component) -> usize {
    match component {
        Component::System => 0,
        Component::Context => 1,
        Component::Instruction => 2,
        Component::Response => 3,
    }
}

//! Auto-approval decision over a user's guardrails.
//!
//! The evaluator is a pure function of its inputs: no storage access, no
//! clock, no shared state. Rules are scanned in the order given, which
//! callers supply as insertion order (`created_at` ascending, id tiebreak).
//! Only the `auto_approve` flag and its cents ceiling are consulted; the
//! rule payloads are carried for later policies.

use serde::{Deserialize, Serialize};

use crate::domain::guardrail::Guardrail;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailInput<'a> {
    pub amount_cents: i64,
    pub merchant_name: &'a str,
    pub merchant_category: &'a str,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub auto_approve: bool,
    pub matched_rule: Option<Guardrail>,
}

impl GuardrailDecision {
    pub fn requires_review() -> Self {
        Self { auto_approve: false, matched_rule: None }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GuardrailEvaluator;

impl GuardrailEvaluator {
    pub fn evaluate(&self, input: &GuardrailInput<'_>, guardrails: &[Guardrail]) -> GuardrailDecision {
        guardrails
            .iter()
            .find(|guardrail| guardrail.allows_auto_approval(input.amount_cents))
            .map(|guardrail| GuardrailDecision {
                auto_approve: true,
                matched_rule: Some(guardrail.clone()),
            })
            .unwrap_or_else(GuardrailDecision::requires_review)
    }
}

// src/units.rs

//! Decides whether an invoice quantity can be multiplied by a reference factor.

use crate::error::StepError;
use crate::llm::json::decode_json;
use crate::llm::{LlmClient, Prompt, Purpose};
use serde::Deserialize;
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"You are an expert carbon accounting auditor. You validate one multiplication.

Reason step by step before answering:
1. What kind of unit is the invoice unit: a surface, a mass, a duration, a distance, a single service?
2. What kind of unit is the emission factor's unit?
3. For this specific product, are they interchangeable, so that
   (quantity in invoice unit) x (factor in kgCO2e per reference unit) = footprint in kgCO2e ?

Examples:
- COMPATIBLE: for a "Train ticket", the invoice unit "trip" is compatible with "passenger.km",
  because a trip carries an implicit distance.
- NOT COMPATIBLE: for a "6 m² booth", the invoice unit "m²" is not compatible with "day" or "event",
  because a surface cannot be multiplied by a time-based factor to get a footprint.

Answer ONLY with a JSON object: {"compatible": true} or {"compatible": false}."#;

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    compatible: bool,
}

/// Equal after lowercasing and removing all whitespace.
pub fn units_match_exactly(invoice_unit: &str, reference_unit: &str) -> bool {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    squash(invoice_unit) == squash(reference_unit)
}

/// Exact matches pass without a call. Otherwise the judgment service
/// decides. An error must be treated as incompatible by the caller.
pub async fn are_units_compatible(
    llm: &dyn LlmClient,
    description: &str,
    invoice_unit: &str,
    reference_unit: &str,
) -> Result<bool, StepError> {
    if units_match_exactly(invoice_unit, reference_unit) {
        debug!(unit = %invoice_unit, "Units identical");
        return Ok(true);
    }

    let prompt = Prompt {
        purpose: Purpose::UnitJudgment,
        system: SYSTEM_PROMPT,
        user: format!(
            "Product on the invoice: \"{description}\"\n\
             The invoice unit of this product is: \"{invoice_unit}\"\n\
             An emission factor was found with the unit: \"kgCO2e / {reference_unit}\"\n\
             Is (quantity in '{invoice_unit}') x (factor in 'kgCO2e / {reference_unit}') a valid footprint in kgCO2e?"
        ),
    };

    let raw = llm.complete(&prompt).await?;
    let verdict = decode_json::<Verdict>(&raw).ok_or(StepError::Malformed("no verdict object"))?;
    debug!(invoice_unit, reference_unit, compatible = verdict.compatible, "Unit judgment");
    Ok(verdict.compatible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeLlm;

    #[tokio::test]
    async fn test_fast_path_makes_no_call() {
        let llm = FakeLlm::new();
        assert!(are_units_compatible(&llm, "anything at all", "m²", "m²").await.unwrap());
        assert!(are_units_compatible(&llm, "x", " Passager. KM", "passager.km").await.unwrap());
        assert_eq!(llm.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_judge_accepts() {
        let llm = FakeLlm::new().reply(
            Purpose::UnitJudgment,
            "A trip implies a distance.\n```json\n{\"compatible\": true}\n```",
        );
        assert!(
            are_units_compatible(&llm, "Billet de train Paris-Lyon", "trajet", "passager.km")
                .await
                .unwrap()
        );
        let sent = &llm.prompts(Purpose::UnitJudgment)[0];
        assert!(sent.contains("kgCO2e / passager.km"));
        assert!(sent.contains("Billet de train"));
    }

    #[tokio::test]
    async fn test_verdict_after_reasoning_fence() {
        let llm = FakeLlm::new().reply(
            Purpose::UnitJudgment,
            "Check:\n```\n6 m2 x 3 days\n```\nAnswer: {\"compatible\": true}",
        );
        assert!(are_units_compatible(&llm, "Stand", "m²", "m².jour").await.unwrap());
    }

    #[tokio::test]
    async fn test_judge_rejects() {
        let llm = FakeLlm::new().reply(Purpose::UnitJudgment, r#"{"compatible": false}"#);
        assert!(!are_units_compatible(&llm, "Stand 6 m²", "m²", "jour").await.unwrap());

        // an empty verdict is a rejection, not a malformed answer
        let llm = FakeLlm::new().reply(Purpose::UnitJudgment, "{}");
        assert!(!are_units_compatible(&llm, "x", "kg", "t").await.unwrap());
    }

    #[tokio::test]
    async fn test_failures_are_errors() {
        let llm = FakeLlm::new().fail(Purpose::UnitJudgment);
        assert!(matches!(
            are_units_compatible(&llm, "x", "kg", "t").await,
            Err(StepError::Service(_))
        ));

        let llm = FakeLlm::new().reply(Purpose::UnitJudgment, "yes, compatible");
        assert!(matches!(
            are_units_compatible(&llm, "x", "kg", "t").await,
            Err(StepError::Malformed(_))
        ));
    }
}

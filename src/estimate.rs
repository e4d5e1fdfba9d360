// src/estimate.rs

//! Model-estimated emission factor when no validated reference row exists.

use crate::analysis::AnalysisResult;
use crate::error::StepError;
use crate::llm::json::{decode_json, lenient_f64, required_f64};
use crate::llm::{LlmClient, Prompt, Purpose};
use serde::Deserialize;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = r#"You are a Life Cycle Assessment (LCA) expert specialised in corporate purchasing.
Estimate the carbon footprint of one invoice line as realistically and transparently as possible.

Instructions:
1. Semantic analysis: identify exactly what the product or service is, and above all its units
   and dimensions (e.g. "6 m²", "10 units").
2. LCA breakdown: split it into its main emission sources. For a physical object consider
   materials, logistics, energy and end of life. For a service consider energy (servers, transport)
   and amortised infrastructure.
3. Final computation: compute the TOTAL footprint in kgCO2e for the whole description, then divide
   it by the invoiced quantity to get the factor per invoiced unit. Return that factor.
4. Justification: explain the total and the numeric assumptions behind it.

Answer ONLY with a JSON object:
{
  "category": "most relevant emission category (e.g. 'Events - Booth and structure')",
  "estimated_factor_kgCO2e_per_unit": <float>,
  "justification": "CALCULATION: total for the item = X kgCO2e. Breakdown: [...]. Returned factor = X / quantity.",
  "confidence_score": <float between 0.0 and 1.0>
}"#;

const DEFAULT_CATEGORY: &str = "Unclassified";

#[derive(Debug, Deserialize)]
struct RawEstimate {
    #[serde(default)]
    category: Option<String>,
    #[serde(rename = "estimated_factor_kgCO2e_per_unit", deserialize_with = "required_f64")]
    factor: f64,
    #[serde(default)]
    justification: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    confidence_score: Option<f64>,
}

/// Ask the estimation service for a per-unit factor. An error means there
/// is no usable factor; the caller must not invent one.
pub async fn estimate_factor(
    llm: &dyn LlmClient,
    description: &str,
    quantity: f64,
) -> Result<AnalysisResult, StepError> {
    let prompt = Prompt {
        purpose: Purpose::Estimation,
        system: SYSTEM_PROMPT,
        user: format!("Item description: \"{description}\"\nInvoiced quantity: {quantity}"),
    };

    let raw = llm.complete(&prompt).await?;
    let estimate =
        decode_json::<RawEstimate>(&raw).ok_or(StepError::Malformed("no numeric factor"))?;
    if !estimate.factor.is_finite() || estimate.factor < 0.0 {
        warn!(factor = estimate.factor, "Estimation returned an unusable factor");
        return Err(StepError::Malformed("negative or non-finite factor"));
    }

    let result = AnalysisResult {
        category: estimate
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        factor_per_unit: estimate.factor,
        justification: estimate
            .justification
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| "N/A".to_string()),
        confidence: estimate
            .confidence_score
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
    };
    debug!(factor = result.factor_per_unit, confidence = result.confidence, "Estimated factor");
    Ok(result)
}

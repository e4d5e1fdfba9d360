// src/hints.rs

//! Keyword and unit hints for a single line-item description.

use crate::error::StepError;
use crate::llm::json::decode_json;
use crate::llm::{LlmClient, Prompt, Purpose};
use serde::Deserialize;
use tracing::debug;

/// Unit assumed when the model names none.
pub const DEFAULT_UNIT: &str = "unit";

const SYSTEM_PROMPT: &str = r#"You analyse one line of a purchase invoice.
Extract:
1. "keywords": a list of 2-4 generic keywords describing the product or service.
2. "unit": the most relevant unit mentioned or implied (e.g. "m²", "kg", "day", "unit", "trip", "licence").
   If no unit is clear, return "unit".

Answer ONLY with a JSON object.
Example for "Booking of a 6 m² booth": {"keywords": ["booth", "fair", "exhibition"], "unit": "m²"}
Example for "Train ticket Paris-Lyon": {"keywords": ["train", "transport", "passenger"], "unit": "trip"}"#;

/// Keywords to search the reference table with, plus the invoice-side unit.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredHint {
    pub keywords: Vec<String>,
    pub invoice_unit: String,
}

#[derive(Debug, Deserialize)]
struct RawHint {
    keywords: Vec<String>,
    #[serde(default)]
    unit: Option<String>,
}

/// Ask the inference service for keywords and a unit. An error means no
/// hint is available; the caller reports it and moves on.
pub async fn extract_hint(llm: &dyn LlmClient, description: &str) -> Result<StructuredHint, StepError> {
    let prompt = Prompt {
        purpose: Purpose::Keywords,
        system: SYSTEM_PROMPT,
        user: format!("Invoice line: \"{description}\""),
    };

    let raw = llm.complete(&prompt).await?;
    let hint = decode_json::<RawHint>(&raw).ok_or(StepError::Malformed("no keyword object"))?;

    let keywords: Vec<String> = hint
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    let invoice_unit = hint
        .unit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_UNIT.to_string());

    debug!(?keywords, unit = %invoice_unit, "Structured hint");
    Ok(StructuredHint {
        keywords,
        invoice_unit,
    })
}

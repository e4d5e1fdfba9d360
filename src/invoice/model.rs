// src/invoice/model.rs

//! Model-based invoice parsing for PDF and plain-text documents.

use super::{LineItem, ParsedInvoice, parse_invoice_date};
use crate::error::InvoiceError;
use crate::llm::json::{decode_json, lenient_f64};
use crate::llm::{LlmClient, Prompt, Purpose, truncate_chars};
use serde::Deserialize;
use tracing::{info, warn};

/// The prompt template that instructs the model to extract line items.
const SYSTEM_PROMPT: &str = r#"You are an expert invoice data extraction system.
Given the text of an invoice, extract the invoice number, the seller name,
the invoice date (YYYY-MM-DD) and the complete list of billed items.
For every item give the description, the quantity and the total price.

Your only answer must be one valid JSON object, with nothing before or after it:
{
  "invoice_number": "string or null",
  "seller_name": "string or null",
  "invoice_date": "YYYY-MM-DD or null",
  "line_items": [
    {
      "description": "string",
      "quantity": float,
      "total_price": float or null
    }
  ]
}

Notes:
- The text may be garbled by PDF column extraction. Do your best to reconstruct the data.
- Use null for fields you cannot determine."#;

#[derive(Debug, Deserialize)]
struct RawInvoice {
    #[serde(default)]
    invoice_number: Option<String>,
    #[serde(default)]
    seller_name: Option<String>,
    #[serde(default)]
    invoice_date: Option<String>,
    line_items: Vec<RawLineItem>,
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    quantity: Option<f64>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_price: Option<f64>,
}

/// Send document text to the extraction service and normalize the answer.
///
/// Text longer than `max_chars` is truncated to stay within context limits.
pub async fn extract_invoice(
    llm: &dyn LlmClient,
    text: &str,
    max_chars: usize,
) -> Result<ParsedInvoice, InvoiceError> {
    let truncated = truncate_chars(text, max_chars);
    if truncated.len() < text.len() {
        warn!(max_chars, chars = text.chars().count(), "Document text truncated");
    }

    let prompt = Prompt {
        purpose: Purpose::InvoiceExtraction,
        system: SYSTEM_PROMPT,
        user: format!("Extract invoice data from the following document text:\n\n{truncated}"),
    };
    let raw = llm.complete(&prompt).await?;
    let invoice: RawInvoice = decode_json(&raw).ok_or(InvoiceError::Malformed)?;

    let invoice_date = invoice.invoice_date.as_deref().and_then(|d| {
        let parsed = parse_invoice_date(d);
        if parsed.is_none() {
            warn!(raw_date = %d, "Unrecognised invoice date");
        }
        parsed
    });

    let line_items: Vec<LineItem> = invoice
        .line_items
        .into_iter()
        .map(|item| {
            let description = item
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "N/A".to_string());
            LineItem::new(description, item.quantity, item.unit, item.total_price)
        })
        .collect();

    info!(
        invoice_no = ?invoice.invoice_number,
        seller = ?invoice.seller_name,
        date = ?invoice_date,
        line_items = line_items.len(),
        "Invoice extracted"
    );

    Ok(ParsedInvoice {
        invoice_number: invoice.invoice_number,
        seller_name: invoice.seller_name,
        invoice_date,
        line_items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeLlm;
    use time::macros::date;

    #[tokio::test]
    async fn test_fenced_response() {
        let llm = FakeLlm::new().reply(
            Purpose::InvoiceExtraction,
            r#"```json
{"invoice_number": "F-12", "seller_name": "SNCF", "invoice_date": "2025-03-02",
 "line_items": [
   {"description": "Billet de train Paris-Lyon", "quantity": "2", "total_price": 120.5},
   {"description": "  ", "quantity": null}
 ]}
```"#,
        );

        let invoice = extract_invoice(&llm, "some invoice", 12_000).await.unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("F-12"));
        assert_eq!(invoice.invoice_date, Some(date!(2025 - 03 - 02)));
        assert_eq!(invoice.line_items.len(), 2);
        assert_eq!(invoice.line_items[0].quantity, 2.0);
        assert_eq!(invoice.line_items[0].total_price, Some(120.5));
        assert_eq!(invoice.line_items[1].description, "N/A");
        assert_eq!(invoice.line_items[1].quantity, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let llm = FakeLlm::new().reply(Purpose::InvoiceExtraction, "I could not read it.");
        let result = extract_invoice(&llm, "x", 100).await;
        assert!(matches!(result, Err(InvoiceError::Malformed)));
    }

    #[tokio::test]
    async fn test_missing_line_items_is_malformed() {
        let llm = FakeLlm::new().reply(Purpose::InvoiceExtraction, r#"{"invoice_number": "1"}"#);
        let result = extract_invoice(&llm, "x", 100).await;
        assert!(matches!(result, Err(InvoiceError::Malformed)));
    }

    #[tokio::test]
    async fn test_service_failure() {
        let llm = FakeLlm::new().fail(Purpose::InvoiceExtraction);
        let result = extract_invoice(&llm, "x", 100).await;
        assert!(matches!(result, Err(InvoiceError::Service(_))));
    }

    #[tokio::test]
    async fn test_long_text_is_truncated() {
        let llm = FakeLlm::new().reply(Purpose::InvoiceExtraction, r#"{"line_items": []}"#);
        let text = "é".repeat(50);
        extract_invoice(&llm, &text, 10).await.unwrap();
        let sent = &llm.prompts(Purpose::InvoiceExtraction)[0];
        assert!(sent.ends_with(&"é".repeat(10)));
        assert!(!sent.contains(&"é".repeat(11)));
    }
}

// src/invoice/mod.rs

pub mod columns;
pub mod model;

use time::Date;
use time::macros::format_description;

/// A single invoice line item.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub description: String,
    /// Always finite and > 0.
    pub quantity: f64,
    pub unit: Option<String>,
    pub total_price: Option<f64>,
}

impl LineItem {
    /// Build an item, substituting 1.0 for a missing, zero, negative or
    /// non-finite quantity.
    pub fn new(
        description: impl Into<String>,
        quantity: Option<f64>,
        unit: Option<String>,
        total_price: Option<f64>,
    ) -> Self {
        let quantity = quantity.filter(|q| q.is_finite() && *q > 0.0).unwrap_or(1.0);
        Self {
            description: description.into(),
            quantity,
            unit: unit.filter(|u| !u.trim().is_empty()),
            total_price: total_price.filter(|p| p.is_finite()),
        }
    }
}

/// Everything the parsers get out of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedInvoice {
    pub invoice_number: Option<String>,
    pub seller_name: Option<String>,
    pub invoice_date: Option<Date>,
    pub line_items: Vec<LineItem>,
}

/// Parse `YYYY-MM-DD`, also accepting `DD/MM/YYYY`.
pub fn parse_invoice_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    Date::parse(raw, &format_description!("[year]-[month]-[day]"))
        .or_else(|_| Date::parse(raw, &format_description!("[day]/[month]/[year]")))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_quantity_defaults() {
        assert_eq!(LineItem::new("a", None, None, None).quantity, 1.0);
        assert_eq!(LineItem::new("a", Some(0.0), None, None).quantity, 1.0);
        assert_eq!(LineItem::new("a", Some(-3.0), None, None).quantity, 1.0);
        assert_eq!(LineItem::new("a", Some(f64::NAN), None, None).quantity, 1.0);
        assert_eq!(LineItem::new("a", Some(2.5), None, None).quantity, 2.5);
    }

    #[test]
    fn test_blank_unit_is_none() {
        assert_eq!(LineItem::new("a", None, Some(" ".into()), None).unit, None);
        assert_eq!(
            LineItem::new("a", None, Some("kg".into()), None).unit.as_deref(),
            Some("kg")
        );
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_invoice_date("2025-02-10"), Some(date!(2025 - 02 - 10)));
        assert_eq!(parse_invoice_date(" 10/02/2025 "), Some(date!(2025 - 02 - 10)));
        assert_eq!(parse_invoice_date("February 10"), None);
        assert_eq!(parse_invoice_date(""), None);
    }
}

// src/invoice/columns.rs

//! Column-mapping parser for CSV invoices.
//!
//! Best-effort: headers are matched by substring against a small
//! vocabulary, and unmatched fields fall back to column positions. Nothing
//! guarantees the guess is right for an arbitrary spreadsheet export.

use super::{LineItem, ParsedInvoice};
use crate::extract::CsvTable;
use crate::llm::json::parse_decimal;
use tracing::{debug, info};

/// Column indexes chosen for each field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub description: Option<usize>,
    pub quantity: Option<usize>,
    pub unit_price: Option<usize>,
    pub unit: Option<usize>,
}

const DESCRIPTION_KEYS: &[&str] = &["desc", "product", "label"];
const QUANTITY_KEYS: &[&str] = &["qty", "quantity"];
const PRICE_KEYS: &[&str] = &["unit_price", "price", "pu"];
const UNIT_KEYS: &[&str] = &["unit"];

fn matches_any(header: &str, keys: &[&str]) -> bool {
    keys.iter().any(|k| header.contains(k))
}

/// Match headers case-insensitively; the first matching column wins. A
/// column recognised as a price is never also taken as the unit.
pub fn map_headers(headers: &[String]) -> ColumnMap {
    let mut map = ColumnMap::default();
    for (idx, header) in headers.iter().enumerate() {
        let lc = header.to_lowercase();
        if map.description.is_none() && matches_any(&lc, DESCRIPTION_KEYS) {
            map.description = Some(idx);
        }
        if map.quantity.is_none() && matches_any(&lc, QUANTITY_KEYS) {
            map.quantity = Some(idx);
        }
        let is_price = matches_any(&lc, PRICE_KEYS);
        if map.unit_price.is_none() && is_price {
            map.unit_price = Some(idx);
        }
        if map.unit.is_none() && !is_price && matches_any(&lc, UNIT_KEYS) {
            map.unit = Some(idx);
        }
    }
    map
}

/// Fill unmatched fields from positions: first column is the description,
/// second the quantity, last the unit price.
fn with_positional_fallback(mut map: ColumnMap, width: usize) -> ColumnMap {
    if width == 0 {
        return map;
    }
    map.description.get_or_insert(0);
    if width > 1 {
        map.quantity.get_or_insert(1);
    }
    let last = width - 1;
    if map.unit_price.is_none() && map.description != Some(last) && map.quantity != Some(last) {
        map.unit_price = Some(last);
    }
    map
}

/// Turn CSV rows into line items. Total price is quantity × unit price.
pub fn parse_table(table: &CsvTable) -> ParsedInvoice {
    let matched = map_headers(&table.headers);
    let map = with_positional_fallback(matched, table.headers.len());
    debug!(?matched, ?map, "CSV column mapping");

    let cell = |row: &[String], idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    };

    let line_items: Vec<LineItem> = table
        .rows
        .iter()
        .filter_map(|row| {
            let row = row.as_slice();
            let description = cell(row, map.description)?;
            let item = LineItem::new(
                description,
                cell(row, map.quantity).and_then(|q| parse_decimal(&q)),
                cell(row, map.unit),
                None,
            );
            let total_price = cell(row, map.unit_price)
                .and_then(|p| parse_decimal(&p))
                .map(|unit_price| unit_price * item.quantity);
            Some(LineItem { total_price, ..item })
        })
        .collect();

    info!(rows = table.rows.len(), line_items = line_items.len(), "CSV invoice parsed");
    ParsedInvoice {
        line_items,
        ..ParsedInvoice::default()
    }
}

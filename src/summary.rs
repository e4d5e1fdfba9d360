// src/summary.rs

//! Aggregates over the accumulated rows.

use crate::analysis::{ResultRow, Source};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use time::macros::format_description;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_kg: f64,
    pub rows: usize,
    pub validated_rows: usize,
    /// Share of rows backed by a validated reference factor, in `[0, 1]`.
    pub validated_share: f64,
    /// `YYYY-MM` → kgCO2e. Undated rows are left out of this series only.
    pub monthly: BTreeMap<String, f64>,
    /// Largest first.
    pub by_category: Vec<(String, f64)>,
    /// Largest first.
    pub top: Vec<ResultRow>,
}

impl Summary {
    pub fn from_rows(rows: &[ResultRow], top_n: usize) -> Self {
        let total_kg = rows.iter().map(|r| r.carbon_kg).sum();
        let validated_rows = rows
            .iter()
            .filter(|r| r.source == Source::ReferenceValidated)
            .count();
        let validated_share = if rows.is_empty() {
            0.0
        } else {
            validated_rows as f64 / rows.len() as f64
        };

        let mut monthly = BTreeMap::new();
        for row in rows {
            if let Some(date) = row.invoice_date {
                let key = date
                    .format(format_description!("[year]-[month]"))
                    .unwrap_or_default();
                *monthly.entry(key).or_insert(0.0) += row.carbon_kg;
            }
        }

        let mut categories: HashMap<&str, f64> = HashMap::new();
        for row in rows {
            *categories.entry(row.category.as_str()).or_insert(0.0) += row.carbon_kg;
        }
        let mut by_category: Vec<(String, f64)> = categories
            .into_iter()
            .map(|(name, kg)| (name.to_string(), kg))
            .collect();
        by_category.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut top: Vec<ResultRow> = rows.to_vec();
        // stable: equal footprints keep insertion order
        top.sort_by(|a, b| b.carbon_kg.total_cmp(&a.carbon_kg));
        top.truncate(top_n);

        Self {
            total_kg,
            rows: rows.len(),
            validated_rows,
            validated_share,
            monthly,
            by_category,
            top,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total footprint: {:.2} kgCO2e over {} rows", self.total_kg, self.rows)?;
        writeln!(
            f,
            "Reference-validated: {} ({:.0}%)",
            self.validated_rows,
            self.validated_share * 100.0
        )?;

        if !self.monthly.is_empty() {
            writeln!(f, "\nBy month:")?;
            for (month, kg) in &self.monthly {
                writeln!(f, "  {month}  {kg:>12.2}")?;
            }
        }
        if !self.by_category.is_empty() {
            writeln!(f, "\nBy category:")?;
            for (category, kg) in &self.by_category {
                writeln!(f, "  {kg:>12.2}  {category}")?;
            }
        }
        if !self.top.is_empty() {
            writeln!(f, "\nTop contributors:")?;
            for (rank, row) in self.top.iter().enumerate() {
                writeln!(
                    f,
                    "  {:>2}. {:>12.2}  {} [{}]",
                    rank + 1,
                    row.carbon_kg,
                    row.description,
                    row.source
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    fn row(description: &str, carbon: f64, category: &str, source: Source, date: Option<time::Date>) -> ResultRow {
        ResultRow {
            invoice_date: date,
            description: description.to_string(),
            quantity: 1.0,
            carbon_kg: carbon,
            category: category.to_string(),
            confidence: 0.5,
            justification: String::new(),
            source,
        }
    }

    #[test]
    fn test_aggregates() {
        let rows = vec![
            row("Train", 6.0, "Travel", Source::ReferenceValidated, Some(date!(2025 - 01 - 10))),
            row("Flight", 250.0, "Travel", Source::ModelEstimated, Some(date!(2025 - 01 - 22))),
            row("Paper", 25.0, "Office", Source::ModelEstimated, Some(date!(2025 - 02 - 03))),
            row("Catering", 40.0, "Food", Source::Manual, None),
        ];
        let summary = Summary::from_rows(&rows, 2);

        assert_eq!(summary.total_kg, 321.0);
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.validated_rows, 1);
        assert_eq!(summary.validated_share, 0.25);
        assert_eq!(
            summary.monthly.into_iter().collect::<Vec<_>>(),
            vec![("2025-01".to_string(), 256.0), ("2025-02".to_string(), 25.0)]
        );
        assert_eq!(
            summary.by_category,
            vec![
                ("Travel".to_string(), 256.0),
                ("Food".to_string(), 40.0),
                ("Office".to_string(), 25.0),
            ]
        );
        let top: Vec<&str> = summary.top.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(top, vec!["Flight", "Catering"]);
    }

    #[test]
    fn test_empty() {
        let summary = Summary::from_rows(&[], 5);
        assert_eq!(summary.total_kg, 0.0);
        assert_eq!(summary.validated_share, 0.0);
        assert!(summary.top.is_empty());
        assert!(summary.to_string().starts_with("Total footprint: 0.00 kgCO2e over 0 rows"));
    }
}

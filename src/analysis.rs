// src/analysis.rs

use std::fmt;
use time::Date;

/// Confidence attached to every validated reference match.
pub const REFERENCE_CONFIDENCE: f64 = 0.95;

/// Which cascade branch produced a row's factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    ReferenceValidated,
    ModelEstimated,
    Manual,
    Undetermined,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ReferenceValidated => "REFERENCE_VALIDATED",
            Source::ModelEstimated => "MODEL_ESTIMATED",
            Source::Manual => "MANUAL",
            Source::Undetermined => "UNDETERMINED",
        }
    }

    /// Inverse of [`Source::as_str`]; unknown tags read as `Undetermined`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "REFERENCE_VALIDATED" => Source::ReferenceValidated,
            "MODEL_ESTIMATED" => Source::ModelEstimated,
            "MANUAL" => Source::Manual,
            _ => Source::Undetermined,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-unit emission factor and how it was arrived at.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub category: String,
    /// kgCO2e per invoiced unit
    pub factor_per_unit: f64,
    pub justification: String,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// One analysed line item as it is accumulated and exported.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub invoice_date: Option<Date>,
    pub description: String,
    pub quantity: f64,
    pub carbon_kg: f64,
    pub category: String,
    pub confidence: f64,
    pub justification: String,
    pub source: Source,
}

impl ResultRow {
    pub fn new(
        invoice_date: Option<Date>,
        description: &str,
        quantity: f64,
        analysis: AnalysisResult,
        source: Source,
    ) -> Self {
        Self {
            invoice_date,
            description: description.to_string(),
            quantity,
            carbon_kg: quantity * analysis.factor_per_unit,
            category: analysis.category,
            confidence: analysis.confidence,
            justification: analysis.justification,
            source,
        }
    }
}

// src/pipeline.rs

//! Per-item resolution cascade and the per-run document loop.
//!
//! Each line item walks
//! `ExtractingHint -> MatchingReference -> ValidatingUnits -> ReferenceResolved`,
//! dropping to `EstimatingFallback` at the first step that comes up empty.
//! The estimate either resolves the item or leaves it unresolved, in which
//! case it produces no row. Failures never leave the document or item they
//! happened in: they become [`Notice`]s on the [`RunReport`].

use crate::analysis::{AnalysisResult, REFERENCE_CONFIDENCE, ResultRow, Source};
use crate::error::{ExtractError, StoreError};
use crate::estimate::estimate_factor;
use crate::extract::{DocumentKind, Extracted, extract_bytes, extract_file};
use crate::hints::{DEFAULT_UNIT, extract_hint};
use crate::invoice::model::extract_invoice;
use crate::invoice::{LineItem, ParsedInvoice, columns};
use crate::llm::LlmClient;
use crate::reference::{ReferenceFactorRow, ReferenceTable};
use crate::store::ResultStore;
use crate::units::are_units_compatible;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{Instrument, debug, info, info_span, warn};

/// An uploaded document: a display name, its declared kind and raw bytes.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            kind: DocumentKind::from_path(path),
            bytes: std::fs::read(path)?,
        })
    }

    /// Pasted invoice text.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            kind: DocumentKind::Text,
            bytes: text.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    ExtractingHint,
    MatchingReference,
    ValidatingUnits,
    ReferenceResolved,
    EstimatingFallback,
    Resolved,
    Unresolved,
}

/// Where one item ended up and the states it went through.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// The factor and its branch, or why no factor could be had.
    pub resolution: Result<(AnalysisResult, Source), String>,
    pub path: Vec<CascadeState>,
    /// Service calls that failed on the way but did not end the cascade.
    pub failures: Vec<String>,
}

/// Completion fraction in `[0, 1]` and what is happening right now.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub fraction: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Nothing usable came out of the document.
    EmptyDocument,
    /// The document could not be read or decoded.
    ExtractionFailed,
    /// The invoice parser produced nothing for the document.
    ParseFailed,
    /// A service call for an item failed and the cascade moved on.
    ServiceFailed,
    /// No factor could be found or estimated for an item.
    Unresolved,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoticeKind::EmptyDocument => "empty document",
            NoticeKind::ExtractionFailed => "extraction failed",
            NoticeKind::ParseFailed => "parse failed",
            NoticeKind::ServiceFailed => "service failed",
            NoticeKind::Unresolved => "unresolved",
        };
        f.write_str(label)
    }
}

/// A visible, non-fatal problem met during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub file: String,
    pub item: Option<String>,
    pub kind: NoticeKind,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "[{}] {} / {}: {}", self.kind, self.file, item, self.message),
            None => write!(f, "[{}] {}: {}", self.kind, self.file, self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Rows produced by this run, in document then item order.
    pub rows: Vec<ResultRow>,
    pub notices: Vec<Notice>,
    pub documents_processed: usize,
    pub items_seen: usize,
    pub unresolved: usize,
    /// Rows that were new to the store; set by [`Pipeline::analyze`].
    pub rows_added: usize,
}

/// Keeps reported fractions non-decreasing and inside `[0, 1]`.
struct ProgressTracker<'p> {
    sink: &'p mut dyn FnMut(&Progress),
    last: f64,
}

impl ProgressTracker<'_> {
    fn report(&mut self, fraction: f64, label: String) {
        let fraction = fraction.clamp(0.0, 1.0).max(self.last);
        self.last = fraction;
        (self.sink)(&Progress { fraction, label });
    }
}

pub struct Pipeline<'a> {
    llm: &'a dyn LlmClient,
    reference: Option<&'a ReferenceTable>,
    max_document_chars: usize,
    staging_dir: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
    /// Without a reference table every item goes straight to estimation.
    pub fn new(
        llm: &'a dyn LlmClient,
        reference: Option<&'a ReferenceTable>,
        max_document_chars: usize,
    ) -> Self {
        Self {
            llm,
            reference,
            max_document_chars,
            staging_dir: None,
        }
    }

    /// Stage each document's bytes in a temporary file under `dir` before
    /// extraction. The file is gone once the document is done, whatever
    /// happened to it.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Run the cascade for one line item.
    pub async fn resolve_item(&self, item: &LineItem) -> ItemOutcome {
        let mut path = Vec::new();
        let mut failures = Vec::new();

        if let Some(table) = self.reference {
            path.push(CascadeState::ExtractingHint);
            match extract_hint(self.llm, &item.description).await {
                Ok(hint) => {
                    path.push(CascadeState::MatchingReference);
                    if let Some(found) = table.best_match(&hint.keywords) {
                        path.push(CascadeState::ValidatingUnits);
                        debug!(reference = %found.row.name, score = found.score, "Validating units");
                        // A unit column on the invoice beats a guessed default.
                        let invoice_unit = match &item.unit {
                            Some(unit) if hint.invoice_unit == DEFAULT_UNIT => unit.as_str(),
                            _ => hint.invoice_unit.as_str(),
                        };
                        let compatible = are_units_compatible(
                            self.llm,
                            &item.description,
                            invoice_unit,
                            &found.row.unit,
                        )
                        .await
                        .unwrap_or_else(|e| {
                            failures.push(format!("unit check failed, reference discarded: {e}"));
                            false
                        });
                        if compatible {
                            path.push(CascadeState::ReferenceResolved);
                            return ItemOutcome {
                                resolution: Ok((reference_result(found.row), Source::ReferenceValidated)),
                                path,
                                failures,
                            };
                        }
                        debug!(reference = %found.row.name, "Reference discarded, units incompatible");
                    }
                }
                Err(e) => failures.push(format!("keyword extraction failed: {e}")),
            }
        }

        path.push(CascadeState::EstimatingFallback);
        let resolution = match estimate_factor(self.llm, &item.description, item.quantity).await {
            Ok(result) => {
                path.push(CascadeState::Resolved);
                Ok((result, Source::ModelEstimated))
            }
            Err(e) => {
                path.push(CascadeState::Unresolved);
                Err(format!("estimation failed: {e}"))
            }
        };
        ItemOutcome {
            resolution,
            path,
            failures,
        }
    }

    /// Process every document in order and collect the rows they produce.
    pub async fn run(&self, documents: &[Document], progress: &mut dyn FnMut(&Progress)) -> RunReport {
        let mut tracker = ProgressTracker {
            sink: progress,
            last: 0.0,
        };
        let mut report = RunReport::default();
        let total = documents.len();

        if total == 0 {
            tracker.report(1.0, "Nothing to analyse".to_string());
            return report;
        }

        for (i, doc) in documents.iter().enumerate() {
            let span = info_span!("document", file = %doc.name);
            self.run_document(doc, i, total, &mut tracker, &mut report)
                .instrument(span)
                .await;
            report.documents_processed += 1;
            tracker.report((i + 1) as f64 / total as f64, format!("Finished {}", doc.name));
        }

        info!(
            documents = report.documents_processed,
            items = report.items_seen,
            rows = report.rows.len(),
            unresolved = report.unresolved,
            notices = report.notices.len(),
            "Run complete"
        );
        report
    }

    /// [`Pipeline::run`], then merge the batch into `store`.
    ///
    /// Prior rows are kept; rows already present are not added again.
    pub async fn analyze(
        &self,
        documents: &[Document],
        store: &mut ResultStore,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<RunReport, StoreError> {
        let mut report = self.run(documents, progress).await;
        report.rows_added = store.append_batch(&report.rows)?;
        Ok(report)
    }

    async fn run_document(
        &self,
        doc: &Document,
        index: usize,
        total: usize,
        tracker: &mut ProgressTracker<'_>,
        report: &mut RunReport,
    ) {
        let base = index as f64;
        let total_f = total as f64;
        tracker.report((base + 0.1) / total_f, format!("Reading {}", doc.name));

        let Some(invoice) = self.parse_document(doc, report).await else {
            return;
        };
        if invoice.line_items.is_empty() {
            notice(report, doc, None, NoticeKind::ParseFailed, "no line items found".to_string());
            return;
        }

        let count = invoice.line_items.len();
        info!(
            items = count,
            number = ?invoice.invoice_number,
            seller = ?invoice.seller_name,
            "Invoice parsed"
        );
        for (j, item) in invoice.line_items.iter().enumerate() {
            report.items_seen += 1;
            let outcome = self
                .resolve_item(item)
                .instrument(info_span!("item", description = %item.description, total = ?item.total_price))
                .await;

            for failure in outcome.failures {
                notice(report, doc, Some(&item.description), NoticeKind::ServiceFailed, failure);
            }
            match outcome.resolution {
                Ok((analysis, source)) => {
                    debug!(%source, path = ?outcome.path, "Item resolved");
                    report.rows.push(ResultRow::new(
                        invoice.invoice_date,
                        &item.description,
                        item.quantity,
                        analysis,
                        source,
                    ));
                }
                Err(reason) => {
                    report.unresolved += 1;
                    notice(report, doc, Some(&item.description), NoticeKind::Unresolved, reason);
                }
            }

            let done = 0.1 + 0.8 * (j + 1) as f64 / count as f64;
            tracker.report(
                (base + done) / total_f,
                format!("{}: item {}/{}", doc.name, j + 1, count),
            );
        }
    }

    /// Extract and parse one document. `None` means it yields no items; the
    /// reason is already on the report.
    async fn parse_document(&self, doc: &Document, report: &mut RunReport) -> Option<ParsedInvoice> {
        let extracted = match self.extract(doc) {
            Ok(extracted) => extracted,
            Err(e) => {
                notice(report, doc, None, NoticeKind::ExtractionFailed, e.to_string());
                return None;
            }
        };

        match extracted {
            Extracted::Empty => {
                notice(
                    report,
                    doc,
                    None,
                    NoticeKind::EmptyDocument,
                    "no text could be extracted".to_string(),
                );
                None
            }
            Extracted::Table(table) => Some(columns::parse_table(&table)),
            Extracted::Text(text) => {
                match extract_invoice(self.llm, &text, self.max_document_chars).await {
                    Ok(invoice) => Some(invoice),
                    Err(e) => {
                        notice(report, doc, None, NoticeKind::ParseFailed, e.to_string());
                        None
                    }
                }
            }
        }
    }

    fn extract(&self, doc: &Document) -> Result<Extracted, ExtractError> {
        let Some(dir) = &self.staging_dir else {
            return extract_bytes(&doc.bytes, doc.kind);
        };
        std::fs::create_dir_all(dir)?;
        // Removed on drop, including on the error paths below.
        let mut staged = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(dir)?;
        staged.write_all(&doc.bytes)?;
        staged.flush()?;
        debug!(path = %staged.path().display(), "Document staged");
        extract_file(staged.path(), doc.kind)
    }
}

fn reference_result(row: &ReferenceFactorRow) -> AnalysisResult {
    AnalysisResult {
        category: row.category_label.clone(),
        factor_per_unit: row.factor_kg_co2e_per_unit,
        justification: format!(
            "Reference factor \"{}\": {} kgCO2e per {}, unit validated.",
            row.name, row.factor_kg_co2e_per_unit, row.unit
        ),
        confidence: REFERENCE_CONFIDENCE,
    }
}

fn notice(report: &mut RunReport, doc: &Document, item: Option<&str>, kind: NoticeKind, message: String) {
    warn!(file = %doc.name, item = ?item, %kind, %message, "Notice");
    report.notices.push(Notice {
        file: doc.name.clone(),
        item: item.map(str::to_string),
        kind,
        message,
    });
}

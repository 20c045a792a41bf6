// 🚨 Run Errors & Issue Summary
// Fatal errors abort a run. Everything else is collected as a RunIssue and
// reported next to the output, never silently corrected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// FATAL ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fee schedule reference is missing or empty")]
    MissingFeeSchedule,

    #[error(
        "Family directory missing for {missing} of {total} procedures (limit {:.1}%)",
        .limit * 100.0
    )]
    IncompleteFamilyDirectory {
        missing: usize,
        total: usize,
        limit: f64,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// NON-FATAL ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Output touched by this is not fit for financial decisions
    Warning,  // Output is usable but the record needs attention
    Info,     // Informational
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueCategory {
    /// Record references a procedure (or payment) that does not exist
    OrphanedRecord,
    /// Splits do not sum to the payment total
    ReconciliationMismatch,
    /// Procedure touched by an integrity anomaly
    IntegrityReview,
    /// Payment activity on a Planned or Deleted procedure
    UnexpectedPayment,
    /// Zero-fee procedure that received money
    ZeroFeePaid,
    /// Procedure code absent from the fee schedule
    UnknownProcedureCode,
    /// Patient absent from the family directory
    MissingFamily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Procedure,
    Payment,
    Split,
    ClaimLine,
    Adjustment,
    Patient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub record_kind: RecordKind,
    pub record_id: String,

    #[serde(default)]
    pub procedure_id: Option<String>,

    pub message: String,

    #[serde(default)]
    pub amount: Option<f64>,
}

impl RunIssue {
    pub fn new(
        category: IssueCategory,
        severity: Severity,
        record_kind: RecordKind,
        record_id: &str,
        message: &str,
    ) -> Self {
        RunIssue {
            category,
            severity,
            record_kind,
            record_id: record_id.to_string(),
            procedure_id: None,
            message: message.to_string(),
            amount: None,
        }
    }

    pub fn orphaned(record_kind: RecordKind, record_id: &str, missing_ref: &str, amount: f64) -> Self {
        RunIssue::new(
            IssueCategory::OrphanedRecord,
            Severity::Warning,
            record_kind,
            record_id,
            &format!("References unknown record {}", missing_ref),
        )
        .with_procedure(missing_ref)
        .with_amount(amount)
    }

    pub fn with_procedure(mut self, procedure_id: &str) -> Self {
        self.procedure_id = Some(procedure_id.to_string());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }
}

// ============================================================================
// ERROR SUMMARY
// ============================================================================

/// Emitted with every run. Must be inspected before the report drives
/// financial decisions such as collections flagging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub issues: Vec<RunIssue>,
    pub counts: BTreeMap<IssueCategory, usize>,
    pub anomaly_count: usize,
    pub insufficient_baseline_count: usize,
    pub out_of_window_entries: usize,
}

impl ErrorSummary {
    pub fn from_issues(issues: Vec<RunIssue>) -> Self {
        let mut counts = BTreeMap::new();
        for issue in &issues {
            *counts.entry(issue.category).or_insert(0) += 1;
        }

        ErrorSummary {
            issues,
            counts,
            ..Default::default()
        }
    }

    pub fn count(&self, category: IssueCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count()
    }

    /// True when the report should not be used for collections without review
    pub fn requires_review(&self) -> bool {
        self.anomaly_count > 0
            || self.critical_count() > 0
            || self.count(IssueCategory::ReconciliationMismatch) > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} issues ({} critical) | {} orphaned, {} mismatched payments, {} anomalies, {} without baseline, {} out of window",
            self.issues.len(),
            self.critical_count(),
            self.count(IssueCategory::OrphanedRecord),
            self.count(IssueCategory::ReconciliationMismatch),
            self.anomaly_count,
            self.insufficient_baseline_count,
            self.out_of_window_entries
        )
    }
}

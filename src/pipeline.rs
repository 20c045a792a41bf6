// 🔄 Reconciliation Pipeline - One run over one snapshot
//
// fatal checks → normalize → (integrity ∥ balances) → tag → classify → aging
//
// A run either produces a complete RunReport for its as_of_date or an
// EngineError. Cancellation and the deadline are checked by every shard, and
// once more before the report is handed out, so no partial aging escapes.

use crate::aging::{AgingAggregator, AgingReport};
use crate::balance::{BalanceCalculator, ProcedureBalance};
use crate::config::EngineConfig;
use crate::error::{
    EngineError, EngineResult, ErrorSummary, IssueCategory, RecordKind, RunIssue, Severity,
};
use crate::integrity::{IntegrityMonitor, IntegrityReport};
use crate::lifecycle::{Classification, LifecycleClassifier, LifecycleFlag, SuccessRate};
use crate::model::{round_cents, LedgerSnapshot};
use crate::normalizer::LedgerNormalizer;
use crate::prepayment::PrepaymentReport;
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// RUN CONTROL
// ============================================================================

/// Cancellation flag plus optional whole-run deadline, shared by every shard
#[derive(Debug, Clone)]
pub struct RunControl {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new(timeout: Option<Duration>) -> Self {
        RunControl {
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unbounded() -> Self {
        RunControl::new(None)
    }

    /// Handle another thread can flip to cancel the run
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout) {
            if Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded(timeout));
            }
        }
        Ok(())
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub as_of_date: NaiveDate,
    pub window_start: Option<NaiveDate>,
    pub window_end: NaiveDate,
    pub snapshot_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub balances: Vec<ProcedureBalance>,
    pub classifications: Vec<Classification>,
    pub success_rate: SuccessRate,
    pub aging: AgingReport,
    pub integrity: IntegrityReport,
    pub prepayments: PrepaymentReport,
    pub summary: ErrorSummary,
}

impl RunReport {
    pub fn balance(&self, procedure_id: &str) -> Option<&ProcedureBalance> {
        self.balances.iter().find(|b| b.procedure_id == procedure_id)
    }

    pub fn classification(&self, procedure_id: &str) -> Option<&Classification> {
        self.classifications
            .iter()
            .find(|c| c.procedure_id == procedure_id)
    }

    pub fn total_outstanding(&self) -> f64 {
        self.aging.total_outstanding()
    }

    pub fn summary_line(&self) -> String {
        let rate = self
            .success_rate
            .rate()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Run {} as of {}: {} procedures, ${:.2} outstanding, success rate {}, {} anomalies{}",
            self.run_id,
            self.as_of_date,
            self.balances.len(),
            self.total_outstanding(),
            rate,
            self.integrity.anomalies.len(),
            if self.summary.requires_review() {
                " (REVIEW REQUIRED)"
            } else {
                ""
            }
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ReconciliationPipeline {
    config: EngineConfig,
}

impl ReconciliationPipeline {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(ReconciliationPipeline { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run with the configured deadline and no external cancellation
    pub fn run(&self, snapshot: &LedgerSnapshot) -> EngineResult<RunReport> {
        let control = RunControl::new(self.config.run_timeout());
        self.run_with_control(snapshot, &control)
    }

    pub fn run_with_control(
        &self,
        snapshot: &LedgerSnapshot,
        control: &RunControl,
    ) -> EngineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let as_of = self.config.as_of_date;
        let (window_start, window_end) = self.config.window();

        info!(
            run_id = %run_id,
            as_of = %as_of,
            procedures = snapshot.procedures.len(),
            payments = snapshot.payments.len(),
            claim_lines = snapshot.claim_lines.len(),
            "Starting reconciliation run"
        );

        control.check()?;
        self.check_fee_schedule(snapshot)?;
        let (families, mut issues) = self.resolve_families(snapshot)?;
        issues.extend(self.unknown_codes(snapshot));

        let ledger = LedgerNormalizer::from_config(&self.config).normalize(snapshot);
        debug!(
            run_id = %run_id,
            entries = ledger.entry_count(),
            raw_splits = ledger.raw_splits.len(),
            out_of_window = ledger.out_of_window,
            "Ledger normalized"
        );
        control.check()?;

        let monitor = IntegrityMonitor::new(self.config.integrity.clone(), self.config.tolerance);
        let calculator = BalanceCalculator::from_config(&self.config);

        let (integrity, balances) = rayon::join(
            || monitor.evaluate(&ledger.raw_splits, &snapshot.history, control),
            || {
                snapshot
                    .procedures
                    .par_iter()
                    .map(|procedure| -> EngineResult<ProcedureBalance> {
                        control.check()?;
                        Ok(calculator.calculate(procedure, ledger.entries_for(&procedure.id), as_of))
                    })
                    .collect::<EngineResult<Vec<_>>>()
            },
        );
        let integrity = integrity?;
        let mut balances = balances?;

        for balance in &mut balances {
            balance.insurance_pending = round_cents(
                ledger
                    .insurance_pending
                    .get(&balance.procedure_id)
                    .copied()
                    .unwrap_or(0.0),
            );
            balance.reduced_confidence = ledger.reduced_confidence.contains(&balance.procedure_id);
            balance.under_integrity_review = integrity.is_flagged(&balance.procedure_id);
        }

        let classifier = LifecycleClassifier::from_config(&self.config);
        let classifications: Vec<Classification> = snapshot
            .procedures
            .par_iter()
            .zip(balances.par_iter())
            .map(|(procedure, balance)| classifier.classify(procedure, balance))
            .collect();
        let success_rate = SuccessRate::from_classifications(&classifications);

        issues.extend(ledger.issues.iter().cloned());
        issues.extend(self.flag_issues(&classifications, &balances));
        issues.extend(self.review_issues(&integrity));

        control.check()?;
        let aging = AgingAggregator::new(as_of).aggregate(&balances, &families);
        let prepayments = PrepaymentReport::from_unallocated(&ledger.unallocated);

        let mut summary = ErrorSummary::from_issues(issues);
        summary.anomaly_count = integrity.anomalies.len();
        summary.insufficient_baseline_count = integrity.insufficient_data.len();
        summary.out_of_window_entries = ledger.out_of_window;

        // Last chance to abort: past this point the report is complete
        control.check()?;

        for (category, count) in &summary.counts {
            warn!(run_id = %run_id, category = ?category, count = *count, "Run issues reported");
        }
        for anomaly in &integrity.anomalies {
            warn!(run_id = %run_id, pattern = anomaly.pattern_type.as_str(), "{}", anomaly.summary());
        }

        let report = RunReport {
            run_id,
            as_of_date: as_of,
            window_start,
            window_end,
            snapshot_fingerprint: snapshot.fingerprint(),
            started_at,
            finished_at: Utc::now(),
            balances,
            classifications,
            success_rate,
            aging,
            integrity,
            prepayments,
            summary,
        };

        info!(
            run_id = %run_id,
            outstanding = report.total_outstanding(),
            anomalies = report.integrity.anomalies.len(),
            requires_review = report.summary.requires_review(),
            "Reconciliation run complete"
        );

        Ok(report)
    }

    fn check_fee_schedule(&self, snapshot: &LedgerSnapshot) -> EngineResult<()> {
        if self.config.require_fee_schedule && snapshot.fee_schedule.is_empty() {
            return Err(EngineError::MissingFeeSchedule);
        }
        Ok(())
    }

    /// patient → family, from the directory first, then the procedure feed,
    /// then the patient as a family of one
    fn resolve_families(
        &self,
        snapshot: &LedgerSnapshot,
    ) -> EngineResult<(HashMap<String, String>, Vec<RunIssue>)> {
        let mut families = HashMap::new();
        let mut issues = Vec::new();
        let mut reported: BTreeSet<&str> = BTreeSet::new();
        let mut missing = 0;

        for procedure in &snapshot.procedures {
            let patient_id = procedure.patient_id.as_str();
            if let Some(family_id) = snapshot.directory.family_of(patient_id) {
                families.insert(patient_id.to_string(), family_id.to_string());
                continue;
            }

            missing += 1;
            if !reported.insert(patient_id) {
                continue;
            }

            let (family_id, severity) = match &procedure.family_id {
                Some(family_id) => (family_id.clone(), Severity::Info),
                None => (patient_id.to_string(), Severity::Warning),
            };
            issues.push(RunIssue::new(
                IssueCategory::MissingFamily,
                severity,
                RecordKind::Patient,
                patient_id,
                &format!("Not in family directory, aged under family {}", family_id),
            ));
            families.insert(patient_id.to_string(), family_id);
        }

        let total = snapshot.procedures.len();
        let limit = self.config.max_missing_family_fraction;
        if total > 0 && missing as f64 / total as f64 > limit {
            return Err(EngineError::IncompleteFamilyDirectory {
                missing,
                total,
                limit,
            });
        }

        Ok((families, issues))
    }

    fn unknown_codes(&self, snapshot: &LedgerSnapshot) -> Vec<RunIssue> {
        if snapshot.fee_schedule.is_empty() {
            return Vec::new();
        }

        snapshot
            .procedures
            .iter()
            .filter(|p| !snapshot.fee_schedule.contains(&p.code) && !self.config.is_administrative(p))
            .map(|p| {
                RunIssue::new(
                    IssueCategory::UnknownProcedureCode,
                    Severity::Info,
                    RecordKind::Procedure,
                    &p.id,
                    &format!("Code {} is not in the fee schedule", p.code),
                )
                .with_procedure(&p.id)
            })
            .collect()
    }

    fn flag_issues(
        &self,
        classifications: &[Classification],
        balances: &[ProcedureBalance],
    ) -> Vec<RunIssue> {
        let mut issues = Vec::new();
        for (classification, balance) in classifications.iter().zip(balances) {
            let id = classification.procedure_id.as_str();
            if classification.has_flag(LifecycleFlag::ZeroFeePaid) {
                issues.push(
                    RunIssue::new(
                        IssueCategory::ZeroFeePaid,
                        Severity::Warning,
                        RecordKind::Procedure,
                        id,
                        &format!("Zero-fee procedure received {:.2}", balance.total_paid),
                    )
                    .with_procedure(id)
                    .with_amount(balance.total_paid),
                );
            }
            if classification.has_flag(LifecycleFlag::UnexpectedPayment) {
                issues.push(
                    RunIssue::new(
                        IssueCategory::UnexpectedPayment,
                        Severity::Warning,
                        RecordKind::Procedure,
                        id,
                        &format!(
                            "{} procedure carries {:.2} of payment activity",
                            classification.state.as_str(),
                            balance.total_paid
                        ),
                    )
                    .with_procedure(id)
                    .with_amount(balance.total_paid),
                );
            }
        }
        issues
    }

    fn review_issues(&self, integrity: &IntegrityReport) -> Vec<RunIssue> {
        integrity
            .flagged_procedures
            .iter()
            .map(|procedure_id| {
                RunIssue::new(
                    IssueCategory::IntegrityReview,
                    Severity::Critical,
                    RecordKind::Procedure,
                    procedure_id,
                    "Touched by an integrity anomaly; balance kept, pending review",
                )
                .with_procedure(procedure_id)
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

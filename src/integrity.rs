// 🛡️ Integrity Monitor - Detect runaway split generation in the raw stream
//
// Two signatures, both measured against a rolling baseline of comparable
// claims/payments rather than fixed identifiers:
//
//   VolumeAnomaly   - one claim carries far more splits than its peers
//   SymmetryAnomaly - one payment is padded with many +X/-X splits that net to zero
//
// Detection only. Nothing here changes a balance.

use crate::config::IntegrityConfig;
use crate::error::EngineResult;
use crate::model::{BaselineKind, BaselineSample};
use crate::normalizer::RawSplit;
use crate::pipeline::RunControl;
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ============================================================================
// ANOMALY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    VolumeAnomaly,
    SymmetryAnomaly,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::VolumeAnomaly => "VolumeAnomaly",
            PatternType::SymmetryAnomaly => "SymmetryAnomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub claim_id: Option<String>,
    pub payment_id: Option<String>,
    pub split_count: usize,
    pub payment_count: usize,
    pub active_day_span: i64,
    pub pattern_type: PatternType,

    /// None when the threshold fell back to the configured floor
    pub baseline_median: Option<f64>,

    pub threshold: f64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub procedure_ids: BTreeSet<String>,
}

impl Anomaly {
    /// Subject the anomaly is keyed on (claim for volume, payment for symmetry)
    pub fn subject_id(&self) -> &str {
        match self.pattern_type {
            PatternType::VolumeAnomaly => self.claim_id.as_deref().unwrap_or(""),
            PatternType::SymmetryAnomaly => self.payment_id.as_deref().unwrap_or(""),
        }
    }

    pub fn summary(&self) -> String {
        let median = self
            .baseline_median
            .map(|m| format!("{:.1}", m))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "{} on {}: {} splits over {} day(s), threshold {:.1} (baseline median {})",
            self.pattern_type.as_str(),
            self.subject_id(),
            self.split_count,
            self.active_day_span,
            self.threshold,
            median
        )
    }
}

// ============================================================================
// BASELINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BaselineStatus {
    Established { median: f64, samples: usize },
    InsufficientData { samples: usize },
}

/// A claim that could not be judged because too few comparable claims exist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsufficientBaseline {
    pub claim_id: String,
    pub split_count: usize,
    pub samples: usize,
}

/// Ascending values with at most one position left out
#[derive(Debug, Clone, Copy)]
struct SortedView<'a> {
    values: &'a [f64],
    skip: Option<usize>,
}

impl<'a> SortedView<'a> {
    fn all(values: &'a [f64]) -> Self {
        SortedView { values, skip: None }
    }

    /// Leaves out one occurrence of `value`, if present
    fn without(values: &'a [f64], value: f64) -> Self {
        let index = values.partition_point(|v| *v < value);
        let skip = (index < values.len() && values[index] == value).then_some(index);
        SortedView { values, skip }
    }

    fn len(&self) -> usize {
        self.values.len() - usize::from(self.skip.is_some())
    }

    fn get(&self, index: usize) -> f64 {
        match self.skip {
            Some(skip) if index >= skip => self.values[index + 1],
            _ => self.values[index],
        }
    }
}

/// k-th smallest (0-based) across two ascending views, `k < a.len() + b.len()`
fn kth_smallest(a: SortedView<'_>, b: SortedView<'_>, k: usize) -> f64 {
    // Find how many of the k smallest come from `a`
    let mut lo = k.saturating_sub(b.len());
    let mut hi = k.min(a.len());
    while lo < hi {
        let i = (lo + hi) / 2;
        let j = k - i;
        if j > 0 && a.get(i) < b.get(j - 1) {
            lo = i + 1;
        } else {
            hi = i;
        }
    }

    let (i, j) = (lo, k - lo);
    let next_a = if i < a.len() { a.get(i) } else { f64::INFINITY };
    let next_b = if j < b.len() { b.get(j) } else { f64::INFINITY };
    next_a.min(next_b)
}

/// Median of the union of two ascending views
fn merged_median(a: SortedView<'_>, b: SortedView<'_>) -> Option<f64> {
    let n = a.len() + b.len();
    match n {
        0 => None,
        n if n % 2 == 1 => Some(kth_smallest(a, b, n / 2)),
        n => Some((kth_smallest(a, b, n / 2 - 1) + kth_smallest(a, b, n / 2)) / 2.0),
    }
}

/// Comparable values of one kind, prepared once per run
#[derive(Debug, Clone)]
struct BaselinePool {
    /// (first_date, value) from earlier snapshots, ordered by date
    history: Vec<(NaiveDate, f64)>,

    /// Every current-run subject's value, ascending
    current: Vec<f64>,

    window_days: i64,
}

impl BaselinePool {
    /// History superseded by a subject of the current run is dropped
    fn new(
        history: &[BaselineSample],
        current: &[BaselineSample],
        kind: BaselineKind,
        window_days: i64,
        metric: fn(&BaselineSample) -> usize,
    ) -> Self {
        let current_ids: HashSet<&str> = current.iter().map(|s| s.subject_id.as_str()).collect();

        let mut dated: Vec<(NaiveDate, f64)> = history
            .iter()
            .filter(|h| h.kind == kind && !current_ids.contains(h.subject_id.as_str()))
            .map(|h| (h.first_date, metric(h) as f64))
            .collect();
        dated.sort_by_key(|(date, _)| *date);

        let mut values: Vec<f64> = current.iter().map(|s| metric(s) as f64).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        BaselinePool {
            history: dated,
            current: values,
            window_days,
        }
    }

    /// Median and sample count over a subject's peers: history inside the
    /// trailing window before `first_date`, plus every other current-run subject
    fn median_for(&self, first_date: NaiveDate, own_value: usize) -> (Option<f64>, usize) {
        let earliest = first_date - Duration::days(self.window_days);
        let start = self.history.partition_point(|(date, _)| *date < earliest);
        let end = self.history.partition_point(|(date, _)| *date <= first_date);

        let mut window: Vec<f64> = self.history[start..end].iter().map(|(_, v)| *v).collect();
        window.sort_by(|a, b| a.total_cmp(b));

        let history = SortedView::all(&window);
        let peers = SortedView::without(&self.current, own_value as f64);
        (merged_median(history, peers), history.len() + peers.len())
    }
}

// ============================================================================
// SUBJECT STATISTICS
// ============================================================================

/// Split statistics for one claim or one payment in the current run
#[derive(Debug, Clone)]
struct SubjectStats<'a> {
    id: &'a str,
    splits: Vec<&'a RawSplit>,
    first_date: NaiveDate,
    last_date: NaiveDate,
    offsetting_count: usize,
}

impl<'a> SubjectStats<'a> {
    fn from_splits(id: &'a str, splits: Vec<&'a RawSplit>, tolerance: f64) -> Option<Self> {
        let first_date = splits.iter().map(|s| s.date).min()?;
        let last_date = splits.iter().map(|s| s.date).max()?;
        let offsetting_count = offsetting_count(&splits, tolerance);
        Some(SubjectStats {
            id,
            splits,
            first_date,
            last_date,
            offsetting_count,
        })
    }

    fn active_day_span(&self) -> i64 {
        (self.last_date - self.first_date).num_days() + 1
    }

    fn payment_count(&self) -> usize {
        self.splits
            .iter()
            .map(|s| s.payment_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn procedure_ids(&self) -> BTreeSet<String> {
        self.splits
            .iter()
            .filter_map(|s| s.procedure_id.clone())
            .collect()
    }

    /// The one claim every split belongs to, if there is exactly one
    fn single_claim(&self) -> Option<String> {
        let claims: BTreeSet<&str> = self
            .splits
            .iter()
            .filter_map(|s| s.claim_id.as_deref())
            .collect();
        if claims.len() == 1 {
            claims.into_iter().next().map(str::to_string)
        } else {
            None
        }
    }
}

/// Splits sitting at the min/max extremes when those extremes mirror each other
fn offsetting_count(splits: &[&RawSplit], tolerance: f64) -> usize {
    let min = splits.iter().map(|s| s.amount).fold(f64::INFINITY, f64::min);
    let max = splits.iter().map(|s| s.amount).fold(f64::NEG_INFINITY, f64::max);

    if !min.is_finite() || max <= tolerance || (min + max).abs() > tolerance {
        return 0;
    }

    splits
        .iter()
        .filter(|s| (s.amount - max).abs() <= tolerance || (s.amount - min).abs() <= tolerance)
        .count()
}

// ============================================================================
// INTEGRITY REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub anomalies: Vec<Anomaly>,
    pub insufficient_data: Vec<InsufficientBaseline>,
    pub claims_evaluated: usize,
    pub payments_evaluated: usize,

    /// Every procedure touched by at least one anomaly
    pub flagged_procedures: BTreeSet<String>,
}

impl IntegrityReport {
    pub fn is_flagged(&self, procedure_id: &str) -> bool {
        self.flagged_procedures.contains(procedure_id)
    }

    pub fn count_by_pattern(&self, pattern: PatternType) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.pattern_type == pattern)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Integrity: {} claims / {} payments evaluated, {} volume + {} symmetry anomalies, {} claims with insufficient baseline",
            self.claims_evaluated,
            self.payments_evaluated,
            self.count_by_pattern(PatternType::VolumeAnomaly),
            self.count_by_pattern(PatternType::SymmetryAnomaly),
            self.insufficient_data.len()
        )
    }
}

// ============================================================================
// INTEGRITY MONITOR
// ============================================================================

pub struct IntegrityMonitor {
    config: IntegrityConfig,
    tolerance: f64,
}

impl IntegrityMonitor {
    pub fn new(config: IntegrityConfig, tolerance: f64) -> Self {
        IntegrityMonitor { config, tolerance }
    }

    /// Evaluate every claim and payment in the raw stream.
    ///
    /// `history` supplies statistics from earlier snapshots; subjects in the
    /// current stream also serve as each other's baseline.
    pub fn evaluate(
        &self,
        raw_splits: &[RawSplit],
        history: &[BaselineSample],
        control: &RunControl,
    ) -> EngineResult<IntegrityReport> {
        let claims = self.group(raw_splits, |s| s.claim_id.as_deref());
        let payments = self.group(raw_splits, |s| Some(s.payment_id.as_str()));

        let claim_pool = BaselinePool::new(
            history,
            &self.samples(&claims, BaselineKind::Claim),
            BaselineKind::Claim,
            self.config.baseline_window_days,
            |s| s.split_count,
        );
        let payment_pool = BaselinePool::new(
            history,
            &self.samples(&payments, BaselineKind::Payment),
            BaselineKind::Payment,
            self.config.baseline_window_days,
            |s| s.offsetting_count,
        );

        let claim_results: Vec<Result<Option<Anomaly>, InsufficientBaseline>> = claims
            .par_iter()
            .map(|claim| -> EngineResult<_> {
                control.check()?;
                Ok(self.check_volume(claim, &claim_pool))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let symmetry: Vec<Option<Anomaly>> = payments
            .par_iter()
            .map(|payment| -> EngineResult<_> {
                control.check()?;
                Ok(self.check_symmetry(payment, &payment_pool))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let mut report = IntegrityReport {
            claims_evaluated: claims.len(),
            payments_evaluated: payments.len(),
            ..Default::default()
        };

        for result in claim_results {
            match result {
                Ok(Some(anomaly)) => report.anomalies.push(anomaly),
                Ok(None) => {}
                Err(insufficient) => report.insufficient_data.push(insufficient),
            }
        }
        report.anomalies.extend(symmetry.into_iter().flatten());

        for anomaly in &report.anomalies {
            report
                .flagged_procedures
                .extend(anomaly.procedure_ids.iter().cloned());
        }

        Ok(report)
    }

    fn group<'a, F>(&self, raw_splits: &'a [RawSplit], key: F) -> Vec<SubjectStats<'a>>
    where
        F: Fn(&'a RawSplit) -> Option<&'a str>,
    {
        let mut groups: BTreeMap<&'a str, Vec<&'a RawSplit>> = BTreeMap::new();
        for split in raw_splits {
            if let Some(id) = key(split) {
                groups.entry(id).or_default().push(split);
            }
        }

        groups
            .into_iter()
            .filter_map(|(id, splits)| SubjectStats::from_splits(id, splits, self.tolerance))
            .collect()
    }

    /// The current run's subjects as baseline samples
    fn samples(&self, subjects: &[SubjectStats<'_>], kind: BaselineKind) -> Vec<BaselineSample> {
        subjects
            .iter()
            .map(|s| BaselineSample {
                kind,
                subject_id: s.id.to_string(),
                first_date: s.first_date,
                split_count: s.splits.len(),
                offsetting_count: s.offsetting_count,
            })
            .collect()
    }

    /// Established once the peer count reaches the configured minimum
    pub fn baseline(&self, median: Option<f64>, samples: usize) -> BaselineStatus {
        match median {
            Some(median) if samples >= self.config.min_baseline_samples => {
                BaselineStatus::Established { median, samples }
            }
            _ => BaselineStatus::InsufficientData { samples },
        }
    }

    fn check_volume(
        &self,
        claim: &SubjectStats<'_>,
        pool: &BaselinePool,
    ) -> Result<Option<Anomaly>, InsufficientBaseline> {
        let (median, samples) = pool.median_for(claim.first_date, claim.splits.len());

        let median = match self.baseline(median, samples) {
            BaselineStatus::Established { median, .. } => median,
            BaselineStatus::InsufficientData { samples } => {
                return Err(InsufficientBaseline {
                    claim_id: claim.id.to_string(),
                    split_count: claim.splits.len(),
                    samples,
                });
            }
        };

        let threshold = (self.config.volume_multiplier * median).max(self.config.volume_floor as f64);
        if (claim.splits.len() as f64) <= threshold {
            return Ok(None);
        }

        Ok(Some(Anomaly {
            claim_id: Some(claim.id.to_string()),
            payment_id: None,
            split_count: claim.splits.len(),
            payment_count: claim.payment_count(),
            active_day_span: claim.active_day_span(),
            pattern_type: PatternType::VolumeAnomaly,
            baseline_median: Some(median),
            threshold,
            first_date: claim.first_date,
            last_date: claim.last_date,
            procedure_ids: claim.procedure_ids(),
        }))
    }

    fn check_symmetry(
        &self,
        payment: &SubjectStats<'_>,
        pool: &BaselinePool,
    ) -> Option<Anomaly> {
        if payment.offsetting_count == 0 {
            return None;
        }

        let (median, samples) = pool.median_for(payment.first_date, payment.offsetting_count);

        let floor = self.config.symmetry_repeat_count as f64;
        let (baseline_median, threshold) = match self.baseline(median, samples) {
            BaselineStatus::Established { median, .. } => {
                (Some(median), floor.max((self.config.symmetry_multiplier * median).ceil()))
            }
            BaselineStatus::InsufficientData { .. } => (None, floor),
        };

        if (payment.offsetting_count as f64) <= threshold {
            return None;
        }

        Some(Anomaly {
            claim_id: payment.single_claim(),
            payment_id: Some(payment.id.to_string()),
            split_count: payment.splits.len(),
            payment_count: 1,
            active_day_span: payment.active_day_span(),
            pattern_type: PatternType::SymmetryAnomaly,
            baseline_median,
            threshold,
            first_date: payment.first_date,
            last_date: payment.last_date,
            procedure_ids: payment.procedure_ids(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::RawSplitSource;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn raw(id: &str, payment: &str, claim: Option<&str>, procedure: &str, amount: f64, on: NaiveDate) -> RawSplit {
        RawSplit {
            split_id: id.to_string(),
            payment_id: payment.to_string(),
            claim_id: claim.map(str::to_string),
            procedure_id: Some(procedure.to_string()),
            amount,
            date: on,
            source: RawSplitSource::PatientSplit,
        }
    }

    fn claim_history(count: usize, splits_each: usize) -> Vec<BaselineSample> {
        (0..count)
            .map(|i| BaselineSample {
                kind: BaselineKind::Claim,
                subject_id: format!("hist-claim-{}", i),
                first_date: date(2024, 3, 1) + Duration::days(i as i64),
                split_count: splits_each,
                offsetting_count: 0,
            })
            .collect()
    }

    fn claim_with_splits(claim: &str, n: usize) -> Vec<RawSplit> {
        claim_from(claim, n, date(2024, 6, 1))
    }

    fn claim_from(claim: &str, n: usize, start: NaiveDate) -> Vec<RawSplit> {
        (0..n)
            .map(|i| {
                raw(
                    &format!("{}-s{}", claim, i),
                    &format!("{}-pay{}", claim, i % 3),
                    Some(claim),
                    "proc-1",
                    10.0,
                    start + Duration::days((i % 4) as i64),
                )
            })
            .collect()
    }

    fn monitor() -> IntegrityMonitor {
        IntegrityMonitor::new(IntegrityConfig::default(), 0.01)
    }

    #[test]
    fn test_merged_median() {
        let empty: [f64; 0] = [];
        assert_eq!(merged_median(SortedView::all(&empty), SortedView::all(&empty)), None);

        let history = [1.0, 3.0];
        let peers = [2.0];
        assert_eq!(merged_median(SortedView::all(&history), SortedView::all(&peers)), Some(2.0));

        // Even count: mean of the two middle values
        let peers = [2.0, 4.0];
        assert_eq!(merged_median(SortedView::all(&history), SortedView::all(&peers)), Some(2.5));

        // The subject's own value is left out exactly once
        let current = [3.0, 3.0, 300.0];
        let without_self = SortedView::without(&current, 300.0);
        assert_eq!(without_self.len(), 2);
        assert_eq!(merged_median(SortedView::all(&empty), without_self), Some(3.0));
        assert_eq!(SortedView::without(&current, 3.0).get(1), 300.0);
    }

    #[test]
    fn test_offsetting_splits_flagged_as_symmetry() {
        let on = date(2024, 6, 1);
        let splits: Vec<RawSplit> = (0..10)
            .map(|i| {
                let amount = if i % 2 == 0 { 1000.0 } else { -1000.0 };
                raw(&format!("s{}", i), "pay-zero", Some("claim-7"), "proc-9", amount, on)
            })
            .collect();

        // The splits cancel out exactly
        let net: f64 = splits.iter().map(|s| s.amount).sum();
        assert_eq!(net, 0.0);

        let report = monitor().evaluate(&splits, &[], &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::SymmetryAnomaly), 1);
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.payment_id.as_deref(), Some("pay-zero"));
        assert_eq!(anomaly.claim_id.as_deref(), Some("claim-7"));
        assert_eq!(anomaly.split_count, 10);
        assert_eq!(anomaly.threshold, 6.0);
        assert_eq!(anomaly.active_day_span, 1);
        assert!(report.is_flagged("proc-9"));

        // Single claim with no history: never judged on volume
        assert_eq!(report.insufficient_data.len(), 1);

        println!("✅ {}", anomaly.summary());
    }

    #[test]
    fn test_ordinary_refund_not_symmetric() {
        let on = date(2024, 6, 1);
        let splits = vec![
            raw("s1", "pay-1", None, "proc-1", 50.0, on),
            raw("s2", "pay-1", None, "proc-2", -50.0, on),
        ];

        let report = monitor().evaluate(&splits, &[], &RunControl::unbounded()).unwrap();
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_volume_anomaly_against_history() {
        let history = claim_history(20, 3);
        let splits = claim_with_splits("claim-runaway", 300);

        let report = monitor().evaluate(&splits, &history, &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::VolumeAnomaly), 1);
        let anomaly = report
            .anomalies
            .iter()
            .find(|a| a.pattern_type == PatternType::VolumeAnomaly)
            .unwrap();
        assert_eq!(anomaly.split_count, 300);
        assert_eq!(anomaly.baseline_median, Some(3.0));
        assert_eq!(anomaly.threshold, 30.0);
        assert_eq!(anomaly.payment_count, 3);
        assert_eq!(anomaly.active_day_span, 4);
    }

    #[test]
    fn test_normal_claim_not_flagged() {
        let history = claim_history(20, 3);
        let splits = claim_with_splits("claim-normal", 5);

        let report = monitor().evaluate(&splits, &history, &RunControl::unbounded()).unwrap();

        assert!(report.anomalies.is_empty());
        assert!(report.insufficient_data.is_empty());
        assert_eq!(report.claims_evaluated, 1);
    }

    #[test]
    fn test_cold_start_is_insufficient_data() {
        let history = claim_history(2, 3);
        let splits = claim_with_splits("claim-new", 300);

        let report = monitor().evaluate(&splits, &history, &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::VolumeAnomaly), 0);
        assert_eq!(report.insufficient_data.len(), 1);
        assert_eq!(report.insufficient_data[0].samples, 2);
    }

    #[test]
    fn test_baseline_window_excludes_old_history() {
        let mut history = claim_history(20, 3);
        for sample in &mut history {
            sample.first_date = date(2022, 1, 1);
        }
        let splits = claim_with_splits("claim-runaway", 300);

        let report = monitor().evaluate(&splits, &history, &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::VolumeAnomaly), 0);
        assert_eq!(report.insufficient_data.len(), 1);
    }

    #[test]
    fn test_early_runaway_judged_against_later_peers() {
        let mut splits = claim_from("claim-runaway", 300, date(2024, 1, 1));
        for i in 0..20 {
            splits.extend(claim_from(
                &format!("claim-peer-{}", i),
                3,
                date(2024, 1, 6) + Duration::days(i),
            ));
        }

        let report = monitor().evaluate(&splits, &[], &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::VolumeAnomaly), 1);
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.claim_id.as_deref(), Some("claim-runaway"));
        assert_eq!(anomaly.baseline_median, Some(3.0));
        assert_eq!(anomaly.threshold, 30.0);
        assert!(report.insufficient_data.is_empty());
        assert_eq!(report.claims_evaluated, 21);

        println!("✅ {}", anomaly.summary());
    }

    #[test]
    fn test_history_superseded_by_current_run() {
        // Stale history for the same claim must not stand in as its own peer
        let mut history = claim_history(4, 3);
        history.push(BaselineSample {
            kind: BaselineKind::Claim,
            subject_id: "claim-runaway".to_string(),
            first_date: date(2024, 3, 1),
            split_count: 3,
            offsetting_count: 0,
        });
        let splits = claim_with_splits("claim-runaway", 300);

        let report = monitor().evaluate(&splits, &history, &RunControl::unbounded()).unwrap();

        assert_eq!(report.count_by_pattern(PatternType::VolumeAnomaly), 0);
        assert_eq!(report.insufficient_data[0].samples, 4);
    }

    #[test]
    fn test_cancelled_run_stops() {
        let control = RunControl::unbounded();
        control.cancel();

        let splits = claim_with_splits("claim-1", 3);
        assert!(monitor().evaluate(&splits, &[], &control).is_err());
    }
}

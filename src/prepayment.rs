// 💵 Prepayment View - Unallocated money by unearned classification
// The only place in the engine that branches on UnearnedType.

use crate::model::{round_cents, UnearnedType};
use crate::normalizer::UnallocatedSplit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for splits whose payment carries no patient
pub const UNKNOWN_PATIENT: &str = "(unknown)";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientPrepayment {
    pub patient_id: String,
    pub by_type: BTreeMap<UnearnedType, f64>,
    pub split_count: usize,
}

impl PatientPrepayment {
    pub fn total(&self) -> f64 {
        round_cents(self.by_type.values().sum())
    }

    pub fn amount(&self, unearned_type: UnearnedType) -> f64 {
        self.by_type.get(&unearned_type).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepaymentReport {
    pub patients: Vec<PatientPrepayment>,
    pub totals: BTreeMap<UnearnedType, f64>,
    pub split_count: usize,

    /// Splits left on the default classification. The source system labels
    /// most unallocated money this way, so a high share means the type is
    /// not trustworthy for this snapshot.
    pub default_classified: usize,
}

impl PrepaymentReport {
    pub fn from_unallocated(splits: &[UnallocatedSplit]) -> Self {
        let mut by_patient: BTreeMap<&str, PatientPrepayment> = BTreeMap::new();
        let mut report = PrepaymentReport::default();

        for split in splits {
            let patient_id = split.patient_id.as_deref().unwrap_or(UNKNOWN_PATIENT);
            let patient = by_patient
                .entry(patient_id)
                .or_insert_with(|| PatientPrepayment {
                    patient_id: patient_id.to_string(),
                    ..Default::default()
                });

            let slot = patient.by_type.entry(split.unearned_type).or_insert(0.0);
            *slot = round_cents(*slot + split.amount);
            patient.split_count += 1;

            let total = report.totals.entry(split.unearned_type).or_insert(0.0);
            *total = round_cents(*total + split.amount);
            report.split_count += 1;
            if split.unearned_type == UnearnedType::default() {
                report.default_classified += 1;
            }
        }

        report.patients = by_patient.into_values().collect();
        report
    }

    pub fn total(&self) -> f64 {
        round_cents(self.totals.values().sum())
    }

    /// Fraction of unallocated splits on the default classification
    pub fn default_share(&self) -> Option<f64> {
        if self.split_count == 0 {
            None
        } else {
            Some(self.default_classified as f64 / self.split_count as f64)
        }
    }

    pub fn summary(&self) -> String {
        let share = self
            .default_share()
            .map(|s| format!("{:.0}%", s * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Unallocated: ${:.2} across {} splits, {} patients ({} default-classified)",
            self.total(),
            self.split_count,
            self.patients.len(),
            share
        )
    }
}

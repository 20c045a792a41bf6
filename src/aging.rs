// ⏳ Aging Aggregator - Outstanding balance by age, as of a reference date
//
// procedure → patient → family
//
// Buckets: 0-30, 31-60, 61-90, 91+ days since the procedure date.
// Only positive balances contribute. The family roll-up is a plain sum of
// patient buckets, so it can be merged in any order.

use crate::balance::ProcedureBalance;
use crate::model::round_cents;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// RISK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Current,
    LowRisk,
    MediumRisk,
    HighRisk,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Current => "Current",
            RiskLevel::LowRisk => "LowRisk",
            RiskLevel::MediumRisk => "MediumRisk",
            RiskLevel::HighRisk => "HighRisk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Patient,
    Family,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Patient => "Patient",
            SubjectKind::Family => "Family",
        }
    }
}

// ============================================================================
// AGING BUCKET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBucket {
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub as_of_date: NaiveDate,
    pub bucket_0_30: f64,
    pub bucket_31_60: f64,
    pub bucket_61_90: f64,
    pub bucket_91_plus: f64,
    pub oldest_balance_days: i64,
    pub procedure_count: usize,

    /// At least one contributing procedure is under integrity review
    pub under_integrity_review: bool,

    /// At least one contributing procedure has a reduced-confidence balance
    pub reduced_confidence: bool,
}

impl AgingBucket {
    pub fn empty(subject_id: &str, subject_kind: SubjectKind, as_of_date: NaiveDate) -> Self {
        AgingBucket {
            subject_id: subject_id.to_string(),
            subject_kind,
            as_of_date,
            bucket_0_30: 0.0,
            bucket_31_60: 0.0,
            bucket_61_90: 0.0,
            bucket_91_plus: 0.0,
            oldest_balance_days: 0,
            procedure_count: 0,
            under_integrity_review: false,
            reduced_confidence: false,
        }
    }

    /// Total outstanding balance. Always the sum of the four buckets.
    pub fn total(&self) -> f64 {
        round_cents(self.bucket_0_30 + self.bucket_31_60 + self.bucket_61_90 + self.bucket_91_plus)
    }

    pub fn add(&mut self, age_days: i64, amount: f64) {
        let slot = match age_days {
            i64::MIN..=30 => &mut self.bucket_0_30,
            31..=60 => &mut self.bucket_31_60,
            61..=90 => &mut self.bucket_61_90,
            _ => &mut self.bucket_91_plus,
        };
        *slot = round_cents(*slot + amount);
        self.oldest_balance_days = self.oldest_balance_days.max(age_days);
        self.procedure_count += 1;
    }

    /// Fold another subject's buckets into this one
    pub fn merge(&mut self, other: &AgingBucket) {
        self.bucket_0_30 = round_cents(self.bucket_0_30 + other.bucket_0_30);
        self.bucket_31_60 = round_cents(self.bucket_31_60 + other.bucket_31_60);
        self.bucket_61_90 = round_cents(self.bucket_61_90 + other.bucket_61_90);
        self.bucket_91_plus = round_cents(self.bucket_91_plus + other.bucket_91_plus);
        self.oldest_balance_days = self.oldest_balance_days.max(other.oldest_balance_days);
        self.procedure_count += other.procedure_count;
        self.under_integrity_review |= other.under_integrity_review;
        self.reduced_confidence |= other.reduced_confidence;
    }

    pub fn risk(&self) -> RiskLevel {
        if self.bucket_91_plus > 0.0 {
            RiskLevel::HighRisk
        } else if self.bucket_61_90 > 0.0 {
            RiskLevel::MediumRisk
        } else if self.bucket_31_60 > 0.0 {
            RiskLevel::LowRisk
        } else {
            RiskLevel::Current
        }
    }

    pub fn collections_flag(&self) -> bool {
        self.risk() == RiskLevel::HighRisk
    }
}

// ============================================================================
// AGING REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgingReport {
    pub as_of_date: Option<NaiveDate>,
    pub patients: Vec<AgingBucket>,
    pub families: Vec<AgingBucket>,
}

impl AgingReport {
    pub fn patient(&self, patient_id: &str) -> Option<&AgingBucket> {
        self.patients.iter().find(|b| b.subject_id == patient_id)
    }

    pub fn family(&self, family_id: &str) -> Option<&AgingBucket> {
        self.families.iter().find(|b| b.subject_id == family_id)
    }

    pub fn collections_families(&self) -> Vec<&AgingBucket> {
        self.families.iter().filter(|b| b.collections_flag()).collect()
    }

    pub fn total_outstanding(&self) -> f64 {
        round_cents(self.families.iter().map(AgingBucket::total).sum())
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct AgingAggregator {
    as_of_date: NaiveDate,
}

impl AgingAggregator {
    pub fn new(as_of_date: NaiveDate) -> Self {
        AgingAggregator { as_of_date }
    }

    /// Age of a procedure in days, None when it lies after the reference date
    pub fn age_days(&self, procedure_date: NaiveDate) -> Option<i64> {
        let age = (self.as_of_date - procedure_date).num_days();
        if age < 0 {
            None
        } else {
            Some(age)
        }
    }

    /// Bucket one patient's procedure balances
    pub fn patient_bucket(&self, patient_id: &str, balances: &[&ProcedureBalance]) -> AgingBucket {
        let mut bucket = AgingBucket::empty(patient_id, SubjectKind::Patient, self.as_of_date);

        for balance in balances {
            if !balance.is_outstanding() {
                continue;
            }
            let Some(age) = self.age_days(balance.procedure_date) else {
                continue;
            };
            bucket.add(age, balance.remaining_balance);
            bucket.under_integrity_review |= balance.under_integrity_review;
            bucket.reduced_confidence |= balance.reduced_confidence;
        }

        bucket
    }

    /// Patient and family buckets for every patient that has a balance record.
    ///
    /// `families` maps patient → family; a patient missing from it forms a
    /// family of its own so no balance is lost from the family totals.
    pub fn aggregate(
        &self,
        balances: &[ProcedureBalance],
        families: &HashMap<String, String>,
    ) -> AgingReport {
        let mut by_patient: BTreeMap<&str, Vec<&ProcedureBalance>> = BTreeMap::new();
        for balance in balances {
            by_patient
                .entry(balance.patient_id.as_str())
                .or_default()
                .push(balance);
        }

        let patients: Vec<AgingBucket> = by_patient
            .iter()
            .map(|(patient_id, balances)| self.patient_bucket(patient_id, balances))
            .collect();

        let mut by_family: BTreeMap<String, AgingBucket> = BTreeMap::new();
        for bucket in &patients {
            let family_id = families
                .get(&bucket.subject_id)
                .cloned()
                .unwrap_or_else(|| bucket.subject_id.clone());
            by_family
                .entry(family_id.clone())
                .or_insert_with(|| AgingBucket::empty(&family_id, SubjectKind::Family, self.as_of_date))
                .merge(bucket);
        }

        AgingReport {
            as_of_date: Some(self.as_of_date),
            patients,
            families: by_family.into_values().collect(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 🦷 Ledger Model - Procedures, payments, claims, adjustments
// Raw facts as delivered by the source feeds, plus the normalized LedgerEntry
//
// Everything here is read-only input. The engine never posts or edits a fact;
// a reversal is always a new opposite-sign record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tolerance for money comparisons (one cent)
pub const MONEY_TOLERANCE: f64 = 0.01;

/// Round to whole cents so sums are stable regardless of entry order
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ============================================================================
// PROCEDURE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureStatus {
    Planned,
    Completed,
    ExistingCurrent,
    ExistingOther,
    Referred,
    Deleted,
    Condition,
    Invalid,
}

impl ProcedureStatus {
    /// Statuses that describe work done elsewhere or a finding, never billed here
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcedureStatus::ExistingCurrent
                | ProcedureStatus::ExistingOther
                | ProcedureStatus::Referred
                | ProcedureStatus::Condition
        )
    }

    /// Statuses on which any payment activity is unexpected
    pub fn expects_no_payment(&self) -> bool {
        matches!(self, ProcedureStatus::Planned | ProcedureStatus::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub patient_id: String,

    /// Family as recorded on the procedure feed. The directory wins when both exist.
    #[serde(default)]
    pub family_id: Option<String>,

    pub billed_fee: f64,
    pub procedure_date: NaiveDate,
    pub status: ProcedureStatus,
    pub code: String,

    #[serde(default)]
    pub is_administrative: bool,

    /// Set once, when the procedure transitions to Completed
    #[serde(default)]
    pub completion_date: Option<NaiveDate>,
}

impl Procedure {
    /// Flagged on the feed, or its code is in the excluded set
    pub fn is_administrative_under(&self, administrative_codes: &BTreeSet<String>) -> bool {
        self.is_administrative || administrative_codes.contains(&self.code)
    }
}

// ============================================================================
// PAYMENTS & SPLITS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayerType {
    Patient,
    Insurance,
    /// Income transfer: moves money between procedures or out of unearned
    Transfer,
}

/// Unearned classification carried on every split.
///
/// `Standard` is the default for feeds that leave the column empty, and feeds
/// that spell it `None` map onto it. The source system is known to mislabel most
/// unallocated money with its default type, so balance and aging never branch on
/// this tag; only the prepayment view does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum UnearnedType {
    #[default]
    #[serde(alias = "None")]
    Standard,
    Prepayment,
    TreatmentPlanPrepayment,
    Unallocated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub id: String,
    pub payment_id: String,

    /// None = unlinked (transfer / unearned). Never contributes to a balance.
    #[serde(default)]
    pub procedure_id: Option<String>,

    pub amount: f64,

    #[serde(default)]
    pub unearned_type: UnearnedType,

    /// Claim this split was generated against, when the source tracks it
    #[serde(default)]
    pub claim_id: Option<String>,

    /// Overrides the payment date for this split
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub total_amount: f64,
    pub date: NaiveDate,
    pub payer_type: PayerType,

    #[serde(default)]
    pub patient_id: Option<String>,

    #[serde(default)]
    pub splits: Vec<Split>,
}

impl Payment {
    pub fn split_total(&self) -> f64 {
        round_cents(self.splits.iter().map(|s| s.amount).sum())
    }

    /// Difference between split total and payment total, if beyond tolerance
    pub fn split_mismatch(&self, tolerance: f64) -> Option<f64> {
        let difference = round_cents(self.split_total() - self.total_amount);
        if difference.abs() > tolerance {
            Some(difference)
        } else {
            None
        }
    }
}

// ============================================================================
// INSURANCE CLAIM LINES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    NotReceived,
    Received,
    Supplemental,
    /// Capitation line still open
    CapClaim,
    /// Capitation line closed
    CapComplete,
    Preauth,
}

impl ClaimStatus {
    /// Capitation plans are paid a fixed periodic amount, not per line
    pub fn is_capitation(&self) -> bool {
        matches!(self, ClaimStatus::CapClaim | ClaimStatus::CapComplete)
    }

    /// Statuses whose write-off reduces the procedure balance
    pub fn applies_write_off(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Received
                | ClaimStatus::Supplemental
                | ClaimStatus::CapClaim
                | ClaimStatus::CapComplete
        )
    }

    /// Statuses whose actual payment is netted against the procedure
    pub fn applies_payment(&self) -> bool {
        matches!(self, ClaimStatus::Received | ClaimStatus::Supplemental)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceClaimLine {
    pub id: String,
    pub procedure_id: String,
    pub claim_id: String,
    pub status: ClaimStatus,
    pub billed_amount: f64,

    #[serde(default)]
    pub estimated_payment: f64,

    #[serde(default)]
    pub actual_payment: f64,

    #[serde(default)]
    pub write_off: f64,

    pub claim_date: NaiveDate,

    /// Overrides the claim date for money on this line
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,

    /// Insurance check / EOB this line was paid on
    #[serde(default)]
    pub claim_payment_id: Option<String>,

    #[serde(default)]
    pub plan_id: Option<String>,
}

// ============================================================================
// ADJUSTMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: String,
    pub procedure_id: String,

    #[serde(default)]
    pub patient_id: Option<String>,

    /// Positive raises the balance, negative (discounts) lowers it
    pub amount: f64,

    pub adjustment_type: String,
    pub date: NaiveDate,
}

// ============================================================================
// LEDGER ENTRY (normalized)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    PatientPayment,
    PatientAdjustment,
    InsurancePayment,
    InsuranceWriteOff,
    InternalTransfer,
}

/// One monetary fact against one procedure.
///
/// `signed_amount` keeps the sign of the source record: money received is
/// positive, a refund or reversal is negative, an adjustment carries its own sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub procedure_id: String,
    pub kind: EntryKind,
    pub signed_amount: f64,
    pub entry_date: NaiveDate,

    #[serde(default)]
    pub source_payment_id: Option<String>,

    #[serde(default)]
    pub source_split_id: Option<String>,

    #[serde(default)]
    pub source_claim_id: Option<String>,

    #[serde(default)]
    pub source_adjustment_id: Option<String>,
}

// ============================================================================
// REFERENCE DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub patient_id: String,
    pub family_id: String,

    /// Display only
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Patient → family map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FamilyDirectory {
    members: HashMap<String, String>,
}

impl FamilyDirectory {
    pub fn from_entries(entries: &[DirectoryEntry]) -> Self {
        FamilyDirectory {
            members: entries
                .iter()
                .map(|e| (e.patient_id.clone(), e.family_id.clone()))
                .collect(),
        }
    }

    pub fn insert(&mut self, patient_id: &str, family_id: &str) {
        self.members
            .insert(patient_id.to_string(), family_id.to_string());
    }

    pub fn family_of(&self, patient_id: &str) -> Option<&str> {
        self.members.get(patient_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeScheduleEntry {
    pub code: String,
    pub standard_fee: f64,
}

/// Read-only code → standard fee reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    fees: HashMap<String, f64>,
}

impl FeeSchedule {
    pub fn from_entries(entries: &[FeeScheduleEntry]) -> Self {
        FeeSchedule {
            fees: entries
                .iter()
                .map(|e| (e.code.clone(), e.standard_fee))
                .collect(),
        }
    }

    pub fn standard_fee(&self, code: &str) -> Option<f64> {
        self.fees.get(code).copied()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.fees.contains_key(code)
    }

    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaselineKind {
    Claim,
    Payment,
}

/// Historical split statistics for one claim or payment, used as integrity baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSample {
    pub kind: BaselineKind,
    pub subject_id: String,
    pub first_date: NaiveDate,
    pub split_count: usize,

    /// Splits sitting at the symmetric min/max extremes (payments only)
    #[serde(default)]
    pub offsetting_count: usize,
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One consistent, read-only snapshot of every input a run consumes
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub procedures: Vec<Procedure>,
    pub payments: Vec<Payment>,

    /// Splits whose payment is not in the payment feed
    pub detached_splits: Vec<Split>,

    pub claim_lines: Vec<InsuranceClaimLine>,
    pub adjustments: Vec<Adjustment>,
    pub directory: FamilyDirectory,
    pub fee_schedule: FeeSchedule,
    pub history: Vec<BaselineSample>,
}

impl LedgerSnapshot {
    pub fn procedure_index(&self) -> HashMap<&str, &Procedure> {
        self.procedures.iter().map(|p| (p.id.as_str(), p)).collect()
    }

    /// SHA-256 over every monetary fact, identifying the snapshot a run consumed
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        let mut procedures: Vec<&Procedure> = self.procedures.iter().collect();
        procedures.sort_by(|a, b| a.id.cmp(&b.id));
        for p in procedures {
            hasher.update(format!(
                "P|{}|{}|{:.2}|{}|{:?}|{}\n",
                p.id, p.patient_id, p.billed_fee, p.procedure_date, p.status, p.code
            ));
        }

        let mut payments: Vec<&Payment> = self.payments.iter().collect();
        payments.sort_by(|a, b| a.id.cmp(&b.id));
        for pay in payments {
            hasher.update(format!("Y|{}|{:.2}|{}\n", pay.id, pay.total_amount, pay.date));
            for s in &pay.splits {
                hasher.update(format!(
                    "S|{}|{}|{:.2}\n",
                    s.id,
                    s.procedure_id.as_deref().unwrap_or("-"),
                    s.amount
                ));
            }
        }

        let mut lines: BTreeMap<&str, &InsuranceClaimLine> = BTreeMap::new();
        for line in &self.claim_lines {
            lines.insert(line.id.as_str(), line);
        }
        for line in lines.values() {
            hasher.update(format!(
                "C|{}|{}|{:?}|{:.2}|{:.2}\n",
                line.id, line.procedure_id, line.status, line.actual_payment, line.write_off
            ));
        }

        let mut adjustments: Vec<&Adjustment> = self.adjustments.iter().collect();
        adjustments.sort_by(|a, b| a.id.cmp(&b.id));
        for adj in adjustments {
            hasher.update(format!(
                "A|{}|{}|{:.2}|{}\n",
                adj.id, adj.procedure_id, adj.amount, adj.date
            ));
        }

        format!("{:x}", hasher.finalize())
    }
}

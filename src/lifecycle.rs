// 🔁 Lifecycle Classifier - Procedure status × payment outcome
//
// Success rule:
//   status == Completed AND
//     ((billed_fee == 0 AND not administrative) OR (billed_fee > 0 AND ratio >= 0.95))
//
// Administrative codes leave the success/failure denominator entirely.

use crate::balance::{PaymentRatio, ProcedureBalance};
use crate::config::EngineConfig;
use crate::model::{Procedure, ProcedureStatus, MONEY_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// STATES & FLAGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleState {
    Planned,
    CompletedSuccess,
    CompletedUnpaid,
    CompletedUnderpaid,
    CompletedOverpaid,
    Excluded,
    /// ExistingCurrent / ExistingOther / Referred / Condition. Permanent.
    Terminal,
    Deleted,
}

impl LifecycleState {
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            LifecycleState::CompletedSuccess
                | LifecycleState::CompletedUnpaid
                | LifecycleState::CompletedUnderpaid
                | LifecycleState::CompletedOverpaid
        )
    }

    /// Overpaid still meets the success rule (ratio >= success ratio)
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            LifecycleState::CompletedSuccess | LifecycleState::CompletedOverpaid
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, LifecycleState::Terminal | LifecycleState::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Planned => "Planned",
            LifecycleState::CompletedSuccess => "CompletedSuccess",
            LifecycleState::CompletedUnpaid => "CompletedUnpaid",
            LifecycleState::CompletedUnderpaid => "CompletedUnderpaid",
            LifecycleState::CompletedOverpaid => "CompletedOverpaid",
            LifecycleState::Excluded => "Excluded",
            LifecycleState::Terminal => "Terminal",
            LifecycleState::Deleted => "Deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleFlag {
    /// Zero-fee procedure that received money
    ZeroFeePaid,
    /// Money recorded against a Planned or Deleted procedure
    UnexpectedPayment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub procedure_id: String,
    pub state: LifecycleState,
    pub flags: BTreeSet<LifecycleFlag>,

    /// False for Excluded and every non-completed state
    pub counts_toward_success_rate: bool,
}

impl Classification {
    pub fn has_flag(&self, flag: LifecycleFlag) -> bool {
        self.flags.contains(&flag)
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct LifecycleClassifier {
    success_ratio: f64,
    overpaid_ratio: f64,
    administrative_codes: BTreeSet<String>,
}

impl LifecycleClassifier {
    pub fn new(success_ratio: f64, overpaid_ratio: f64) -> Self {
        LifecycleClassifier {
            success_ratio,
            overpaid_ratio,
            administrative_codes: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        LifecycleClassifier {
            success_ratio: config.success_ratio,
            overpaid_ratio: config.overpaid_ratio,
            administrative_codes: config.administrative_codes.clone(),
        }
    }

    pub fn classify(&self, procedure: &Procedure, balance: &ProcedureBalance) -> Classification {
        let mut flags = BTreeSet::new();
        let has_money = balance.entry_count > 0 && balance.total_paid.abs() > MONEY_TOLERANCE;

        if procedure.status.expects_no_payment() && has_money {
            flags.insert(LifecycleFlag::UnexpectedPayment);
        }

        let state = match procedure.status {
            ProcedureStatus::Deleted => LifecycleState::Deleted,
            ProcedureStatus::Planned => LifecycleState::Planned,
            ProcedureStatus::Invalid => LifecycleState::Excluded,
            status if status.is_terminal() => LifecycleState::Terminal,
            _ if procedure.is_administrative_under(&self.administrative_codes) => {
                LifecycleState::Excluded
            }
            _ => self.classify_completed(balance, &mut flags),
        };

        Classification {
            procedure_id: procedure.id.clone(),
            state,
            flags,
            counts_toward_success_rate: state.is_completed(),
        }
    }

    fn classify_completed(
        &self,
        balance: &ProcedureBalance,
        flags: &mut BTreeSet<LifecycleFlag>,
    ) -> LifecycleState {
        match balance.payment_ratio {
            PaymentRatio::NotApplicable => {
                if balance.total_paid > MONEY_TOLERANCE {
                    flags.insert(LifecycleFlag::ZeroFeePaid);
                }
                LifecycleState::CompletedSuccess
            }
            PaymentRatio::Ratio(ratio) => {
                if ratio > self.overpaid_ratio {
                    LifecycleState::CompletedOverpaid
                } else if ratio >= self.success_ratio {
                    LifecycleState::CompletedSuccess
                } else if balance.total_paid <= MONEY_TOLERANCE {
                    LifecycleState::CompletedUnpaid
                } else {
                    LifecycleState::CompletedUnderpaid
                }
            }
        }
    }
}

// ============================================================================
// SUCCESS RATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessRate {
    pub successes: usize,
    pub failures: usize,
    pub excluded: usize,
}

impl SuccessRate {
    pub fn from_classifications(classifications: &[Classification]) -> Self {
        let mut rate = SuccessRate::default();
        for c in classifications {
            if c.state == LifecycleState::Excluded {
                rate.excluded += 1;
            } else if c.counts_toward_success_rate {
                if c.state.is_success() {
                    rate.successes += 1;
                } else {
                    rate.failures += 1;
                }
            }
        }
        rate
    }

    /// None when nothing counts toward the denominator
    pub fn rate(&self) -> Option<f64> {
        let denominator = self.successes + self.failures;
        if denominator == 0 {
            None
        } else {
            Some(self.successes as f64 / denominator as f64)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceCalculator;
    use crate::model::{EntryKind, LedgerEntry};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn procedure(fee: f64, status: ProcedureStatus, code: &str) -> Procedure {
        Procedure {
            id: "proc-1".to_string(),
            patient_id: "pat-1".to_string(),
            family_id: None,
            billed_fee: fee,
            procedure_date: date(2024, 4, 1),
            status,
            code: code.to_string(),
            is_administrative: false,
            completion_date: None,
        }
    }

    fn paid(amount: f64) -> Vec<LedgerEntry> {
        vec![LedgerEntry {
            procedure_id: "proc-1".to_string(),
            kind: EntryKind::PatientPayment,
            signed_amount: amount,
            entry_date: date(2024, 4, 2),
            source_payment_id: Some("pay-1".to_string()),
            source_split_id: Some("s-1".to_string()),
            source_claim_id: None,
            source_adjustment_id: None,
        }]
    }

    fn classify(procedure: &Procedure, entries: &[LedgerEntry]) -> Classification {
        let classifier = LifecycleClassifier::new(0.95, 1.05);
        let balance = BalanceCalculator::new().calculate(procedure, entries, date(2024, 6, 30));
        classifier.classify(procedure, &balance)
    }

    #[test]
    fn test_boundary_ratio_is_success() {
        let p = procedure(500.0, ProcedureStatus::Completed, "D2391");
        let c = classify(&p, &paid(475.0));
        assert_eq!(c.state, LifecycleState::CompletedSuccess);
        assert!(c.counts_toward_success_rate);
    }

    #[test]
    fn test_zero_fee_unpaid_is_success() {
        let p = procedure(0.0, ProcedureStatus::Completed, "D0120");
        let c = classify(&p, &[]);
        assert_eq!(c.state, LifecycleState::CompletedSuccess);
        assert!(c.flags.is_empty());
    }

    #[test]
    fn test_zero_fee_paid_is_flagged() {
        let p = procedure(0.0, ProcedureStatus::Completed, "D0120");
        let c = classify(&p, &paid(20.0));
        assert!(c.has_flag(LifecycleFlag::ZeroFeePaid));
    }

    #[test]
    fn test_completed_outcomes() {
        let p = procedure(200.0, ProcedureStatus::Completed, "D2391");
        assert_eq!(classify(&p, &[]).state, LifecycleState::CompletedUnpaid);
        assert_eq!(classify(&p, &paid(100.0)).state, LifecycleState::CompletedUnderpaid);
        assert_eq!(classify(&p, &paid(188.0)).state, LifecycleState::CompletedUnderpaid);
        assert_eq!(classify(&p, &paid(190.0)).state, LifecycleState::CompletedSuccess);
        assert_eq!(classify(&p, &paid(230.0)).state, LifecycleState::CompletedOverpaid);
    }

    #[test]
    fn test_administrative_code_excluded() {
        let classifier =
            LifecycleClassifier::from_config(&EngineConfig::for_date(date(2024, 6, 30)).with_administrative_codes(["D9986"]));
        let p = procedure(0.0, ProcedureStatus::Completed, "D9986");
        let balance = BalanceCalculator::new().calculate(&p, &[], date(2024, 6, 30));

        let c = classifier.classify(&p, &balance);
        assert_eq!(c.state, LifecycleState::Excluded);
        assert!(!c.counts_toward_success_rate);
    }

    #[test]
    fn test_non_billing_statuses() {
        assert_eq!(
            classify(&procedure(100.0, ProcedureStatus::Referred, "D7140"), &[]).state,
            LifecycleState::Terminal
        );
        assert_eq!(
            classify(&procedure(100.0, ProcedureStatus::ExistingOther, "D2750"), &[]).state,
            LifecycleState::Terminal
        );
        assert_eq!(
            classify(&procedure(100.0, ProcedureStatus::Invalid, "D2750"), &[]).state,
            LifecycleState::Excluded
        );
        assert!(LifecycleState::Terminal.is_permanent());
    }

    #[test]
    fn test_payment_on_deleted_or_planned_flagged() {
        let deleted = classify(&procedure(100.0, ProcedureStatus::Deleted, "D1110"), &paid(50.0));
        assert_eq!(deleted.state, LifecycleState::Deleted);
        assert!(deleted.has_flag(LifecycleFlag::UnexpectedPayment));

        let planned = classify(&procedure(100.0, ProcedureStatus::Planned, "D1110"), &paid(50.0));
        assert_eq!(planned.state, LifecycleState::Planned);
        assert!(planned.has_flag(LifecycleFlag::UnexpectedPayment));

        let quiet = classify(&procedure(100.0, ProcedureStatus::Planned, "D1110"), &[]);
        assert!(quiet.flags.is_empty());
    }

    #[test]
    fn test_success_rate_excludes_administrative() {
        let make = |state: LifecycleState| Classification {
            procedure_id: "p".to_string(),
            state,
            flags: BTreeSet::new(),
            counts_toward_success_rate: state.is_completed(),
        };
        let classifications = vec![
            make(LifecycleState::CompletedSuccess),
            make(LifecycleState::CompletedOverpaid),
            make(LifecycleState::CompletedUnpaid),
            make(LifecycleState::CompletedUnderpaid),
            make(LifecycleState::Excluded),
            make(LifecycleState::Planned),
        ];

        let rate = SuccessRate::from_classifications(&classifications);

        assert_eq!(rate.successes, 2);
        assert_eq!(rate.failures, 2);
        assert_eq!(rate.excluded, 1);
        assert_eq!(rate.rate(), Some(0.5));
        assert_eq!(SuccessRate::default().rate(), None);
    }
}

// ⚖️ Procedure Balance Calculator - Net every entry against the billed fee
//
// Following the formula:
//   remaining = billed_fee - patient payments - insurance payments
//               - insurance write-offs + adjustments (signed)
//
// One pure function for every balance the engine reports. Same entries in,
// same balance out, whatever order they arrive in.

use crate::config::EngineConfig;
use crate::model::{round_cents, EntryKind, LedgerEntry, Procedure, MONEY_TOLERANCE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYMENT RATIO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PaymentRatio {
    Ratio(f64),
    /// billed_fee == 0: a ratio has no meaning, never 0 and never an error
    NotApplicable,
}

impl PaymentRatio {
    pub fn value(&self) -> Option<f64> {
        match self {
            PaymentRatio::Ratio(r) => Some(*r),
            PaymentRatio::NotApplicable => None,
        }
    }
}

// ============================================================================
// PROCEDURE BALANCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureBalance {
    pub procedure_id: String,
    pub patient_id: String,
    pub procedure_date: NaiveDate,
    pub billed_fee: f64,

    pub patient_paid: f64,
    pub insurance_paid: f64,
    pub write_offs: f64,
    pub adjustments: f64,

    /// Fee settled by patients, transfers, insurers and write-offs
    pub total_paid: f64,
    pub remaining_balance: f64,
    pub payment_ratio: PaymentRatio,
    pub is_overpaid: bool,
    pub is_underpaid: bool,

    /// Estimated insurance still outstanding on unreceived claims
    pub insurance_pending: f64,

    pub entry_count: usize,

    /// A payment feeding this balance did not reconcile with its splits
    pub reduced_confidence: bool,

    /// Touched by an integrity anomaly
    pub under_integrity_review: bool,
}

impl ProcedureBalance {
    /// Any positive cent is owed; `remaining_balance` is already cent-rounded
    pub fn is_outstanding(&self) -> bool {
        self.remaining_balance > 0.0
    }

    /// What the patient is expected to owe once pending insurance arrives
    pub fn patient_portion(&self) -> f64 {
        round_cents((self.remaining_balance - self.insurance_pending).max(0.0))
    }

    pub fn summary(&self) -> String {
        let ratio = match self.payment_ratio {
            PaymentRatio::Ratio(r) => format!("{:.1}%", r * 100.0),
            PaymentRatio::NotApplicable => "n/a".to_string(),
        };
        format!(
            "Procedure {}: fee ${:.2}, settled ${:.2} ({}), remaining ${:.2}",
            self.procedure_id, self.billed_fee, self.total_paid, ratio, self.remaining_balance
        )
    }
}

// ============================================================================
// BALANCE CALCULATOR
// ============================================================================

pub struct BalanceCalculator {
    /// Tolerance for money comparisons (default: $0.01)
    pub tolerance: f64,

    /// Ratio above which a procedure is overpaid (default: 1.05)
    pub overpaid_ratio: f64,

    /// Ratio below which a paid procedure is underpaid (default: 0.50)
    pub underpaid_ratio: f64,
}

impl BalanceCalculator {
    pub fn new() -> Self {
        BalanceCalculator {
            tolerance: MONEY_TOLERANCE,
            overpaid_ratio: 1.05,
            underpaid_ratio: 0.50,
        }
    }

    pub fn with_thresholds(tolerance: f64, overpaid_ratio: f64, underpaid_ratio: f64) -> Self {
        BalanceCalculator {
            tolerance,
            overpaid_ratio,
            underpaid_ratio,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        BalanceCalculator::with_thresholds(
            config.tolerance,
            config.overpaid_ratio,
            config.underpaid_ratio,
        )
    }

    /// Balance of one procedure as of `as_of`. Entries dated later are ignored.
    pub fn calculate(
        &self,
        procedure: &Procedure,
        entries: &[LedgerEntry],
        as_of: NaiveDate,
    ) -> ProcedureBalance {
        let visible: Vec<&LedgerEntry> = entries
            .iter()
            .filter(|e| e.procedure_id == procedure.id && e.entry_date <= as_of)
            .collect();

        let patient_paid = self.sum_kinds(
            &visible,
            &[EntryKind::PatientPayment, EntryKind::InternalTransfer],
        );
        let insurance_paid = self.sum_kinds(&visible, &[EntryKind::InsurancePayment]);
        let write_offs = self.sum_kinds(&visible, &[EntryKind::InsuranceWriteOff]);
        let adjustments = self.sum_kinds(&visible, &[EntryKind::PatientAdjustment]);

        let total_paid = round_cents(patient_paid + insurance_paid + write_offs);
        let remaining_balance = round_cents(procedure.billed_fee - total_paid + adjustments);

        let (payment_ratio, is_overpaid, is_underpaid) = if procedure.billed_fee.abs() < self.tolerance {
            // Zero-fee procedures are judged on whether anything was paid at all
            (PaymentRatio::NotApplicable, total_paid > self.tolerance, false)
        } else {
            let ratio = total_paid / procedure.billed_fee;
            (
                PaymentRatio::Ratio(ratio),
                ratio > self.overpaid_ratio,
                ratio > 0.0 && ratio < self.underpaid_ratio,
            )
        };

        ProcedureBalance {
            procedure_id: procedure.id.clone(),
            patient_id: procedure.patient_id.clone(),
            procedure_date: procedure.procedure_date,
            billed_fee: procedure.billed_fee,
            patient_paid,
            insurance_paid,
            write_offs,
            adjustments,
            total_paid,
            remaining_balance,
            payment_ratio,
            is_overpaid,
            is_underpaid,
            insurance_pending: 0.0,
            entry_count: visible.len(),
            reduced_confidence: false,
            under_integrity_review: false,
        }
    }

    /// Sum a set of entry kinds. Amounts are ordered before summing so the
    /// result does not depend on the order entries were recorded in.
    fn sum_kinds(&self, entries: &[&LedgerEntry], kinds: &[EntryKind]) -> f64 {
        let mut amounts: Vec<f64> = entries
            .iter()
            .filter(|e| kinds.contains(&e.kind))
            .map(|e| e.signed_amount)
            .collect();
        amounts.sort_by(|a, b| a.total_cmp(b));
        round_cents(amounts.iter().sum())
    }

    /// Quick check that a procedure is settled to within tolerance
    pub fn is_settled(&self, procedure: &Procedure, entries: &[LedgerEntry], as_of: NaiveDate) -> bool {
        self.calculate(procedure, entries, as_of).remaining_balance.abs() < self.tolerance
    }
}

impl Default for BalanceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcedureStatus;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_procedure(fee: f64) -> Procedure {
        Procedure {
            id: "proc-1".to_string(),
            patient_id: "pat-1".to_string(),
            family_id: None,
            billed_fee: fee,
            procedure_date: date(2025, 1, 2),
            status: ProcedureStatus::Completed,
            code: "D2391".to_string(),
            is_administrative: false,
            completion_date: Some(date(2025, 1, 2)),
        }
    }

    fn create_test_entry(kind: EntryKind, amount: f64, on: NaiveDate) -> LedgerEntry {
        LedgerEntry {
            procedure_id: "proc-1".to_string(),
            kind,
            signed_amount: amount,
            entry_date: on,
            source_payment_id: None,
            source_split_id: None,
            source_claim_id: None,
            source_adjustment_id: None,
        }
    }

    #[test]
    fn test_boundary_success_ratio() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(500.0);
        let entries = vec![create_test_entry(EntryKind::PatientPayment, 475.0, date(2025, 1, 10))];

        let balance = calculator.calculate(&procedure, &entries, date(2025, 1, 31));

        assert_eq!(balance.remaining_balance, 25.0);
        assert_eq!(balance.payment_ratio, PaymentRatio::Ratio(0.95));
        assert!(!balance.is_overpaid);
        assert!(!balance.is_underpaid);

        println!("✅ Test passed: {}", balance.summary());
    }

    #[test]
    fn test_full_formula() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(1000.0);
        let on = date(2025, 1, 10);
        let entries = vec![
            create_test_entry(EntryKind::PatientPayment, 100.0, on),
            create_test_entry(EntryKind::InsurancePayment, 500.0, on),
            create_test_entry(EntryKind::InsuranceWriteOff, 200.0, on),
            create_test_entry(EntryKind::PatientAdjustment, -50.0, on),
            create_test_entry(EntryKind::InternalTransfer, 25.0, on),
        ];

        let balance = calculator.calculate(&procedure, &entries, date(2025, 1, 31));

        // 1000 - 100 - 500 - 200 - 25 + (-50) = 125
        assert_eq!(balance.remaining_balance, 125.0);
        assert_eq!(balance.patient_paid, 125.0);
        assert_eq!(balance.total_paid, 825.0);
        assert_eq!(balance.entry_count, 5);
    }

    #[test]
    fn test_single_cent_is_outstanding() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(100.0);
        let entries = vec![create_test_entry(EntryKind::PatientPayment, 99.99, date(2025, 1, 10))];

        let balance = calculator.calculate(&procedure, &entries, date(2025, 1, 31));

        assert_eq!(balance.remaining_balance, 0.01);
        assert!(balance.is_outstanding());

        println!("✅ One cent still owed: {}", balance.summary());
    }

    #[test]
    fn test_zero_fee_ratio_not_applicable() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(0.0);

        let unpaid = calculator.calculate(&procedure, &[], date(2025, 1, 31));
        assert_eq!(unpaid.payment_ratio, PaymentRatio::NotApplicable);
        assert!(!unpaid.is_overpaid);
        assert_eq!(unpaid.remaining_balance, 0.0);

        let paid = calculator.calculate(
            &procedure,
            &[create_test_entry(EntryKind::PatientPayment, 15.0, date(2025, 1, 5))],
            date(2025, 1, 31),
        );
        assert_eq!(paid.payment_ratio, PaymentRatio::NotApplicable);
        assert!(paid.is_overpaid);
    }

    #[test]
    fn test_over_and_underpaid_flags() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(100.0);
        let on = date(2025, 1, 10);

        let over = calculator.calculate(
            &procedure,
            &[create_test_entry(EntryKind::PatientPayment, 110.0, on)],
            date(2025, 1, 31),
        );
        assert!(over.is_overpaid);
        assert_eq!(over.remaining_balance, -10.0);

        let under = calculator.calculate(
            &procedure,
            &[create_test_entry(EntryKind::PatientPayment, 30.0, on)],
            date(2025, 1, 31),
        );
        assert!(under.is_underpaid);

        let unpaid = calculator.calculate(&procedure, &[], date(2025, 1, 31));
        assert!(!unpaid.is_underpaid);
    }

    #[test]
    fn test_future_entries_ignored() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(200.0);
        let as_of = date(2025, 1, 31);

        let before = calculator.calculate(&procedure, &[], as_of);
        let after = calculator.calculate(
            &procedure,
            &[create_test_entry(EntryKind::PatientPayment, 200.0, date(2025, 2, 1))],
            as_of,
        );

        assert_eq!(before, after);
        assert!(calculator.is_settled(
            &procedure,
            &[create_test_entry(EntryKind::PatientPayment, 200.0, date(2025, 2, 1))],
            date(2025, 2, 1)
        ));
    }

    #[test]
    fn test_reversal_nets_out() {
        let calculator = BalanceCalculator::new();
        let procedure = create_test_procedure(80.0);
        let on = date(2025, 1, 10);
        let entries = vec![
            create_test_entry(EntryKind::PatientPayment, 80.0, on),
            create_test_entry(EntryKind::PatientPayment, -80.0, on),
        ];

        let balance = calculator.calculate(&procedure, &entries, date(2025, 1, 31));
        assert_eq!(balance.remaining_balance, 80.0);
        assert_eq!(balance.total_paid, 0.0);
    }

    proptest! {
        #[test]
        fn property_balance_is_idempotent_and_order_free(
            fee_cents in 0i64..500_000,
            amounts in prop::collection::vec(-50_000i64..100_000, 0..40),
            rotate in 0usize..40,
        ) {
            let calculator = BalanceCalculator::new();
            let procedure = create_test_procedure(fee_cents as f64 / 100.0);
            let kinds = [
                EntryKind::PatientPayment,
                EntryKind::InsurancePayment,
                EntryKind::InsuranceWriteOff,
                EntryKind::PatientAdjustment,
                EntryKind::InternalTransfer,
            ];
            let entries: Vec<LedgerEntry> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| create_test_entry(kinds[i % kinds.len()], *a as f64 / 100.0, date(2025, 1, 10)))
                .collect();

            let as_of = date(2025, 1, 31);
            let first = calculator.calculate(&procedure, &entries, as_of);
            let second = calculator.calculate(&procedure, &entries, as_of);
            prop_assert_eq!(&first, &second);

            let mut rotated = entries.clone();
            if !rotated.is_empty() {
                let shift = rotate % rotated.len();
                rotated.rotate_left(shift);
            }
            let reordered = calculator.calculate(&procedure, &rotated, as_of);
            prop_assert_eq!(first.remaining_balance, reordered.remaining_balance);
        }
    }
}

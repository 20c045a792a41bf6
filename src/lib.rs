// Ledger Aging - Core Library
// Procedure ledger reconciliation, A/R aging and integrity monitoring.
// Exposes all modules for use in the CLI and tests.

pub mod model;
pub mod config;
pub mod error;
pub mod normalizer;   // Four record kinds → one LedgerEntry stream
pub mod balance;      // Per-procedure net balance
pub mod lifecycle;    // Billing outcome state machine
pub mod aging;        // Patient / family A/R buckets
pub mod integrity;    // Volume and symmetry anomaly detection
pub mod prepayment;   // Unallocated money by unearned classification
pub mod pipeline;     // One run over one snapshot
pub mod db;           // CSV feeds in, SQLite results out

// Re-export commonly used types
pub use model::{
    Procedure, ProcedureStatus, Payment, PayerType, Split, UnearnedType,
    InsuranceClaimLine, ClaimStatus, Adjustment, LedgerEntry, EntryKind,
    DirectoryEntry, FamilyDirectory, FeeSchedule, FeeScheduleEntry,
    BaselineSample, BaselineKind, LedgerSnapshot, MONEY_TOLERANCE, round_cents,
};
pub use config::{EngineConfig, IntegrityConfig};
pub use error::{
    EngineError, EngineResult, ErrorSummary, IssueCategory, RecordKind, RunIssue, Severity,
};
pub use normalizer::{LedgerNormalizer, NormalizedLedger, RawSplit, RawSplitSource, UnallocatedSplit};
pub use balance::{BalanceCalculator, PaymentRatio, ProcedureBalance};
pub use lifecycle::{Classification, LifecycleClassifier, LifecycleFlag, LifecycleState, SuccessRate};
pub use aging::{AgingAggregator, AgingBucket, AgingReport, RiskLevel, SubjectKind};
pub use integrity::{
    Anomaly, BaselineStatus, InsufficientBaseline, IntegrityMonitor, IntegrityReport, PatternType,
};
pub use prepayment::{PatientPrepayment, PrepaymentReport};
pub use pipeline::{ReconciliationPipeline, RunControl, RunReport};
pub use db::{
    Event, RunCounts,
    load_snapshot, setup_database, save_run, insert_event,
    get_events_for_entity, get_aging_buckets, get_run_counts, latest_run_for_date,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

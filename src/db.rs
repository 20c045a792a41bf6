// 🗄️ Feed Loading & Result Store
//
// CSV feed directory → LedgerSnapshot
// RunReport → SQLite (one transaction per run, all-or-nothing)

use crate::aging::{AgingBucket, SubjectKind};
use crate::model::{
    Adjustment, BaselineSample, DirectoryEntry, FamilyDirectory, FeeSchedule, FeeScheduleEntry,
    InsuranceClaimLine, LedgerSnapshot, PayerType, Payment, Procedure, Split, UnearnedType,
};
use crate::pipeline::RunReport;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

// ============================================================================
// FEED FILES
// ============================================================================

pub const PROCEDURES_FILE: &str = "procedures.csv";
pub const PAYMENTS_FILE: &str = "payments.csv";
pub const SPLITS_FILE: &str = "splits.csv";
pub const CLAIM_LINES_FILE: &str = "claim_lines.csv";
pub const ADJUSTMENTS_FILE: &str = "adjustments.csv";
pub const DIRECTORY_FILE: &str = "directory.csv";
pub const FEE_SCHEDULE_FILE: &str = "fee_schedule.csv";
pub const CLAIM_HISTORY_FILE: &str = "claim_history.csv";

/// Payment row as it appears on the feed (splits arrive in their own file)
#[derive(Debug, Deserialize)]
struct PaymentRecord {
    id: String,
    total_amount: f64,
    date: NaiveDate,
    payer_type: PayerType,
    #[serde(default)]
    patient_id: Option<String>,
}

/// Split row. An empty unearned column falls back to the default classification.
#[derive(Debug, Deserialize)]
struct SplitRecord {
    id: String,
    payment_id: String,
    #[serde(default)]
    procedure_id: Option<String>,
    amount: f64,
    #[serde(default)]
    unearned_type: Option<UnearnedType>,
    #[serde(default)]
    claim_id: Option<String>,
    #[serde(default)]
    effective_date: Option<NaiveDate>,
}

impl From<SplitRecord> for Split {
    fn from(record: SplitRecord) -> Self {
        Split {
            id: record.id,
            payment_id: record.payment_id,
            procedure_id: record.procedure_id,
            amount: record.amount,
            unearned_type: record.unearned_type.unwrap_or_default(),
            claim_id: record.claim_id,
            effective_date: record.effective_date,
        }
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;

    let mut rows = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let row: T = result
            .with_context(|| format!("Failed to deserialize row {} of {:?}", index + 1, path))?;
        rows.push(row);
    }

    Ok(rows)
}

fn read_optional_csv<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = dir.join(name);
    if path.exists() {
        read_csv(&path)
    } else {
        Ok(Vec::new())
    }
}

/// Load every feed file in `dir` into one snapshot.
///
/// Procedures and payments are required. Everything else may be absent; an
/// absent fee schedule or directory is judged by the pipeline, not here.
pub fn load_snapshot(dir: &Path) -> Result<LedgerSnapshot> {
    let procedures: Vec<Procedure> = read_csv(&dir.join(PROCEDURES_FILE))?;
    let payment_rows: Vec<PaymentRecord> = read_csv(&dir.join(PAYMENTS_FILE))?;
    let split_rows: Vec<SplitRecord> = read_optional_csv(dir, SPLITS_FILE)?;
    let claim_lines: Vec<InsuranceClaimLine> = read_optional_csv(dir, CLAIM_LINES_FILE)?;
    let adjustments: Vec<Adjustment> = read_optional_csv(dir, ADJUSTMENTS_FILE)?;
    let directory: Vec<DirectoryEntry> = read_optional_csv(dir, DIRECTORY_FILE)?;
    let fees: Vec<FeeScheduleEntry> = read_optional_csv(dir, FEE_SCHEDULE_FILE)?;
    let history: Vec<BaselineSample> = read_optional_csv(dir, CLAIM_HISTORY_FILE)?;

    let mut payments: Vec<Payment> = payment_rows
        .into_iter()
        .map(|row| Payment {
            id: row.id,
            total_amount: row.total_amount,
            date: row.date,
            payer_type: row.payer_type,
            patient_id: row.patient_id,
            splits: Vec::new(),
        })
        .collect();

    let index: HashMap<String, usize> = payments
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();

    // Split order within a payment follows the feed
    let mut detached_splits = Vec::new();
    for row in split_rows {
        let split = Split::from(row);
        match index.get(&split.payment_id) {
            Some(&i) => payments[i].splits.push(split),
            None => detached_splits.push(split),
        }
    }

    info!(
        dir = ?dir,
        procedures = procedures.len(),
        payments = payments.len(),
        detached_splits = detached_splits.len(),
        claim_lines = claim_lines.len(),
        adjustments = adjustments.len(),
        history = history.len(),
        "Loaded feed snapshot"
    );

    Ok(LedgerSnapshot {
        procedures,
        payments,
        detached_splits,
        claim_lines,
        adjustments,
        directory: FamilyDirectory::from_entries(&directory),
        fee_schedule: FeeSchedule::from_entries(&fees),
        history,
    })
}

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            as_of_date TEXT NOT NULL,
            window_start TEXT,
            window_end TEXT NOT NULL,
            snapshot_fingerprint TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            procedure_count INTEGER NOT NULL,
            total_outstanding REAL NOT NULL,
            success_rate REAL,
            anomaly_count INTEGER NOT NULL,
            requires_review INTEGER NOT NULL,
            issue_counts TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS balance_records (
            run_id TEXT NOT NULL,
            procedure_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            procedure_date TEXT NOT NULL,
            billed_fee REAL NOT NULL,
            patient_paid REAL NOT NULL,
            insurance_paid REAL NOT NULL,
            write_offs REAL NOT NULL,
            adjustments REAL NOT NULL,
            total_paid REAL NOT NULL,
            remaining_balance REAL NOT NULL,
            payment_ratio REAL,
            is_overpaid INTEGER NOT NULL,
            is_underpaid INTEGER NOT NULL,
            insurance_pending REAL NOT NULL,
            entry_count INTEGER NOT NULL,
            reduced_confidence INTEGER NOT NULL,
            under_integrity_review INTEGER NOT NULL,
            PRIMARY KEY (run_id, procedure_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lifecycle (
            run_id TEXT NOT NULL,
            procedure_id TEXT NOT NULL,
            state TEXT NOT NULL,
            flags TEXT NOT NULL,
            counts_toward_success_rate INTEGER NOT NULL,
            PRIMARY KEY (run_id, procedure_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aging_buckets (
            run_id TEXT NOT NULL,
            subject_kind TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            bucket_0_30 REAL NOT NULL,
            bucket_31_60 REAL NOT NULL,
            bucket_61_90 REAL NOT NULL,
            bucket_91_plus REAL NOT NULL,
            total REAL NOT NULL,
            oldest_balance_days INTEGER NOT NULL,
            procedure_count INTEGER NOT NULL,
            risk TEXT NOT NULL,
            collections_flag INTEGER NOT NULL,
            under_integrity_review INTEGER NOT NULL,
            reduced_confidence INTEGER NOT NULL,
            PRIMARY KEY (run_id, subject_kind, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS anomalies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            pattern_type TEXT NOT NULL,
            claim_id TEXT,
            payment_id TEXT,
            split_count INTEGER NOT NULL,
            payment_count INTEGER NOT NULL,
            active_day_span INTEGER NOT NULL,
            baseline_median REAL,
            threshold REAL NOT NULL,
            first_date TEXT NOT NULL,
            last_date TEXT NOT NULL,
            procedure_ids TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            category TEXT NOT NULL,
            severity TEXT NOT NULL,
            record_kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            procedure_id TEXT,
            message TEXT NOT NULL,
            amount REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_as_of ON runs(as_of_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_balance_patient ON balance_records(run_id, patient_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_anomalies_run ON anomalies(run_id, pattern_type)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_issues_run ON run_issues(run_id, category)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITE
// ============================================================================

/// Persist a complete run in one transaction. Either every row lands or none does.
pub fn save_run(conn: &mut Connection, report: &RunReport, actor: &str) -> Result<usize> {
    let tx = conn.transaction().context("Failed to begin run transaction")?;
    let run_id = report.run_id.to_string();
    let mut rows = 0;

    tx.execute(
        "INSERT INTO runs (
            run_id, as_of_date, window_start, window_end, snapshot_fingerprint,
            started_at, finished_at, procedure_count, total_outstanding, success_rate,
            anomaly_count, requires_review, issue_counts
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            run_id,
            report.as_of_date.to_string(),
            report.window_start.map(|d| d.to_string()),
            report.window_end.to_string(),
            report.snapshot_fingerprint,
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339(),
            report.balances.len() as i64,
            report.total_outstanding(),
            report.success_rate.rate(),
            report.integrity.anomalies.len() as i64,
            report.summary.requires_review(),
            serde_json::to_string(&report.summary.counts)?,
        ],
    )
    .with_context(|| format!("Failed to insert run {}", run_id))?;
    rows += 1;

    for b in &report.balances {
        tx.execute(
            "INSERT INTO balance_records (
                run_id, procedure_id, patient_id, procedure_date, billed_fee,
                patient_paid, insurance_paid, write_offs, adjustments, total_paid,
                remaining_balance, payment_ratio, is_overpaid, is_underpaid,
                insurance_pending, entry_count, reduced_confidence, under_integrity_review
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                run_id,
                b.procedure_id,
                b.patient_id,
                b.procedure_date.to_string(),
                b.billed_fee,
                b.patient_paid,
                b.insurance_paid,
                b.write_offs,
                b.adjustments,
                b.total_paid,
                b.remaining_balance,
                b.payment_ratio.value(),
                b.is_overpaid,
                b.is_underpaid,
                b.insurance_pending,
                b.entry_count as i64,
                b.reduced_confidence,
                b.under_integrity_review,
            ],
        )
        .with_context(|| format!("Failed to insert balance for {}", b.procedure_id))?;
        rows += 1;
    }

    for c in &report.classifications {
        let flags: Vec<String> = c.flags.iter().map(|f| format!("{:?}", f)).collect();
        tx.execute(
            "INSERT INTO lifecycle (
                run_id, procedure_id, state, flags, counts_toward_success_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                c.procedure_id,
                c.state.as_str(),
                serde_json::to_string(&flags)?,
                c.counts_toward_success_rate,
            ],
        )?;
        rows += 1;
    }

    for bucket in report.aging.patients.iter().chain(&report.aging.families) {
        insert_aging_bucket(&tx, &run_id, bucket)?;
        rows += 1;
    }

    for a in &report.integrity.anomalies {
        tx.execute(
            "INSERT INTO anomalies (
                run_id, pattern_type, claim_id, payment_id, split_count, payment_count,
                active_day_span, baseline_median, threshold, first_date, last_date, procedure_ids
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run_id,
                a.pattern_type.as_str(),
                a.claim_id,
                a.payment_id,
                a.split_count as i64,
                a.payment_count as i64,
                a.active_day_span,
                a.baseline_median,
                a.threshold,
                a.first_date.to_string(),
                a.last_date.to_string(),
                serde_json::to_string(&a.procedure_ids)?,
            ],
        )?;
        rows += 1;
    }

    for issue in &report.summary.issues {
        tx.execute(
            "INSERT INTO run_issues (
                run_id, category, severity, record_kind, record_id, procedure_id, message, amount
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                format!("{:?}", issue.category),
                format!("{:?}", issue.severity),
                format!("{:?}", issue.record_kind),
                issue.record_id,
                issue.procedure_id,
                issue.message,
                issue.amount,
            ],
        )?;
        rows += 1;
    }

    let event = Event::new(
        "run_completed",
        "run",
        &run_id,
        serde_json::json!({
            "as_of_date": report.as_of_date.to_string(),
            "snapshot_fingerprint": report.snapshot_fingerprint,
            "rows": rows,
            "requires_review": report.summary.requires_review(),
        }),
        actor,
    );
    insert_event(&tx, &event)?;

    tx.commit().context("Failed to commit run transaction")?;
    info!(run_id = %run_id, rows, "Run persisted");

    Ok(rows)
}

fn insert_aging_bucket(conn: &Connection, run_id: &str, bucket: &AgingBucket) -> Result<()> {
    conn.execute(
        "INSERT INTO aging_buckets (
            run_id, subject_kind, subject_id, as_of_date, bucket_0_30, bucket_31_60,
            bucket_61_90, bucket_91_plus, total, oldest_balance_days, procedure_count,
            risk, collections_flag, under_integrity_review, reduced_confidence
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            run_id,
            bucket.subject_kind.as_str(),
            bucket.subject_id,
            bucket.as_of_date.to_string(),
            bucket.bucket_0_30,
            bucket.bucket_31_60,
            bucket.bucket_61_90,
            bucket.bucket_91_plus,
            bucket.total(),
            bucket.oldest_balance_days,
            bucket.procedure_count as i64,
            bucket.risk().as_str(),
            bucket.collections_flag(),
            bucket.under_integrity_review,
            bucket.reduced_confidence,
        ],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

// ============================================================================
// READ
// ============================================================================

fn parse_date(value: &str, column: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Aging rows of one run, patients first
pub fn get_aging_buckets(conn: &Connection, run_id: &str) -> Result<Vec<AgingBucket>> {
    let mut stmt = conn.prepare(
        "SELECT subject_id, subject_kind, as_of_date, bucket_0_30, bucket_31_60,
                bucket_61_90, bucket_91_plus, oldest_balance_days, procedure_count,
                under_integrity_review, reduced_confidence
         FROM aging_buckets
         WHERE run_id = ?1
         ORDER BY subject_kind DESC, subject_id",
    )?;

    let buckets = stmt
        .query_map(params![run_id], |row| {
            let kind: String = row.get(1)?;
            let as_of: String = row.get(2)?;
            let procedure_count: i64 = row.get(8)?;

            Ok(AgingBucket {
                subject_id: row.get(0)?,
                subject_kind: if kind == SubjectKind::Family.as_str() {
                    SubjectKind::Family
                } else {
                    SubjectKind::Patient
                },
                as_of_date: parse_date(&as_of, 2)?,
                bucket_0_30: row.get(3)?,
                bucket_31_60: row.get(4)?,
                bucket_61_90: row.get(5)?,
                bucket_91_plus: row.get(6)?,
                oldest_balance_days: row.get(7)?,
                procedure_count: procedure_count as usize,
                under_integrity_review: row.get(9)?,
                reduced_confidence: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(buckets)
}

/// Row counts per output table for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunCounts {
    pub balance_records: i64,
    pub lifecycle: i64,
    pub aging_buckets: i64,
    pub anomalies: i64,
    pub run_issues: i64,
}

pub fn get_run_counts(conn: &Connection, run_id: &str) -> Result<RunCounts> {
    let count = |table: &str| -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE run_id = ?1", table);
        Ok(conn.query_row(&sql, params![run_id], |row| row.get(0))?)
    };

    Ok(RunCounts {
        balance_records: count("balance_records")?,
        lifecycle: count("lifecycle")?,
        aging_buckets: count("aging_buckets")?,
        anomalies: count("anomalies")?,
        run_issues: count("run_issues")?,
    })
}

/// Latest run recorded for an as-of date
pub fn latest_run_for_date(conn: &Connection, as_of: NaiveDate) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT run_id FROM runs WHERE as_of_date = ?1 ORDER BY finished_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![as_of.to_string()])?;

    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 🗄️ Record Store - borrowers, loans, payments + audit trail (SQLite + WAL)
//
// The command pipeline only sees the RecordStore trait. SqliteStore is the
// concrete store: it owns schema validation and the loan-total invariant,
// and runs every payment mutation inside a single SQLite transaction.

use crate::entities::{
    now, Borrower, FieldValue, Loan, LoanStatus, NewPayment, Payment, PaymentField, PaymentMethod,
    PaymentStatus,
};
use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Actor recorded on audit events written by the command pipeline
pub const COMMAND_ACTOR: &str = "voice_command";

/// Rounding slack when comparing summed amounts against a loan total
const AMOUNT_EPSILON: f64 = 1e-6;

const PAYMENT_COLUMNS: &str = "id, borrower_id, loan_id, payment_amount, payment_date, \
     payment_method, status, notes, created_at, updated_at";

const LOAN_COLUMNS: &str = "id, borrower_id, loan_type, loan_amount, interest_rate, \
     loan_term_years, total_payment, status, created_at";

// ============================================================================
// STORE SEAM
// ============================================================================

/// Equality filter on one payment field. The value is bound as text exactly
/// as captured; SQLite column affinity decides whether it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub field: PaymentField,
    pub value: String,
}

/// Operations the command pipeline needs from the record store.
pub trait RecordStore: Send + Sync {
    /// All borrowers (the pipeline only reads id + display name)
    fn borrowers(&self) -> Result<Vec<Borrower>, StoreError>;

    /// Loans owned by one borrower
    fn loans_for_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>, StoreError>;

    /// Validate and insert; enforces the loan total for Completed payments
    fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    /// Most recently created payment for a loan
    fn latest_payment_for_loan(&self, loan_id: &str) -> Result<Option<Payment>, StoreError>;

    /// Apply one field update with validation re-run
    fn update_payment(
        &self,
        payment_id: &str,
        field: PaymentField,
        value: &FieldValue,
    ) -> Result<Payment, StoreError>;

    /// Delete one payment of the loan matching the optional filter
    fn delete_one_payment(
        &self,
        loan_id: &str,
        filter: Option<&PaymentFilter>,
    ) -> Result<Option<Payment>, StoreError>;
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail: every payment mutation is recorded
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
            timestamp: now(),
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

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS borrowers (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT UNIQUE,
            phone_number TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS loans (
            id TEXT PRIMARY KEY,
            borrower_id TEXT NOT NULL REFERENCES borrowers(id),
            loan_type TEXT NOT NULL,
            loan_amount REAL NOT NULL,
            interest_rate REAL NOT NULL,
            loan_term_years INTEGER NOT NULL,
            total_payment REAL NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            borrower_id TEXT NOT NULL REFERENCES borrowers(id),
            loan_id TEXT NOT NULL REFERENCES loans(id),
            payment_amount REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
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
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_loans_borrower ON loans(borrower_id)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_payments_loan ON payments(loan_id)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_err(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width so text ordering matches time ordering
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn borrower_from_row(row: &Row) -> rusqlite::Result<Borrower> {
    let created_at: String = row.get(4)?;
    Ok(Borrower {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        phone_number: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

fn loan_from_row(row: &Row) -> rusqlite::Result<Loan> {
    let loan_type: String = row.get(2)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(Loan {
        id: row.get(0)?,
        borrower_id: row.get(1)?,
        loan_type: loan_type.parse().map_err(|e| conversion_err(2, e))?,
        loan_amount: row.get(3)?,
        interest_rate: row.get(4)?,
        loan_term_years: row.get(5)?,
        total_payment: row.get(6)?,
        status: status.parse().map_err(|e| conversion_err(7, e))?,
        created_at: parse_timestamp(8, &created_at)?,
    })
}

fn payment_from_row(row: &Row) -> rusqlite::Result<Payment> {
    let payment_date: String = row.get(4)?;
    let method: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Payment {
        id: row.get(0)?,
        borrower_id: row.get(1)?,
        loan_id: row.get(2)?,
        payment_amount: row.get(3)?,
        payment_date: NaiveDate::parse_from_str(&payment_date, "%Y-%m-%d")
            .map_err(|e| conversion_err(4, e))?,
        payment_method: method.parse().map_err(|e| conversion_err(5, e))?,
        status: status.parse().map_err(|e| conversion_err(6, e))?,
        notes: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}

// ============================================================================
// VALIDATION + INVARIANT
// ============================================================================

fn validate_amount(amount: f64) -> Result<(), StoreError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(StoreError::Rejected(format!(
            "Payment amount must be a non-negative number, got {}",
            amount
        )));
    }
    Ok(())
}

fn validate_method(raw: &str) -> Result<PaymentMethod, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Rejected(format!("Invalid payment method: {}", raw)))
}

fn validate_status(raw: &str) -> Result<PaymentStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Rejected(format!("Invalid payment status: {}", raw)))
}

/// Completed payments for a loan may never sum past its total. Reaching the
/// total flips the loan to Paid Off. `exclude` is the payment being updated.
fn enforce_loan_total(
    conn: &Connection,
    loan_id: &str,
    exclude: Option<&str>,
    amount: f64,
) -> Result<(), StoreError> {
    let loan: Option<(f64, String)> = conn
        .query_row(
            "SELECT total_payment, status FROM loans WHERE id = ?1",
            params![loan_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (total_payment, status) =
        loan.ok_or_else(|| StoreError::Rejected("Loan not found".to_string()))?;

    let already_paid: f64 = conn.query_row(
        "SELECT COALESCE(SUM(payment_amount), 0.0) FROM payments
         WHERE loan_id = ?1 AND status = 'Completed' AND id != ?2",
        params![loan_id, exclude.unwrap_or("")],
        |row| row.get(0),
    )?;

    let new_total = already_paid + amount;
    if new_total > total_payment + AMOUNT_EPSILON {
        warn!(
            loan_id,
            already_paid, amount, total_payment, "rejecting payment past loan total"
        );
        return Err(StoreError::Rejected(
            "Payment exceeds total loan amount".to_string(),
        ));
    }

    if new_total + AMOUNT_EPSILON >= total_payment && status != LoanStatus::PaidOff.as_str() {
        conn.execute(
            "UPDATE loans SET status = ?1 WHERE id = ?2",
            params![LoanStatus::PaidOff.as_str(), loan_id],
        )?;
        debug!(loan_id, "loan fully paid");
    }

    Ok(())
}

fn apply_field(payment: &mut Payment, field: PaymentField, value: &FieldValue) -> Result<(), StoreError> {
    match (field, value) {
        (PaymentField::PaymentAmount, FieldValue::Amount(amount)) => {
            payment.payment_amount = *amount;
        }
        (PaymentField::PaymentAmount, FieldValue::Text(text)) => {
            payment.payment_amount = text.trim().parse().map_err(|_| {
                StoreError::Rejected(format!("Cast to number failed for paymentAmount: {}", text))
            })?;
        }
        (PaymentField::PaymentDate, FieldValue::Date(date)) => {
            payment.payment_date = *date;
        }
        (PaymentField::PaymentDate, FieldValue::Text(text)) => {
            payment.payment_date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| {
                StoreError::Rejected(format!("Cast to date failed for paymentDate: {}", text))
            })?;
        }
        (PaymentField::PaymentMethod, FieldValue::Text(text)) => {
            payment.payment_method = validate_method(text)?;
        }
        (PaymentField::Status, FieldValue::Text(text)) => {
            payment.status = validate_status(text)?;
        }
        (PaymentField::Notes, other) => {
            payment.notes = other.to_string().trim().to_string();
        }
        (field, other) => {
            return Err(StoreError::Rejected(format!(
                "Invalid value for {}: {}",
                field, other
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Shared SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn insert_borrower(&self, borrower: &Borrower) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO borrowers (id, full_name, email, phone_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                borrower.id,
                borrower.full_name,
                borrower.email,
                borrower.phone_number,
                format_timestamp(&borrower.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn insert_loan(&self, loan: &Loan) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO loans (
                id, borrower_id, loan_type, loan_amount, interest_rate,
                loan_term_years, total_payment, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                loan.id,
                loan.borrower_id,
                loan.loan_type.as_str(),
                loan.loan_amount,
                loan.interest_rate,
                loan.loan_term_years,
                loan.total_payment,
                loan.status.as_str(),
                format_timestamp(&loan.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn loan(&self, loan_id: &str) -> Result<Loan, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM loans WHERE id = ?1", LOAN_COLUMNS),
            params![loan_id],
            loan_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            entity: "loan",
            id: loan_id.to_string(),
        })
    }

    /// All payments of a loan in creation order
    pub fn payments_for_loan(&self, loan_id: &str) -> Result<Vec<Payment>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE loan_id = ?1 ORDER BY created_at, rowid",
            PAYMENT_COLUMNS
        ))?;
        let payments = stmt
            .query_map(params![loan_id], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payments)
    }

    pub fn payment_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock()?;
        get_events_for_entity(&conn, entity_type, entity_id)
    }
}

impl RecordStore for SqliteStore {
    fn borrowers(&self) -> Result<Vec<Borrower>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, full_name, email, phone_number, created_at
             FROM borrowers
             ORDER BY created_at, rowid",
        )?;
        let borrowers = stmt
            .query_map([], borrower_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(borrowers)
    }

    fn loans_for_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM loans WHERE borrower_id = ?1 ORDER BY created_at, rowid",
            LOAN_COLUMNS
        ))?;
        let loans = stmt
            .query_map(params![borrower_id], loan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(loans)
    }

    fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        validate_amount(payment.payment_amount)?;
        let method = validate_method(&payment.payment_method)?;

        let created_at = now();
        let record = Payment {
            id: uuid::Uuid::new_v4().to_string(),
            borrower_id: payment.borrower_id,
            loan_id: payment.loan_id,
            payment_amount: payment.payment_amount,
            payment_date: payment.payment_date,
            payment_method: method,
            status: payment.status,
            notes: payment.notes.trim().to_string(),
            created_at,
            updated_at: created_at,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if record.status == PaymentStatus::Completed {
            enforce_loan_total(&tx, &record.loan_id, None, record.payment_amount)?;
        }

        tx.execute(
            &format!(
                "INSERT INTO payments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                PAYMENT_COLUMNS
            ),
            params![
                record.id,
                record.borrower_id,
                record.loan_id,
                record.payment_amount,
                record.payment_date.format("%Y-%m-%d").to_string(),
                record.payment_method.as_str(),
                record.status.as_str(),
                record.notes,
                format_timestamp(&record.created_at),
                format_timestamp(&record.updated_at),
            ],
        )?;

        insert_event(
            &tx,
            &Event::new(
                "payment_added",
                "payment",
                &record.id,
                serde_json::json!({
                    "loan_id": record.loan_id,
                    "amount": record.payment_amount,
                    "status": record.status.as_str(),
                }),
                COMMAND_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(record)
    }

    fn latest_payment_for_loan(&self, loan_id: &str) -> Result<Option<Payment>, StoreError> {
        let conn = self.lock()?;
        let payment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM payments WHERE loan_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    PAYMENT_COLUMNS
                ),
                params![loan_id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    fn update_payment(
        &self,
        payment_id: &str,
        field: PaymentField,
        value: &FieldValue,
    ) -> Result<Payment, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS),
                params![payment_id],
                payment_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            })?;

        let mut updated = current.clone();
        apply_field(&mut updated, field, value)?;
        validate_amount(updated.payment_amount)?;

        let status_changed = updated.status != current.status;
        let amount_changed = (updated.payment_amount - current.payment_amount).abs() > AMOUNT_EPSILON;
        if updated.status == PaymentStatus::Completed && (status_changed || amount_changed) {
            enforce_loan_total(&tx, &updated.loan_id, Some(&updated.id), updated.payment_amount)?;
        }

        updated.updated_at = now();
        tx.execute(
            "UPDATE payments
             SET payment_amount = ?1, payment_date = ?2, payment_method = ?3,
                 status = ?4, notes = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                updated.payment_amount,
                updated.payment_date.format("%Y-%m-%d").to_string(),
                updated.payment_method.as_str(),
                updated.status.as_str(),
                updated.notes,
                format_timestamp(&updated.updated_at),
                updated.id,
            ],
        )?;

        insert_event(
            &tx,
            &Event::new(
                "payment_updated",
                "payment",
                &updated.id,
                serde_json::json!({ "field": field.as_str(), "value": value.to_string() }),
                COMMAND_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(updated)
    }

    fn delete_one_payment(
        &self,
        loan_id: &str,
        filter: Option<&PaymentFilter>,
    ) -> Result<Option<Payment>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Column names come from PaymentField, never from user text
        let found = match filter {
            Some(filter) => tx
                .query_row(
                    &format!(
                        "SELECT {} FROM payments WHERE loan_id = ?1 AND {} = ?2
                         ORDER BY rowid LIMIT 1",
                        PAYMENT_COLUMNS,
                        filter.field.column()
                    ),
                    params![loan_id, filter.value],
                    payment_from_row,
                )
                .optional()?,
            None => tx
                .query_row(
                    &format!(
                        "SELECT {} FROM payments WHERE loan_id = ?1 ORDER BY rowid LIMIT 1",
                        PAYMENT_COLUMNS
                    ),
                    params![loan_id],
                    payment_from_row,
                )
                .optional()?,
        };

        let Some(payment) = found else {
            return Ok(None);
        };

        tx.execute("DELETE FROM payments WHERE id = ?1", params![payment.id])?;
        insert_event(
            &tx,
            &Event::new(
                "payment_deleted",
                "payment",
                &payment.id,
                serde_json::json!({
                    "loan_id": payment.loan_id,
                    "filter": filter.map(|f| format!("{} = {}", f.field, f.value)),
                }),
                COMMAND_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(Some(payment))
    }
}

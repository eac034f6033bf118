// 💵 Payment Entity - a recorded installment against one loan
//
// Also defines the five command-addressable payment fields and the typed
// values an update can carry.

use super::UnknownVariant;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PAYMENT METHOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    #[serde(rename = "Bank Transfer")]
    BankTransfer,
    Cheque,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::Cheque => "Cheque",
            PaymentMethod::Online => "Online",
            PaymentMethod::Other => "Other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    /// Case-insensitive; separators are ignored so "bank_transfer",
    /// "BankTransfer" and "Bank Transfer" all name the same method.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "banktransfer" => Ok(PaymentMethod::BankTransfer),
            "cheque" => Ok(PaymentMethod::Cheque),
            "online" => Ok(PaymentMethod::Online),
            "other" => Ok(PaymentMethod::Other),
            _ => Err(UnknownVariant::new("payment method", s)),
        }
    }
}

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict: only the canonical spelling is accepted. Callers canonicalize first.
impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            "Refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(UnknownVariant::new("payment status", s)),
        }
    }
}

// ============================================================================
// ADDRESSABLE FIELDS
// ============================================================================

/// The payment fields a command may update or filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentField {
    PaymentAmount,
    PaymentDate,
    PaymentMethod,
    Status,
    Notes,
}

impl PaymentField {
    pub const ALL: [PaymentField; 5] = [
        PaymentField::PaymentAmount,
        PaymentField::PaymentDate,
        PaymentField::PaymentMethod,
        PaymentField::Status,
        PaymentField::Notes,
    ];

    /// Name used in instructions and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentField::PaymentAmount => "paymentAmount",
            PaymentField::PaymentDate => "paymentDate",
            PaymentField::PaymentMethod => "paymentMethod",
            PaymentField::Status => "status",
            PaymentField::Notes => "notes",
        }
    }

    /// Column in the payments table
    pub fn column(&self) -> &'static str {
        match self {
            PaymentField::PaymentAmount => "payment_amount",
            PaymentField::PaymentDate => "payment_date",
            PaymentField::PaymentMethod => "payment_method",
            PaymentField::Status => "status",
            PaymentField::Notes => "notes",
        }
    }
}

impl fmt::Display for PaymentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentField {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentField::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant::new("payment field", s))
    }
}

/// A coerced update value. Text covers method, status and notes; the store
/// validates method and status against their vocabularies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Amount(f64),
    Date(NaiveDate),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Amount(a) => write!(f, "{}", a),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Text(t) => f.write_str(t),
        }
    }
}

// ============================================================================
// PAYMENT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    pub borrower_id: String,

    pub loan_id: String,

    pub payment_amount: f64,

    pub payment_date: NaiveDate,

    pub payment_method: PaymentMethod,

    pub status: PaymentStatus,

    pub notes: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Insert payload. The method stays raw text until the store validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub borrower_id: String,
    pub loan_id: String,
    pub payment_amount: f64,
    pub payment_date: NaiveDate,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub notes: String,
}

// 🏦 Loan Entity - credit agreement owned by exactly one borrower
//
// total_payment = principal + computed interest. The amortization formula that
// produces it lives outside this crate; loans arrive with the total already set.

use super::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LOAN TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanType {
    Home,
    Auto,
    Personal,
    Education,
    Business,
}

impl LoanType {
    pub const ALL: [LoanType; 5] = [
        LoanType::Home,
        LoanType::Auto,
        LoanType::Personal,
        LoanType::Education,
        LoanType::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanType::Home => "Home",
            LoanType::Auto => "Auto",
            LoanType::Personal => "Personal",
            LoanType::Education => "Education",
            LoanType::Business => "Business",
        }
    }
}

impl fmt::Display for LoanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        LoanType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVariant::new("loan type", s))
    }
}

// ============================================================================
// LOAN STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    #[serde(rename = "Paid Off")]
    PaidOff,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "Pending",
            LoanStatus::Approved => "Approved",
            LoanStatus::Rejected => "Rejected",
            LoanStatus::Active => "Active",
            LoanStatus::PaidOff => "Paid Off",
            LoanStatus::Defaulted => "Defaulted",
        }
    }

}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "rejected" => Ok(LoanStatus::Rejected),
            "active" => Ok(LoanStatus::Active),
            "paid off" => Ok(LoanStatus::PaidOff),
            "defaulted" => Ok(LoanStatus::Defaulted),
            _ => Err(UnknownVariant::new("loan status", s)),
        }
    }
}

// ============================================================================
// LOAN ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Foreign key to Borrower
    pub borrower_id: String,

    pub loan_type: LoanType,

    pub loan_amount: f64,

    /// Annual rate in percent (0-100)
    pub interest_rate: f64,

    pub loan_term_years: u32,

    /// Principal + interest; completed payments may never sum past this
    pub total_payment: f64,

    pub status: LoanStatus,

    pub created_at: DateTime<Utc>,
}

impl Loan {
    /// New loans start Pending, as in the loan desk workflow.
    pub fn new(
        borrower_id: &str,
        loan_type: LoanType,
        loan_amount: f64,
        interest_rate: f64,
        loan_term_years: u32,
        total_payment: f64,
    ) -> Self {
        Loan {
            id: uuid::Uuid::new_v4().to_string(),
            borrower_id: borrower_id.to_string(),
            loan_type,
            loan_amount,
            interest_rate,
            loan_term_years,
            total_payment,
            status: LoanStatus::Pending,
            created_at: super::now(),
        }
    }

    /// Builder pattern: set lifecycle status
    pub fn with_status(mut self, status: LoanStatus) -> Self {
        self.status = status;
        self
    }
}

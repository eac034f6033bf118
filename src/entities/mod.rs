// Entity Models - Borrower, Loan, Payment
//
// Each entity has a stable identity (UUID) used for every foreign reference.
// Display values (names, labels) are free text and may drift; identity never does.

pub mod borrower;
pub mod loan;
pub mod payment;

pub use borrower::Borrower;
pub use loan::{Loan, LoanStatus, LoanType};
pub use payment::{
    FieldValue, NewPayment, Payment, PaymentField, PaymentMethod, PaymentStatus,
};

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;

/// Current time at the precision the store keeps (microseconds), so a
/// record handed back to a caller equals the one read back later.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A stored or typed label did not name a known variant.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}

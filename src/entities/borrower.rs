// 👤 Borrower Entity - a client holding one or more loans
//
// "Display name is a VALUE (human-entered), borrower UUID is IDENTITY"
// Names are not unique or canonically spelled, which is why commands resolve
// them by fuzzy match instead of equality.

use chrono::{DateTime, Utc};

use super::now;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Borrower {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Free-text display name, e.g. "John Doe"
    pub full_name: String,

    pub email: Option<String>,

    pub phone_number: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Borrower {
    pub fn new(full_name: &str) -> Self {
        Borrower {
            id: uuid::Uuid::new_v4().to_string(),
            full_name: full_name.trim().to_string(),
            email: None,
            phone_number: None,
            created_at: now(),
        }
    }

    /// Builder pattern: add contact email (stored lower-cased)
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.trim().to_lowercase());
        self
    }

    /// Builder pattern: add phone number
    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone_number = Some(phone.trim().to_string());
        self
    }
}

// 🧭 Entity Resolver - borrower name / loan label → canonical records
//
// Always re-queries the store: a borrower or loan added a moment ago must be
// resolvable by the very next command, so nothing is cached between calls.

use crate::db::RecordStore;
use crate::entities::{Borrower, Loan};
use crate::error::StoreError;
use crate::fuzzy::FuzzyMatcher;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A resolved record plus the similarity that selected it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    pub entity: T,
    pub confidence: f64,
}

#[derive(Clone)]
pub struct EntityResolver {
    store: Arc<dyn RecordStore>,
    matcher: FuzzyMatcher,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        EntityResolver {
            store,
            matcher: FuzzyMatcher::new(),
        }
    }

    /// Best borrower by display name, only when the match is confident
    pub fn resolve_borrower(&self, name: &str) -> Result<Option<Resolved<Borrower>>, StoreError> {
        if name.trim().is_empty() {
            return Ok(None);
        }

        let mut borrowers = self.store.borrowers()?;
        let names: Vec<&str> = borrowers.iter().map(|b| b.full_name.as_str()).collect();

        let Some(found) = self.matcher.confident_match(name, &names) else {
            debug!(name, candidates = names.len(), "no confident borrower match");
            return Ok(None);
        };

        debug!(name, matched = names[found.index], score = found.score, "borrower resolved");
        Ok(Some(Resolved {
            entity: borrowers.swap_remove(found.index),
            confidence: found.score,
        }))
    }

    /// Best loan among the borrower's own loans by type label
    pub fn resolve_loan(
        &self,
        borrower_id: &str,
        loan_type_label: &str,
    ) -> Result<Option<Resolved<Loan>>, StoreError> {
        if loan_type_label.trim().is_empty() {
            return Ok(None);
        }

        let mut loans = self.store.loans_for_borrower(borrower_id)?;
        if loans.is_empty() {
            debug!(borrower_id, "borrower has no loans");
            return Ok(None);
        }

        let labels: Vec<&str> = loans.iter().map(|l| l.loan_type.as_str()).collect();
        let Some(found) = self.matcher.confident_match(loan_type_label, &labels) else {
            debug!(loan_type_label, "no confident loan match");
            return Ok(None);
        };

        Ok(Some(Resolved {
            entity: loans.swap_remove(found.index),
            confidence: found.score,
        }))
    }
}

// ⚙️ Command Executor - apply one parsed instruction to the payment records
//
// Resolution always completes before any write: borrower first, then loan
// among that borrower's loans. Each successful command mutates exactly one
// payment; store rejections (e.g. the loan-total invariant) are passed through.

use crate::db::{PaymentFilter, RecordStore};
use crate::entities::{Borrower, Loan, NewPayment, Payment};
use crate::error::{CommandError, ExecutionError, ResolutionError};
use crate::instruction::{ParsedInstruction, PaymentTarget};
use crate::resolver::EntityResolver;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// EXECUTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ExecutionResult {
    Add {
        success: bool,
        message: String,
        doc: Payment,
    },
    Update {
        success: bool,
        doc: Payment,
    },
    Delete {
        success: bool,
        message: String,
        doc: Payment,
    },
    Error {
        message: String,
    },
    /// Nothing was attempted; the caller should ask the user to rephrase
    #[serde(rename = "none")]
    NoMutation {
        message: String,
    },
}

impl ExecutionResult {
    pub fn action(&self) -> &'static str {
        match self {
            ExecutionResult::Add { .. } => "add",
            ExecutionResult::Update { .. } => "update",
            ExecutionResult::Delete { .. } => "delete",
            ExecutionResult::Error { .. } => "error",
            ExecutionResult::NoMutation { .. } => "none",
        }
    }

    /// The affected payment, for the mutating actions
    pub fn doc(&self) -> Option<&Payment> {
        match self {
            ExecutionResult::Add { doc, .. }
            | ExecutionResult::Update { doc, .. }
            | ExecutionResult::Delete { doc, .. } => Some(doc),
            _ => None,
        }
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

#[derive(Clone)]
pub struct CommandExecutor {
    store: Arc<dyn RecordStore>,
    resolver: EntityResolver,
}

impl CommandExecutor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        CommandExecutor {
            resolver: EntityResolver::new(store.clone()),
            store,
        }
    }

    /// Every failure is folded into `ExecutionResult::Error`
    pub fn execute(&self, instruction: &ParsedInstruction) -> ExecutionResult {
        match self.try_execute(instruction) {
            Ok(result) => result,
            Err(err) => ExecutionResult::Error {
                message: err.to_string(),
            },
        }
    }

    /// Same as `execute` but keeps the error kind for the caller
    pub fn try_execute(&self, instruction: &ParsedInstruction) -> Result<ExecutionResult, CommandError> {
        match instruction {
            ParsedInstruction::Add(add) => {
                let (borrower, loan) = self.resolve_target(&add.target)?;

                let payload = NewPayment {
                    borrower_id: borrower.id,
                    loan_id: loan.id,
                    payment_amount: add.payment_amount,
                    payment_date: add.payment_date,
                    payment_method: add.payment_method.clone(),
                    status: add.status,
                    notes: add.notes.clone(),
                };

                let doc = self.store.insert_payment(payload).map_err(reject)?;
                info!(payment_id = %doc.id, amount = doc.payment_amount, "payment added");

                Ok(ExecutionResult::Add {
                    success: true,
                    message: "Payment added successfully".to_string(),
                    doc,
                })
            }

            ParsedInstruction::Update(update) => {
                let (_, loan) = self.resolve_target(&update.target)?;

                // Newest payment is the only one a command can address
                let latest = self
                    .store
                    .latest_payment_for_loan(&loan.id)?
                    .ok_or(ExecutionError::PaymentNotFound)?;

                let doc = self
                    .store
                    .update_payment(&latest.id, update.field, &update.value)
                    .map_err(reject)?;
                info!(payment_id = %doc.id, field = %update.field, "payment updated");

                Ok(ExecutionResult::Update { success: true, doc })
            }

            ParsedInstruction::Delete(target) => self.delete(target, None),

            ParsedInstruction::DeleteWhere(delete) => {
                let filter = PaymentFilter {
                    field: delete.field,
                    value: delete.value.clone(),
                };
                self.delete(&delete.target, Some(&filter))
            }

            ParsedInstruction::Ambiguous { .. } => Ok(ExecutionResult::NoMutation {
                message: "Instruction is ambiguous, please rephrase".to_string(),
            }),

            ParsedInstruction::Unrecognized { .. } => Ok(ExecutionResult::NoMutation {
                message: "No valid pattern detected".to_string(),
            }),
        }
    }

    fn delete(
        &self,
        target: &PaymentTarget,
        filter: Option<&PaymentFilter>,
    ) -> Result<ExecutionResult, CommandError> {
        let (_, loan) = self.resolve_target(target)?;

        let doc = self
            .store
            .delete_one_payment(&loan.id, filter)?
            .ok_or(ExecutionError::PaymentNotFound)?;
        info!(payment_id = %doc.id, "payment deleted");

        Ok(ExecutionResult::Delete {
            success: true,
            message: "Payment deleted".to_string(),
            doc,
        })
    }

    /// Borrower then loan; a missing loan is reported as LoanNotFound even
    /// though the borrower resolved.
    fn resolve_target(&self, target: &PaymentTarget) -> Result<(Borrower, Loan), CommandError> {
        let borrower = self
            .resolver
            .resolve_borrower(&target.borrower_name)?
            .ok_or_else(|| ResolutionError::BorrowerNotFound(target.borrower_name.clone()))?
            .entity;

        let loan = self
            .resolver
            .resolve_loan(&borrower.id, &target.loan_type)?
            .ok_or_else(|| ResolutionError::LoanNotFound(target.loan_type.clone()))?
            .entity;

        Ok((borrower, loan))
    }
}

fn reject(err: crate::error::StoreError) -> CommandError {
    let err = ExecutionError::from(err);
    if let ExecutionError::InvariantViolation(message) = &err {
        warn!(%message, "store rejected mutation");
    }
    err.into()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{new_payment, seeded_store};
    use crate::db::SqliteStore;
    use crate::entities::{LoanStatus, PaymentStatus};
    use crate::instruction::InstructionParser;
    use chrono::NaiveDate;

    fn executor_for(store: &SqliteStore) -> CommandExecutor {
        CommandExecutor::new(Arc::new(store.clone()))
    }

    fn run(executor: &CommandExecutor, text: &str) -> Result<ExecutionResult, CommandError> {
        let parsed = InstructionParser::new().parse(text)?;
        executor.try_execute(&parsed)
    }

    #[test]
    fn test_add_scenario_with_fuzzy_names() {
        let (store, borrower, loan) = seeded_store();
        let executor = executor_for(&store);

        let result = run(
            &executor,
            "Add payment for Jon Doe on home loan with amount 5,000, method Online, status completed, date 2025-01-05, notes first installment",
        )
        .unwrap();

        assert_eq!(result.action(), "add");
        let doc = result.doc().unwrap();
        assert_eq!(doc.borrower_id, borrower.id);
        assert_eq!(doc.loan_id, loan.id);
        assert_eq!(doc.payment_amount, 5000.0);
        assert_eq!(doc.status, PaymentStatus::Completed);
        assert_eq!(doc.payment_date, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert_eq!(doc.notes, "first installment");

        assert_eq!(store.payment_count().unwrap(), 1);
        assert_eq!(store.loan(&loan.id).unwrap().status, LoanStatus::Active);
    }

    #[test]
    fn test_add_is_not_idempotent() {
        let (store, _, loan) = seeded_store();
        let executor = executor_for(&store);
        let text = "Add payment for John Doe on Home loan with amount 100, method Cash, status pending, date 2025-02-01";

        let first = run(&executor, text).unwrap();
        let second = run(&executor, text).unwrap();

        // Replaying an Add records a second payment by design
        assert_ne!(first.doc().unwrap().id, second.doc().unwrap().id);
        assert_eq!(store.payments_for_loan(&loan.id).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_borrower_is_not_found() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);

        let err = run(
            &executor,
            "Add payment for Jane Smith on Home loan with amount 100, method Cash, status pending, date 2025-02-01",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            CommandError::Resolution(ResolutionError::BorrowerNotFound(ref name)) if name == "Jane Smith"
        ));
        assert_eq!(store.payment_count().unwrap(), 0);
    }

    #[test]
    fn test_unknown_loan_is_loan_not_found() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);

        let err = run(&executor, "Delete payment for John Doe on Business loan").unwrap_err();
        assert!(matches!(err, CommandError::Resolution(ResolutionError::LoanNotFound(_))));
    }

    #[test]
    fn test_payments_summing_to_total_pay_off_loan() {
        let (store, _, loan) = seeded_store();
        let executor = executor_for(&store);

        run(&executor, "Add payment for John Doe on Home loan with amount 30,000, method Online, status completed, date 2025-01-05").unwrap();
        run(&executor, "Add payment for John Doe on Home loan with amount 20,000, method Online, status completed, date 2025-02-05").unwrap();

        assert_eq!(store.loan(&loan.id).unwrap().status, LoanStatus::PaidOff);
    }

    #[test]
    fn test_overpayment_fails_entirely() {
        let (store, _, loan) = seeded_store();
        let executor = executor_for(&store);

        run(&executor, "Add payment for John Doe on Home loan with amount 30,000, method Online, status completed, date 2025-01-05").unwrap();
        let err = run(&executor, "Add payment for John Doe on Home loan with amount 20,001, method Online, status completed, date 2025-02-05").unwrap_err();

        assert!(matches!(
            err,
            CommandError::Execution(ExecutionError::InvariantViolation(ref m)) if m == "Payment exceeds total loan amount"
        ));
        assert_eq!(store.payments_for_loan(&loan.id).unwrap().len(), 1);
        assert_eq!(store.loan(&loan.id).unwrap().status, LoanStatus::Active);
    }

    #[test]
    fn test_update_targets_most_recent_payment() {
        let (store, borrower, loan) = seeded_store();
        let older = store
            .insert_payment(new_payment(&borrower, &loan, 100.0, PaymentStatus::Pending))
            .unwrap();
        let newer = store
            .insert_payment(new_payment(&borrower, &loan, 200.0, PaymentStatus::Pending))
            .unwrap();

        let executor = executor_for(&store);
        let result = run(&executor, "Update payment for John Doe on Home loan paymentAmount to 250").unwrap();

        let doc = result.doc().unwrap();
        assert_eq!(doc.id, newer.id);
        assert_eq!(doc.payment_amount, 250.0);

        let payments = store.payments_for_loan(&loan.id).unwrap();
        let untouched = payments.iter().find(|p| p.id == older.id).unwrap();
        assert_eq!(untouched.payment_amount, 100.0);
    }

    #[test]
    fn test_update_without_payments_is_payment_not_found() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);

        let err = run(&executor, "Update payment for John Doe on Home loan status to completed").unwrap_err();
        assert!(matches!(err, CommandError::Execution(ExecutionError::PaymentNotFound)));
    }

    #[test]
    fn test_update_status_passes_through_invariant() {
        let (store, borrower, loan) = seeded_store();
        store
            .insert_payment(new_payment(&borrower, &loan, 50_000.0, PaymentStatus::Pending))
            .unwrap();

        let executor = executor_for(&store);
        let result = run(&executor, "update payment for John Doe on Home loan status to completed").unwrap();

        assert_eq!(result.doc().unwrap().status, PaymentStatus::Completed);
        assert_eq!(store.loan(&loan.id).unwrap().status, LoanStatus::PaidOff);
    }

    #[test]
    fn test_delete_unconditional() {
        let (store, borrower, loan) = seeded_store();
        store
            .insert_payment(new_payment(&borrower, &loan, 100.0, PaymentStatus::Pending))
            .unwrap();

        let executor = executor_for(&store);
        let result = run(&executor, "Delete payment for John Doe on Home loan").unwrap();
        assert_eq!(result.action(), "delete");
        assert_eq!(store.payment_count().unwrap(), 0);

        let err = run(&executor, "Delete payment for John Doe on Home loan").unwrap_err();
        assert!(matches!(err, CommandError::Execution(ExecutionError::PaymentNotFound)));
    }

    #[test]
    fn test_delete_where_without_match_is_payment_not_found() {
        let (store, borrower, loan) = seeded_store();
        store
            .insert_payment(new_payment(&borrower, &loan, 100.0, PaymentStatus::Completed))
            .unwrap();

        let executor = executor_for(&store);
        let err = run(&executor, "delete payment for John Doe on Home loan where status is Pending").unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(store.payment_count().unwrap(), 1);
    }

    #[test]
    fn test_delete_where_matches_literal_text() {
        let (store, borrower, loan) = seeded_store();
        store
            .insert_payment(new_payment(&borrower, &loan, 100.0, PaymentStatus::Pending))
            .unwrap();

        let executor = executor_for(&store);

        // Filter values are not canonicalized: lower-case status never matches
        let err = run(&executor, "delete payment for John Doe on Home loan where status is pending").unwrap_err();
        assert!(err.is_not_found());

        let result = run(&executor, "delete payment for John Doe on Home loan where status is Pending").unwrap();
        assert_eq!(result.action(), "delete");
    }

    #[test]
    fn test_ambiguous_and_unrecognized_do_not_mutate() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);

        let result = executor.execute(&ParsedInstruction::Ambiguous { text: "AMBIGUOUS".into() });
        assert_eq!(result.action(), "none");

        let result = executor.execute(&ParsedInstruction::Unrecognized { text: "hello".into() });
        assert_eq!(result.action(), "none");
        assert_eq!(store.payment_count().unwrap(), 0);
    }

    #[test]
    fn test_execute_folds_errors_into_result() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);

        let parsed = InstructionParser::new()
            .parse("Delete payment for Nobody Known on Home loan")
            .unwrap();
        let result = executor.execute(&parsed);

        assert_eq!(
            result,
            ExecutionResult::Error {
                message: "Borrower \"Nobody Known\" not found.".into()
            }
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action"], "error");
    }

    #[test]
    fn test_result_serialization_shape() {
        let (store, _, _) = seeded_store();
        let executor = executor_for(&store);
        let result = run(&executor, "Add payment for John Doe on Home loan with amount 10, method Online, status pending, date 2025-01-05").unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action"], "add");
        assert_eq!(json["success"], true);
        assert_eq!(json["doc"]["paymentAmount"], 10.0);

        let none = serde_json::to_value(ExecutionResult::NoMutation { message: "x".into() }).unwrap();
        assert_eq!(none["action"], "none");
    }
}

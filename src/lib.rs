// Loan Desk - Core Library
// Voice/text command interpreter for loan payment records.
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod executor;
pub mod fuzzy;
pub mod gateway;
pub mod instruction;
pub mod interpreter;
pub mod resolver;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError};
pub use db::{
    get_events_for_entity, insert_event, setup_database, Event, PaymentFilter, RecordStore,
    SqliteStore,
};
pub use entities::{
    Borrower, FieldValue, Loan, LoanStatus, LoanType, NewPayment, Payment, PaymentField,
    PaymentMethod, PaymentStatus,
};
pub use error::{
    CommandError, ExecutionError, GenerationError, ProviderError, ResolutionError, StoreError,
    ValidationError,
};
pub use executor::{CommandExecutor, ExecutionResult};
pub use fuzzy::{FuzzyMatcher, MatchResult, CONFIDENCE_THRESHOLD};
pub use gateway::{
    build_prompt, cancel_pair, shared_provider, CancelHandle, CancelSignal, CompletionGateway,
    CompletionProvider, GeminiProvider, ProviderResponse, RetryPolicy,
};
pub use instruction::{InstructionParser, ParsedInstruction};
pub use interpreter::{CommandInterpreter, CommandOutcome, CommandResponse};
pub use resolver::{EntityResolver, Resolved};

// 🎙️ Command Interpreter - voice command → instruction → mutation
//
// Linear pipeline: prompt → gateway → parser → (resolver → store) → outcome.
// Store work is synchronous and runs on the blocking pool so concurrent
// commands keep making progress while one waits on SQLite.

use crate::db::RecordStore;
use crate::error::{CommandError, GenerationError};
use crate::executor::{CommandExecutor, ExecutionResult};
use crate::gateway::{build_prompt, CancelSignal, CompletionGateway, CompletionProvider, RetryPolicy};
use crate::instruction::{InstructionParser, ParsedInstruction};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug)]
pub enum CommandOutcome {
    /// Exactly one payment was added, updated or deleted
    Success {
        instruction: String,
        result: ExecutionResult,
    },
    /// The provider could not produce a well-formed instruction
    Ambiguous { instruction: String },
    /// No grammar rule matched; nothing was changed
    Unrecognized {
        instruction: String,
        result: ExecutionResult,
    },
    Failed {
        instruction: Option<String>,
        error: CommandError,
    },
}

/// JSON body returned to callers of the command endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    #[serde(rename = "aiInstruction", skip_serializing_if = "Option::is_none")]
    pub ai_instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn error(message: impl Into<String>) -> Self {
        CommandResponse {
            status: "error",
            ai_instruction: None,
            result: None,
            message: Some(message.into()),
        }
    }
}

impl CommandOutcome {
    pub fn instruction(&self) -> Option<&str> {
        match self {
            CommandOutcome::Success { instruction, .. }
            | CommandOutcome::Ambiguous { instruction }
            | CommandOutcome::Unrecognized { instruction, .. } => Some(instruction),
            CommandOutcome::Failed { instruction, .. } => instruction.as_deref(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, CommandOutcome::Success { .. })
    }

    /// 200 for applied / ambiguous / unrecognized, 404 when the executor
    /// stage reported the failure, 500 otherwise
    pub fn status_code(&self) -> u16 {
        match self {
            CommandOutcome::Failed { error, .. } if error.is_execution_failure() => 404,
            CommandOutcome::Failed { .. } => 500,
            _ => 200,
        }
    }

    pub fn to_response(&self) -> CommandResponse {
        match self {
            CommandOutcome::Success { instruction, result }
            | CommandOutcome::Unrecognized { instruction, result } => CommandResponse {
                status: "success",
                ai_instruction: Some(instruction.clone()),
                result: Some(result.clone()),
                message: None,
            },
            CommandOutcome::Ambiguous { instruction } => CommandResponse {
                status: "ambiguous",
                ai_instruction: Some(instruction.clone()),
                result: None,
                message: None,
            },
            CommandOutcome::Failed { instruction, error } => CommandResponse {
                status: "error",
                ai_instruction: instruction.clone(),
                result: None,
                message: Some(error.to_string()),
            },
        }
    }
}

// ============================================================================
// INTERPRETER
// ============================================================================

#[derive(Clone)]
pub struct CommandInterpreter {
    gateway: CompletionGateway,
    parser: Arc<InstructionParser>,
    executor: CommandExecutor,
}

impl CommandInterpreter {
    pub fn new(gateway: CompletionGateway, executor: CommandExecutor) -> Self {
        CommandInterpreter {
            gateway,
            parser: Arc::new(InstructionParser::new()),
            executor,
        }
    }

    pub fn from_parts(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn RecordStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(
            CompletionGateway::new(provider).with_policy(policy),
            CommandExecutor::new(store),
        )
    }

    pub async fn process(&self, voice_command: &str, cancel: &CancelSignal) -> CommandOutcome {
        let prompt = build_prompt(voice_command);

        let instruction = match self.gateway.complete_with_cancel(&prompt, cancel).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "instruction generation failed");
                return CommandOutcome::Failed {
                    instruction: None,
                    error: err.into(),
                };
            }
        };
        info!(%instruction, "instruction generated");

        let parsed = match self.parser.interpret(&instruction) {
            Ok(parsed) => parsed,
            Err(err) => return failed(instruction, err.into()),
        };

        match parsed {
            ParsedInstruction::Ambiguous { .. } => {
                info!("provider reported the command as ambiguous");
                CommandOutcome::Ambiguous { instruction }
            }
            ParsedInstruction::Unrecognized { .. } => {
                let result = self.executor.execute(&parsed);
                CommandOutcome::Unrecognized { instruction, result }
            }
            actionable => {
                // Last point at which a stale command can be dropped
                if cancel.is_cancelled() {
                    return failed(instruction, GenerationError::Cancelled.into());
                }

                let executor = self.executor.clone();
                let joined =
                    tokio::task::spawn_blocking(move || executor.try_execute(&actionable)).await;

                match joined {
                    Ok(Ok(result)) => {
                        info!(action = result.action(), "command applied");
                        CommandOutcome::Success { instruction, result }
                    }
                    Ok(Err(err)) => failed(instruction, err),
                    Err(join_err) => failed(instruction, CommandError::Internal(join_err.to_string())),
                }
            }
        }
    }
}

fn failed(instruction: String, error: CommandError) -> CommandOutcome {
    warn!(%instruction, error = %error, "command failed");
    CommandOutcome::Failed {
        instruction: Some(instruction),
        error,
    }
}

// ============================================================================
// TESTS
// ============================================================================

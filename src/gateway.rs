// 🛰️ Completion Gateway - bounded retry around the text-generation provider
//
// One prompt in, one instruction line out. Each attempt is bounded by a
// timeout; failures back off `base * 2^attempt` before the next try. A
// cancelled command stops at the next await point and never retries.

use crate::config::AppConfig;
use crate::error::{GenerationError, ProviderError};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// ============================================================================
// PROVIDER RESPONSE ENVELOPE
// ============================================================================

/// Provider response envelope (candidates → content → parts → text)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

impl ProviderResponse {
    pub fn from_text(text: &str) -> Self {
        ProviderResponse {
            candidates: vec![Candidate {
                content: Some(CandidateContent {
                    parts: vec![ContentPart {
                        text: Some(text.to_string()),
                    }],
                }),
                finish_reason: None,
            }],
        }
    }

    pub fn empty() -> Self {
        ProviderResponse::default()
    }

    /// Text parts of the first candidate, joined; None when blank
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

// ============================================================================
// PROVIDER SEAM
// ============================================================================

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// One completion call, no retries
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

// ============================================================================
// RETRY POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Backoff after the failed attempt `attempt` (0-based): 1s, 2s, 4s, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Observed by a running command; flips once when the caller gives up.
///
/// Only callers that outlive the command (the CLI's Ctrl+C task) need one.
/// The HTTP handler passes `never()`: a client disconnect drops the handler
/// future and the pipeline with it, so the signal itself never fires there.
/// A store write already on the blocking pool finishes either way.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Owned by the caller; `cancel()` aborts the paired command
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Err only means every signal is gone already
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    /// A signal that is never raised; cancellation is left to future drop
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle was dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

#[derive(Clone)]
pub struct CompletionGateway {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl CompletionGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        CompletionGateway {
            provider,
            policy: RetryPolicy::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        self.complete_with_cancel(prompt, &CancelSignal::never()).await
    }

    /// Retry loop. The provider call and each backoff sleep race the cancel
    /// signal; cancellation wins immediately.
    pub async fn complete_with_cancel(
        &self,
        prompt: &str,
        cancel: &CancelSignal,
    ) -> Result<String, GenerationError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            let call = tokio::time::timeout(self.policy.attempt_timeout, self.provider.generate(prompt));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                outcome = call => outcome,
            };

            let err = match outcome {
                Ok(Ok(response)) => {
                    let text = response.text().ok_or(GenerationError::EmptyResponse)?;
                    debug!(model = self.provider.model_name(), raw = %text, "completion received");
                    return Ok(text);
                }
                Ok(Err(err)) => err,
                Err(_) => ProviderError::Timeout(self.policy.attempt_timeout),
            };

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = attempts,
                retry_in_secs = delay.as_secs_f64(),
                error = %err,
                "completion attempt failed"
            );
            last_error = Some(err);

            tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(GenerationError::ExhaustedRetries {
            attempts,
            last: last_error.unwrap_or_else(|| ProviderError::Other("no attempt was made".to_string())),
        })
    }
}

// ============================================================================
// PROMPT
// ============================================================================

/// Strict-format prompt embedding the grammar and the raw command
pub fn build_prompt(command: &str) -> String {
    format!(
        r#"You convert finance admin voice commands into explicit payment instructions.
Normalize borrower and loan names: remove extra spaces, correct common typos and use approximate matching for spelling variations.
Reply with exactly one line, formatted strictly as one of:
  Add payment for <borrowerName> on <loanType> loan with amount <amount>, method <method>, status <status>, date <date>, notes <notes>
  Update payment for <borrowerName> on <loanType> loan <field> to <value>
  Delete payment for <borrowerName> on <loanType> loan
  Delete payment for <borrowerName> on <loanType> loan where <field> is <value>
Allowed fields: paymentAmount, paymentDate, paymentMethod, status, notes.
Allowed statuses: pending, completed, failed, refunded.
Dates must be in YYYY-MM-DD or DD/MM/YYYY format.
Reply "AMBIGUOUS" if unclear.
Command: "{}""#,
        command.trim()
    )
}

// ============================================================================
// GEMINI PROVIDER
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Other("GEMINI_KEY is not set".to_string()));
        }

        // Per-attempt timeouts are applied by the gateway
        let client = reqwest::Client::builder().build()?;

        Ok(GeminiProvider {
            client,
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new(config.gemini_key.clone().unwrap_or_default(), config.gemini_model.clone())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url.trim_end_matches('/'), self.model)
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// SHARED CLIENT
// ============================================================================

static SHARED_PROVIDER: OnceCell<Arc<dyn CompletionProvider>> = OnceCell::new();

/// Process-wide provider, built on first use and reused afterwards
pub fn shared_provider(config: &AppConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    SHARED_PROVIDER
        .get_or_try_init(|| {
            let provider = GeminiProvider::from_config(config)?;
            info!(model = provider.model_name(), "completion provider initialized");
            Ok(Arc::new(provider) as Arc<dyn CompletionProvider>)
        })
        .cloned()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then answers with `reply`
    pub(crate) struct FlakyProvider {
        failures: u32,
        reply: ProviderResponse,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        pub(crate) fn new(failures: u32, reply: &str) -> Self {
            FlakyProvider {
                failures,
                reply: ProviderResponse::from_text(reply),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn replying(reply: &str) -> Self {
            Self::new(0, reply)
        }

        pub(crate) fn with_response(reply: ProviderResponse) -> Self {
            FlakyProvider {
                failures: 0,
                reply,
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for FlakyProvider {
        async fn generate(&self, _prompt: &str) -> Result<ProviderResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProviderError::Api {
                    status: 503,
                    body: format!("overloaded #{}", call + 1),
                });
            }
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn generate(&self, _prompt: &str) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ProviderResponse::from_text("too late"))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_response_text_extraction() {
        let response: ProviderResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Delete payment "},{"text":"for John Doe on Home loan\n"}],"role":"model"},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(
            response.text().as_deref(),
            Some("Delete payment for John Doe on Home loan")
        );
        assert_eq!(response.candidates[0].finish_reason.as_deref(), Some("STOP"));

        assert_eq!(ProviderResponse::empty().text(), None);
        assert_eq!(ProviderResponse::from_text("   ").text(), None);
    }

    #[test]
    fn test_prompt_embeds_command_and_grammar() {
        let prompt = build_prompt("  add five thousand for jon doe  ");
        assert!(prompt.contains("Command: \"add five thousand for jon doe\""));
        assert!(prompt.contains("Delete payment for <borrowerName> on <loanType> loan where <field> is <value>"));
        assert!(prompt.contains("YYYY-MM-DD or DD/MM/YYYY"));
        assert!(prompt.contains("AMBIGUOUS"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(2, "Delete payment for John Doe on Home loan"));
        let gateway = CompletionGateway::new(provider.clone());

        let started = Instant::now();
        let text = gateway.complete("prompt").await.unwrap();

        assert_eq!(text, "Delete payment for John Doe on Home loan");
        assert_eq!(provider.calls(), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_carry_last_error() {
        let provider = Arc::new(FlakyProvider::new(10, "unused"));
        let gateway = CompletionGateway::new(provider.clone());

        let err = gateway.complete("prompt").await.unwrap_err();

        match err {
            GenerationError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("overloaded #3"));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_not_retried() {
        let provider = Arc::new(FlakyProvider::with_response(ProviderResponse::empty()));
        let gateway = CompletionGateway::new(provider.clone());

        let err = gateway.complete("prompt").await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_feeds_retry_loop() {
        let gateway = CompletionGateway::new(Arc::new(SlowProvider))
            .with_policy(RetryPolicy::new().with_attempt_timeout(Duration::from_secs(5)));

        let err = gateway.complete("prompt").await.unwrap_err();
        match err {
            GenerationError::ExhaustedRetries { last, .. } => {
                assert!(matches!(last, ProviderError::Timeout(d) if d == Duration::from_secs(5)));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let provider = Arc::new(FlakyProvider::new(10, "unused"));
        let gateway = CompletionGateway::new(provider.clone());
        let (handle, signal) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            handle.cancel();
        });

        let err = gateway.complete_with_cancel("prompt", &signal).await.unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        // Attempts at t=0 and t=1s; cancelled during the 2s backoff
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_inflight_call() {
        let gateway = CompletionGateway::new(Arc::new(SlowProvider));
        let (handle, signal) = cancel_pair();

        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            handle.cancel();
        });

        let err = gateway.complete_with_cancel("prompt", &signal).await.unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let provider = Arc::new(FlakyProvider::replying("Delete payment for John Doe on Home loan"));
        let gateway = CompletionGateway::new(provider.clone());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let err = gateway.complete_with_cancel("prompt", &signal).await.unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_never_signal_is_never_raised() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());

        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(!signal.is_cancelled());

        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_gemini_provider_requires_key() {
        assert!(GeminiProvider::new("", DEFAULT_MODEL).is_err());

        let provider = GeminiProvider::new("test-key", DEFAULT_MODEL)
            .unwrap()
            .with_base_url("http://localhost:9999/models/");
        assert_eq!(provider.model_name(), "gemini-2.5-flash");
        assert_eq!(
            provider.endpoint(),
            "http://localhost:9999/models/gemini-2.5-flash:generateContent"
        );
    }
}

//! Bounded retry with failure classification
//!
//! Every store call runs through [`execute`], a per-attempt state machine:
//! Attempt → {Success, Fatal, RetryNow, RetryWithBackoff}. The classifier
//! maps each enumerable [`FailureCode`] into exactly one verdict; the
//! wrapper is the sole place that decides whether an exhausted retry
//! budget surfaces as an error or is suppressed.

use crate::store::{FailureCode, StoreFailure, StoreResult};
use std::future::Future;
use std::time::Duration;

/// Retry class of a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Surface immediately, never retry
    Fatal,
    /// Retry after the short immediate-retry delay
    RetryNow,
    /// Retry after the backoff delay
    RetryWithBackoff,
}

/// Whether a failure still surfaces once the attempt budget is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Exhaustion returns the failure to the caller
    Report,
    /// Exhaustion returns success with no value
    Suppress,
}

/// Classifier output for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub class: RetryClass,
    pub report: ReportMode,
}

impl Verdict {
    const fn new(class: RetryClass, report: ReportMode) -> Self {
        Self { class, report }
    }
}

/// Map a store failure code into its retry verdict
///
/// Fatal codes are conditions retrying cannot fix (or must not repeat);
/// hard capacity limits back off and report; transient throughput signals
/// back off and suppress; transient internal faults retry immediately and
/// suppress.
pub fn classify(code: FailureCode) -> Verdict {
    use ReportMode::*;
    use RetryClass::*;

    match code {
        FailureCode::ValidationFailed
        | FailureCode::MalformedRequest
        | FailureCode::ResourceNotFound
        | FailureCode::ResourceInUse
        | FailureCode::ConditionalCheckFailed
        | FailureCode::TransactionConflict
        | FailureCode::TransactionCanceled
        | FailureCode::IdempotencyMismatch
        | FailureCode::None => Verdict::new(Fatal, Report),

        FailureCode::ProvisionedThroughputExceeded
        | FailureCode::RequestLimitExceeded
        | FailureCode::LimitExceeded
        | FailureCode::ItemCollectionSizeLimitExceeded
        | FailureCode::Unknown => Verdict::new(RetryWithBackoff, Report),

        FailureCode::Throttling | FailureCode::TransactionInProgress => {
            Verdict::new(RetryWithBackoff, Suppress)
        }

        FailureCode::InternalServerError
        | FailureCode::ServiceUnavailable
        | FailureCode::Timeout
        | FailureCode::Connection => Verdict::new(RetryNow, Suppress),
    }
}

/// Operation class, used to clamp the per-call timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Read,
    Write,
}

impl OpClass {
    /// Clamp a requested timeout to this class's window
    pub fn clamp_timeout(self, requested: Duration) -> Duration {
        let (min, max) = match self {
            OpClass::Read => (Duration::from_secs(5), Duration::from_secs(15)),
            OpClass::Write => (Duration::from_secs(10), Duration::from_secs(30)),
        };
        requested.clamp(min, max)
    }
}

/// Whether suppressed verdicts really return success on exhaustion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionPolicy {
    /// Honor the classifier: suppressed failures vanish at exhaustion
    #[default]
    Default,
    /// Surface every exhausted failure regardless of its report mode
    Never,
}

/// Maximum retries after the initial attempt
pub const MAX_RETRIES: u32 = 10;

/// Delay before a backoff retry
pub const BACKOFF_DELAY: Duration = Duration::from_millis(500);

/// Delay before an immediate retry
pub const IMMEDIATE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry settings snapshotted per call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt, clamped to `[0, MAX_RETRIES]`
    pub retries: u32,
    /// Requested per-call timeout (clamped per operation class)
    pub timeout: Duration,
    pub suppression: SuppressionPolicy,
}

impl RetryPolicy {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self {
            retries: retries.min(MAX_RETRIES),
            timeout,
            suppression: SuppressionPolicy::Default,
        }
    }

    pub fn with_suppression(mut self, suppression: SuppressionPolicy) -> Self {
        self.suppression = suppression;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES, Duration::from_secs(10))
    }
}

/// Run `op` under bounded classified retry
///
/// Returns `Ok(Some(value))` on success, `Ok(None)` when the budget was
/// spent on a suppressed failure class, and `Err` for fatal verdicts or
/// exhausted reportable failures. Each attempt is bounded by the clamped
/// per-call timeout; an attempt that times out is classified and retried
/// like any other failure, consuming one attempt of the budget.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    class: OpClass,
    operation: &str,
    mut op: F,
) -> StoreResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let timeout = class.clamp_timeout(policy.timeout);
    let attempts = policy.retries.min(MAX_RETRIES) + 1;
    let mut last_failure: Option<StoreFailure> = None;

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StoreFailure::timeout(operation)),
        };

        let failure = match result {
            Ok(value) => return Ok(Some(value)),
            Err(failure) => failure,
        };

        let verdict = classify(failure.code);
        match verdict.class {
            RetryClass::Fatal => {
                tracing::debug!(
                    operation,
                    code = ?failure.code,
                    "store call failed fatally"
                );
                return Err(failure);
            }
            RetryClass::RetryNow => {
                tracing::debug!(
                    operation,
                    attempt,
                    code = ?failure.code,
                    "transient store fault, retrying"
                );
                last_failure = Some(failure);
                if attempt < attempts {
                    tokio::time::sleep(IMMEDIATE_RETRY_DELAY).await;
                }
            }
            RetryClass::RetryWithBackoff => {
                tracing::debug!(
                    operation,
                    attempt,
                    code = ?failure.code,
                    "store signalled pressure, backing off"
                );
                last_failure = Some(failure);
                if attempt < attempts {
                    tokio::time::sleep(BACKOFF_DELAY).await;
                }
            }
        }
    }

    // Budget spent; the last verdict decides what the caller sees.
    let failure = last_failure.expect("retry loop ran at least one attempt");
    let verdict = classify(failure.code);
    match (verdict.report, policy.suppression) {
        (ReportMode::Suppress, SuppressionPolicy::Default) => {
            tracing::warn!(
                operation,
                code = ?failure.code,
                error = %failure,
                "retries exhausted on suppressed failure class, returning empty success"
            );
            Ok(None)
        }
        _ => {
            tracing::warn!(
                operation,
                code = ?failure.code,
                "retries exhausted"
            );
            Err(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure(code: FailureCode) -> StoreFailure {
        StoreFailure::new(code, format!("{code:?}"))
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_secs(5))
    }

    #[test]
    fn test_every_code_classifies_into_one_bucket() {
        use FailureCode::*;
        let all = [
            ValidationFailed,
            MalformedRequest,
            ResourceNotFound,
            ResourceInUse,
            ConditionalCheckFailed,
            TransactionConflict,
            TransactionCanceled,
            TransactionInProgress,
            IdempotencyMismatch,
            ProvisionedThroughputExceeded,
            RequestLimitExceeded,
            LimitExceeded,
            ItemCollectionSizeLimitExceeded,
            Throttling,
            InternalServerError,
            ServiceUnavailable,
            Timeout,
            Connection,
            None,
            Unknown,
        ];
        for code in all {
            let verdict = classify(code);
            if verdict.class == RetryClass::Fatal {
                assert_eq!(verdict.report, ReportMode::Report, "{code:?}");
            }
        }
        assert_eq!(classify(ConditionalCheckFailed).class, RetryClass::Fatal);
        assert_eq!(
            classify(ProvisionedThroughputExceeded),
            Verdict::new(RetryClass::RetryWithBackoff, ReportMode::Report)
        );
        assert_eq!(
            classify(Throttling),
            Verdict::new(RetryClass::RetryWithBackoff, ReportMode::Suppress)
        );
        assert_eq!(
            classify(InternalServerError),
            Verdict::new(RetryClass::RetryNow, ReportMode::Suppress)
        );
    }

    #[test]
    fn test_timeout_clamping() {
        assert_eq!(
            OpClass::Read.clamp_timeout(Duration::from_secs(1)),
            Duration::from_secs(5)
        );
        assert_eq!(
            OpClass::Read.clamp_timeout(Duration::from_secs(60)),
            Duration::from_secs(15)
        );
        assert_eq!(
            OpClass::Write.clamp_timeout(Duration::from_secs(12)),
            Duration::from_secs(12)
        );
        assert_eq!(
            OpClass::Write.clamp_timeout(Duration::from_secs(1)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_retry_budget_clamped() {
        assert_eq!(policy(99).retries, MAX_RETRIES);
        assert_eq!(policy(0).retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_within_budget_after_suppressed_failures() {
        let calls = AtomicU32::new(0);
        let result = execute(&policy(3), OpClass::Read, "get", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(failure(FailureCode::Throttling))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_exhaustion_returns_empty_success() {
        let calls = AtomicU32::new(0);
        let result = execute(&policy(2), OpClass::Read, "get", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(failure(FailureCode::Throttling)) }
        })
        .await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_policy_never_surfaces_exhaustion() {
        let strict = policy(1).with_suppression(SuppressionPolicy::Never);
        let result = execute(&strict, OpClass::Read, "get", || async {
            Err::<u32, _>(failure(FailureCode::Throttling))
        })
        .await;
        assert_eq!(result.unwrap_err().code, FailureCode::Throttling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_exhaustion_surfaces_failure() {
        let result = execute(&policy(1), OpClass::Write, "put", || async {
            Err::<(), _>(failure(FailureCode::ProvisionedThroughputExceeded))
        })
        .await;
        assert_eq!(
            result.unwrap_err().code,
            FailureCode::ProvisionedThroughputExceeded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_short_circuits() {
        let calls = AtomicU32::new(0);
        let result = execute(&policy(5), OpClass::Write, "put", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(failure(FailureCode::ConditionalCheckFailed)) }
        })
        .await;
        assert_eq!(result.unwrap_err().code, FailureCode::ConditionalCheckFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let result = execute(&policy(0), OpClass::Read, "get", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StoreFailure>(7u32) }
        })
        .await;
        assert_eq!(result.unwrap(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

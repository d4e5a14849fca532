use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::client::api::TenantPaymentsApi;

/// Injectable sleep so the reconciliation loop is unit-testable without
/// real timers.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget and delays for post-checkout verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Head start for the webhook before the first verification attempt.
    pub initial_delay: Duration,
    pub retry_delay: Duration,
    /// Total verification attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the single extra refresh after the budget is exhausted.
    pub post_exhaust_refresh_delay: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            retry_delay: Duration::from_secs(3),
            max_attempts: 5,
            post_exhaust_refresh_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Pending,
    Verifying { attempt: u32 },
    Confirmed,
    ExhaustedOptimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The server confirmed the payment within the attempt budget.
    Confirmed { attempts: u32 },
    /// Budget exhausted without server confirmation. The gateway reported
    /// success, so the caller reports success to the user and schedules one
    /// delayed refresh; the webhook remains the source of truth.
    ExhaustedOptimistic,
    /// The owner raised the abort flag (e.g. the screen unmounted); any
    /// in-flight result is discarded.
    Aborted,
}

/// Reconciles a gateway-success callback against the server's persisted
/// payment state: `Pending -> Verifying{attempt} -> Confirmed |
/// ExhaustedOptimistic`.
///
/// The gateway's client-side success callback can fire before the webhook
/// has flipped the server state to PAID, so success is never assumed from
/// the callback alone. Each attempt is independently guarded: an error in
/// one attempt counts as "not yet verified" and the loop continues.
pub struct Verifier<'a, A, S> {
    api: &'a A,
    sleeper: &'a S,
    policy: VerifyPolicy,
    abort: &'a AtomicBool,
    state: VerifyState,
}

impl<'a, A: TenantPaymentsApi, S: Sleeper> Verifier<'a, A, S> {
    pub fn new(api: &'a A, sleeper: &'a S, policy: VerifyPolicy, abort: &'a AtomicBool) -> Self {
        Self {
            api,
            sleeper,
            policy,
            abort,
            state: VerifyState::Pending,
        }
    }

    pub fn state(&self) -> VerifyState {
        self.state
    }

    pub async fn run(&mut self, payment_id: &str) -> VerifyOutcome {
        self.sleeper.sleep(self.policy.initial_delay).await;

        for attempt in 1..=self.policy.max_attempts {
            if self.abort.load(Ordering::Relaxed) {
                return VerifyOutcome::Aborted;
            }
            self.state = VerifyState::Verifying { attempt };

            match self.api.verify(payment_id).await {
                Ok(result) if result.verified && result.status == "PAID" => {
                    self.state = VerifyState::Confirmed;
                    return VerifyOutcome::Confirmed { attempts: attempt };
                }
                Ok(result) => {
                    tracing::debug!(
                        payment_id = %payment_id,
                        attempt,
                        status = %result.status,
                        "Payment not yet verified"
                    );
                }
                Err(error) => {
                    // Transient verification errors are swallowed; the next
                    // attempt may succeed.
                    tracing::warn!(
                        payment_id = %payment_id,
                        attempt,
                        error = %error,
                        "Verification attempt failed"
                    );
                }
            }

            if attempt < self.policy.max_attempts {
                self.sleeper.sleep(self.policy.retry_delay).await;
            }
        }

        self.state = VerifyState::ExhaustedOptimistic;
        VerifyOutcome::ExhaustedOptimistic
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{Sleeper, Verifier, VerifyOutcome, VerifyPolicy, VerifyState};
    use crate::client::api::{ClientError, TenantPaymentsApi};
    use crate::schemas::{PaymentOrder, RentDue, VerificationResult};

    /// Scripted verify endpoint: `Pending` answers `verified=false`,
    /// `Paid` answers confirmed, `Throw` fails the attempt.
    enum Step {
        Pending,
        Paid,
        Throw,
    }

    struct ScriptedApi {
        script: Vec<Step>,
        calls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TenantPaymentsApi for ScriptedApi {
        async fn next_due(&self) -> Result<RentDue, ClientError> {
            Ok(RentDue::settled())
        }

        async fn create_order(&self, _payment_id: &str) -> Result<PaymentOrder, ClientError> {
            Err(ClientError::Api("not under test".to_string()))
        }

        async fn verify(&self, _payment_id: &str) -> Result<VerificationResult, ClientError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(index) {
                Some(Step::Paid) => Ok(VerificationResult {
                    verified: true,
                    status: "PAID".to_string(),
                }),
                Some(Step::Throw) => Err(ClientError::Network("connection reset".to_string())),
                _ => Ok(VerificationResult {
                    verified: false,
                    status: "PENDING".to_string(),
                }),
            }
        }

        async fn generate_invoice(&self, _payment_id: &str) -> Result<Vec<u8>, ClientError> {
            Ok(Vec::new())
        }
    }

    /// Records requested delays instead of waiting.
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
            }
        }

        fn recorded(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn confirms_on_fifth_attempt() {
        let api = ScriptedApi::new(vec![
            Step::Pending,
            Step::Pending,
            Step::Pending,
            Step::Pending,
            Step::Paid,
        ]);
        let sleeper = RecordingSleeper::new();
        let abort = AtomicBool::new(false);

        let mut verifier = Verifier::new(&api, &sleeper, VerifyPolicy::default(), &abort);
        let outcome = verifier.run("pay-1").await;

        assert_eq!(outcome, VerifyOutcome::Confirmed { attempts: 5 });
        assert_eq!(api.call_count(), 5);
        assert_eq!(verifier.state(), VerifyState::Confirmed);
        // Initial delay plus four inter-attempt delays, all three seconds.
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(3); 5]);
    }

    #[tokio::test]
    async fn exhausts_budget_then_reports_optimistically() {
        let api = ScriptedApi::new(vec![]);
        let sleeper = RecordingSleeper::new();
        let abort = AtomicBool::new(false);

        let mut verifier = Verifier::new(&api, &sleeper, VerifyPolicy::default(), &abort);
        let outcome = verifier.run("pay-1").await;

        assert_eq!(outcome, VerifyOutcome::ExhaustedOptimistic);
        assert_eq!(api.call_count(), 5);
        assert_eq!(verifier.state(), VerifyState::ExhaustedOptimistic);
        assert_eq!(sleeper.recorded().len(), 5);
    }

    #[tokio::test]
    async fn recovers_from_transient_errors() {
        let api = ScriptedApi::new(vec![Step::Throw, Step::Throw, Step::Throw, Step::Paid]);
        let sleeper = RecordingSleeper::new();
        let abort = AtomicBool::new(false);

        let mut verifier = Verifier::new(&api, &sleeper, VerifyPolicy::default(), &abort);
        let outcome = verifier.run("pay-1").await;

        assert_eq!(outcome, VerifyOutcome::Confirmed { attempts: 4 });
        assert_eq!(api.call_count(), 4);
    }

    #[tokio::test]
    async fn aborts_without_calling_verify() {
        let api = ScriptedApi::new(vec![Step::Paid]);
        let sleeper = RecordingSleeper::new();
        let abort = AtomicBool::new(true);

        let mut verifier = Verifier::new(&api, &sleeper, VerifyPolicy::default(), &abort);
        let outcome = verifier.run("pay-1").await;

        assert_eq!(outcome, VerifyOutcome::Aborted);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn non_paid_status_is_not_confirmation() {
        // verified=true with a non-PAID status must not end the loop.
        struct OddApi;
        impl TenantPaymentsApi for OddApi {
            async fn next_due(&self) -> Result<RentDue, ClientError> {
                Ok(RentDue::settled())
            }
            async fn create_order(&self, _: &str) -> Result<PaymentOrder, ClientError> {
                Err(ClientError::Api("not under test".to_string()))
            }
            async fn verify(&self, _: &str) -> Result<VerificationResult, ClientError> {
                Ok(VerificationResult {
                    verified: true,
                    status: "PROCESSING".to_string(),
                })
            }
            async fn generate_invoice(&self, _: &str) -> Result<Vec<u8>, ClientError> {
                Ok(Vec::new())
            }
        }

        let sleeper = RecordingSleeper::new();
        let abort = AtomicBool::new(false);
        let mut verifier = Verifier::new(&OddApi, &sleeper, VerifyPolicy::default(), &abort);
        assert_eq!(verifier.run("pay-1").await, VerifyOutcome::ExhaustedOptimistic);
    }
}

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::client::api::{ClientError, TenantPaymentsApi};
use crate::client::checkout::{CheckoutDescriptor, CheckoutProvider};
use crate::client::verifier::{Sleeper, Verifier, VerifyOutcome, VerifyPolicy};

/// What the UI layer shows or does in response to the flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Success(String),
    Error(String),
    DueRefreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Nothing is due; no order was created.
    NothingDue,
    /// The attempt failed before or during checkout; the UI stays retryable.
    Failed,
    /// Server-confirmed payment.
    Confirmed,
    /// Gateway-confirmed payment the server has not yet acknowledged;
    /// reported as success per product policy, with a delayed refresh
    /// scheduled to pick up the webhook's write.
    ConfirmedOptimistic,
    Aborted,
}

#[derive(Debug)]
pub struct FlowReport {
    pub outcome: FlowOutcome,
    pub events: Vec<FlowEvent>,
}

impl FlowReport {
    pub fn refresh_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, FlowEvent::DueRefreshed))
            .count()
    }
}

/// Orchestrates one rent payment attempt end to end: due summary -> gateway
/// order -> checkout -> reconciliation -> due refresh. All failures are
/// scoped to this attempt; nothing here is fatal to the caller.
pub struct RentPaymentFlow<A, C, S> {
    api: A,
    checkout: C,
    sleeper: S,
    policy: VerifyPolicy,
    abort: Arc<AtomicBool>,
}

impl<A, C, S> RentPaymentFlow<A, C, S>
where
    A: TenantPaymentsApi,
    C: CheckoutProvider,
    S: Sleeper,
{
    pub fn new(api: A, checkout: C, sleeper: S) -> Self {
        Self {
            api,
            checkout,
            sleeper,
            policy: VerifyPolicy::default(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_policy(mut self, policy: VerifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Raise this flag to stop the reconciliation loop between awaits, e.g.
    /// when the owning screen unmounts mid-flow.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub async fn pay_next_due(&self) -> FlowReport {
        let mut events = Vec::new();

        let due = match self.api.next_due().await {
            Ok(due) => due,
            Err(error) => {
                events.push(FlowEvent::Error(error.to_string()));
                return FlowReport {
                    outcome: FlowOutcome::Failed,
                    events,
                };
            }
        };

        // A settled due summary never reaches the gateway.
        if !due.has_due {
            return FlowReport {
                outcome: FlowOutcome::NothingDue,
                events,
            };
        }
        let Some(payment_id) = due.payment_id.clone() else {
            events.push(FlowEvent::Error(
                "Due summary is missing a payment reference.".to_string(),
            ));
            return FlowReport {
                outcome: FlowOutcome::Failed,
                events,
            };
        };

        let order = match self.api.create_order(&payment_id).await {
            Ok(order) => order,
            Err(error) => {
                events.push(FlowEvent::Error(error.to_string()));
                return FlowReport {
                    outcome: FlowOutcome::Failed,
                    events,
                };
            }
        };
        if order.razorpay_key_id.trim().is_empty() {
            events.push(FlowEvent::Error(
                ClientError::GatewayNotConfigured.to_string(),
            ));
            return FlowReport {
                outcome: FlowOutcome::Failed,
                events,
            };
        }

        let descriptor = CheckoutDescriptor::from_order(&order);
        let ack = match self.checkout.open(&descriptor).await {
            Ok(ack) => ack,
            Err(failure) => {
                // Gateway-reported failures surface immediately and never
                // enter the verification loop.
                events.push(FlowEvent::Error(failure.user_message()));
                return FlowReport {
                    outcome: FlowOutcome::Failed,
                    events,
                };
            }
        };
        tracing::debug!(
            payment_id = %payment_id,
            gateway_payment_id = %ack.razorpay_payment_id,
            "Checkout reported success; reconciling with server"
        );

        let mut verifier = Verifier::new(&self.api, &self.sleeper, self.policy, &self.abort);
        match verifier.run(&payment_id).await {
            VerifyOutcome::Confirmed { .. } => {
                events.push(FlowEvent::Success("Payment successful.".to_string()));
                self.refresh_due(&mut events).await;
                FlowReport {
                    outcome: FlowOutcome::Confirmed,
                    events,
                }
            }
            VerifyOutcome::ExhaustedOptimistic => {
                // The gateway said success; the webhook may still be
                // processing. Report success rather than alarming the
                // tenant, and refresh once more after a delay so the
                // authoritative state catches up on screen.
                events.push(FlowEvent::Success(
                    "Payment received. Confirmation may take a moment.".to_string(),
                ));
                self.refresh_due(&mut events).await;
                self.sleeper
                    .sleep(self.policy.post_exhaust_refresh_delay)
                    .await;
                self.refresh_due(&mut events).await;
                FlowReport {
                    outcome: FlowOutcome::ConfirmedOptimistic,
                    events,
                }
            }
            VerifyOutcome::Aborted => FlowReport {
                outcome: FlowOutcome::Aborted,
                events,
            },
        }
    }

    async fn refresh_due(&self, events: &mut Vec<FlowEvent>) {
        match self.api.next_due().await {
            Ok(_) => events.push(FlowEvent::DueRefreshed),
            Err(error) => {
                tracing::warn!(error = %error, "Due refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::{FlowEvent, FlowOutcome, RentPaymentFlow};
    use crate::client::api::{ClientError, TenantPaymentsApi};
    use crate::client::checkout::{
        CheckoutDescriptor, CheckoutFailure, CheckoutProvider, CheckoutSuccess,
    };
    use crate::client::verifier::Sleeper;
    use crate::schemas::{
        CheckoutPrefill, CheckoutTheme, OrderNotes, PaymentOrder, RentDue, VerificationResult,
    };

    fn march_due() -> RentDue {
        RentDue {
            payment_id: Some("pay-row-1".to_string()),
            property: None,
            period_month: 3,
            period_year: 2024,
            base_amount: 5000.0,
            late_fee_amount: 0.0,
            late_fee_per_day: 50.0,
            billing_grace_last_day: 5,
            total_amount: 5000.0,
            has_due: true,
            is_overdue: false,
        }
    }

    struct StubApi {
        due: RentDue,
        /// Verify answers `verified=false` until this attempt number.
        verified_at_attempt: Option<u32>,
        due_calls: AtomicU32,
        order_calls: AtomicU32,
        verify_calls: AtomicU32,
    }

    impl StubApi {
        fn new(due: RentDue, verified_at_attempt: Option<u32>) -> Self {
            Self {
                due,
                verified_at_attempt,
                due_calls: AtomicU32::new(0),
                order_calls: AtomicU32::new(0),
                verify_calls: AtomicU32::new(0),
            }
        }
    }

    impl TenantPaymentsApi for StubApi {
        async fn next_due(&self) -> Result<RentDue, ClientError> {
            self.due_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.due.clone())
        }

        async fn create_order(&self, payment_id: &str) -> Result<PaymentOrder, ClientError> {
            assert_eq!(payment_id, "pay-row-1");
            self.order_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PaymentOrder {
                order_id: "order_xyz".to_string(),
                // 5000 rupees in paise, as the server prices the order.
                amount: 500000,
                currency: "INR".to_string(),
                razorpay_key_id: "rzp_test_abc".to_string(),
                notes: OrderNotes {
                    is_test_payment: true,
                },
                prefill: CheckoutPrefill {
                    name: String::new(),
                    email: String::new(),
                    contact: String::new(),
                },
                theme: CheckoutTheme {
                    color: "#2563eb".to_string(),
                },
            })
        }

        async fn verify(&self, _payment_id: &str) -> Result<VerificationResult, ClientError> {
            let attempt = self.verify_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let verified = self.verified_at_attempt.is_some_and(|at| attempt >= at);
            Ok(VerificationResult {
                verified,
                status: if verified { "PAID" } else { "PENDING" }.to_string(),
            })
        }

        async fn generate_invoice(&self, _payment_id: &str) -> Result<Vec<u8>, ClientError> {
            Ok(Vec::new())
        }
    }

    struct HappyCheckout;
    impl CheckoutProvider for HappyCheckout {
        async fn open(
            &self,
            descriptor: &CheckoutDescriptor,
        ) -> Result<CheckoutSuccess, CheckoutFailure> {
            assert_eq!(descriptor.amount, 500000);
            Ok(CheckoutSuccess {
                razorpay_payment_id: "pay_gw".to_string(),
                razorpay_order_id: descriptor.order_id.clone(),
                razorpay_signature: "sig".to_string(),
            })
        }
    }

    struct FailingCheckout(CheckoutFailure);
    impl CheckoutProvider for FailingCheckout {
        async fn open(
            &self,
            _descriptor: &CheckoutDescriptor,
        ) -> Result<CheckoutSuccess, CheckoutFailure> {
            Err(self.0.clone())
        }
    }

    struct InstantSleeper {
        sleeps: std::sync::Mutex<Vec<Duration>>,
    }
    impl InstantSleeper {
        fn new() -> Self {
            Self {
                sleeps: std::sync::Mutex::new(Vec::new()),
            }
        }
    }
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn settled_due_never_creates_an_order() {
        let mut due = march_due();
        due.has_due = false;
        due.payment_id = None;
        let flow = RentPaymentFlow::new(StubApi::new(due, None), HappyCheckout, InstantSleeper::new());

        let report = flow.pay_next_due().await;
        assert_eq!(report.outcome, FlowOutcome::NothingDue);
        assert_eq!(flow.api.order_calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.api.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gateway_network_failure_surfaces_without_verification() {
        let flow = RentPaymentFlow::new(
            StubApi::new(march_due(), Some(1)),
            FailingCheckout(CheckoutFailure::Failed {
                code: "NETWORK_ERROR".to_string(),
                description: None,
            }),
            InstantSleeper::new(),
        );

        let report = flow.pay_next_due().await;
        assert_eq!(report.outcome, FlowOutcome::Failed);
        assert!(report
            .events
            .contains(&FlowEvent::Error("Network error".to_string())));
        assert_eq!(flow.api.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.refresh_count(), 0);
    }

    #[tokio::test]
    async fn first_verify_confirms_and_refreshes_once() {
        let flow = RentPaymentFlow::new(
            StubApi::new(march_due(), Some(1)),
            HappyCheckout,
            InstantSleeper::new(),
        );

        let report = flow.pay_next_due().await;
        assert_eq!(report.outcome, FlowOutcome::Confirmed);
        assert!(report
            .events
            .contains(&FlowEvent::Success("Payment successful.".to_string())));
        assert_eq!(report.refresh_count(), 1);
        assert_eq!(flow.api.order_calls.load(Ordering::SeqCst), 1);
        assert_eq!(flow.api.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn confirms_on_fifth_attempt_with_single_refresh() {
        let flow = RentPaymentFlow::new(
            StubApi::new(march_due(), Some(5)),
            HappyCheckout,
            InstantSleeper::new(),
        );

        let report = flow.pay_next_due().await;
        assert_eq!(report.outcome, FlowOutcome::Confirmed);
        assert_eq!(flow.api.verify_calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.refresh_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_success_and_schedules_delayed_refresh() {
        let flow = RentPaymentFlow::new(
            StubApi::new(march_due(), None),
            HappyCheckout,
            InstantSleeper::new(),
        );

        let report = flow.pay_next_due().await;
        assert_eq!(report.outcome, FlowOutcome::ConfirmedOptimistic);
        assert_eq!(flow.api.verify_calls.load(Ordering::SeqCst), 5);
        // Success is still reported: the gateway said the payment went
        // through, and the webhook will settle the record.
        assert!(matches!(report.events.first(), Some(FlowEvent::Success(_))));
        // One immediate refresh plus exactly one delayed refresh.
        assert_eq!(report.refresh_count(), 2);
        let sleeps = flow.sleeper.sleeps.lock().unwrap().clone();
        assert_eq!(sleeps.last(), Some(&Duration::from_secs(5)));
    }
}

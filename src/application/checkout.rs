use super::poller::{PollSchedule, ScheduledTask, TaskSlot};
use super::session::SessionContext;
use super::wizard::{FormField, PaymentForm, PaymentWizard, WizardStep};
use crate::domain::payment::{PaymentMethod, PaymentSession, PaymentStatus};
use crate::domain::plan::Plan;
use crate::domain::ports::{PaymentGatewayRef, SubscriptionApiRef};
use crate::error::{FieldErrors, PlatformError, Result};
use std::fmt;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// Notifications emitted while a checkout progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Initiated {
        payment_id: String,
        method: PaymentMethod,
        qr_code_url: Option<String>,
        checkout_url: Option<String>,
    },
    InitiationFailed {
        reason: String,
    },
    StatusChecked {
        payment_id: String,
        status: PaymentStatus,
    },
    StatusCheckFailed {
        payment_id: String,
        reason: String,
    },
    Activated {
        payment_id: String,
        plan_id: u64,
    },
    ActivationFailed {
        payment_id: String,
        reason: String,
    },
    PaymentFailed {
        payment_id: String,
    },
    PaymentCanceled {
        payment_id: String,
    },
    TimedOut {
        payment_id: String,
    },
    Closed,
}

/// How a checkout ended, once it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Activated,
    /// Payment went through but linking it to the account did not.
    ActivationFailed(String),
    PaymentFailed,
    PaymentCanceled,
    TimedOut,
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlowOutcome::Activated)
    }
}

impl fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowOutcome::Activated => f.write_str("Payment successful, your subscription is active"),
            FlowOutcome::ActivationFailed(reason) => write!(
                f,
                "Payment succeeded but subscription activation failed ({reason}). Please contact support"
            ),
            FlowOutcome::PaymentFailed => f.write_str("Payment failed. Please try again"),
            FlowOutcome::PaymentCanceled => f.write_str("Payment was canceled"),
            FlowOutcome::TimedOut => {
                f.write_str("Still waiting for the provider to confirm the payment")
            }
        }
    }
}

/// Read-only view of the checkout for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub step: WizardStep,
    pub form: PaymentForm,
    pub errors: FieldErrors,
    pub plan: Option<Plan>,
    pub payment: Option<PaymentSession>,
    pub in_flight: bool,
    pub alert: Option<String>,
    pub outcome: Option<FlowOutcome>,
}

impl FlowSnapshot {
    /// Whether the "pay" control should be enabled.
    pub fn can_initiate(&self) -> bool {
        !self.in_flight && !self.payment.as_ref().is_some_and(blocks_new_payment)
    }
}

fn blocks_new_payment(payment: &PaymentSession) -> bool {
    matches!(
        payment.status,
        PaymentStatus::Pending | PaymentStatus::Completed
    )
}

#[derive(Debug, Default)]
struct FlowState {
    wizard: PaymentWizard,
    payment: Option<PaymentSession>,
    in_flight: bool,
    alert: Option<String>,
    outcome: Option<FlowOutcome>,
    /// Bumped on every open/close. Work started under an older value is stale.
    generation: u64,
}

impl FlowState {
    fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::default()
        };
    }
}

/// Payment checkout: wizard, provider initiation, status polling and
/// subscription activation for one selected plan.
///
/// At most one status poller runs per flow. It stops on a terminal status,
/// on [`PaymentFlow::close`], or when the flow is dropped.
pub struct PaymentFlow {
    gateway: PaymentGatewayRef,
    subscriptions: SubscriptionApiRef,
    session: Arc<SessionContext>,
    schedule: PollSchedule,
    state: Arc<Mutex<FlowState>>,
    poller: std::sync::Mutex<TaskSlot>,
    events: mpsc::UnboundedSender<FlowEvent>,
}

impl PaymentFlow {
    pub fn new(
        gateway: PaymentGatewayRef,
        subscriptions: SubscriptionApiRef,
        session: Arc<SessionContext>,
        schedule: PollSchedule,
    ) -> (Self, mpsc::UnboundedReceiver<FlowEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let flow = Self {
            gateway,
            subscriptions,
            session,
            schedule,
            state: Arc::new(Mutex::new(FlowState::default())),
            poller: std::sync::Mutex::new(TaskSlot::new()),
            events,
        };
        (flow, receiver)
    }

    /// Opens the checkout for a plan, discarding anything from before.
    pub async fn open(&self, plan: Plan) {
        let mut state = self.state.lock().await;
        state.reset();
        self.cancel_polling();
        info!(plan_id = plan.id, "checkout opened");
        state.wizard.open(plan);
    }

    /// Resets all local state and stops polling.
    ///
    /// An activation already sent for a completed payment is left to finish;
    /// its result is ignored.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.reset();
        let stopped = self.cancel_polling();
        drop(state);
        debug!(stopped_poller = stopped, "checkout closed");
        let _ = self.events.send(FlowEvent::Closed);
    }

    pub async fn set_field(&self, field: FormField, value: impl Into<String>) {
        self.state.lock().await.wizard.set(field, value);
    }

    pub async fn next_step(&self) -> Result<()> {
        self.state.lock().await.wizard.next()
    }

    pub async fn back(&self) {
        self.state.lock().await.wizard.back();
    }

    pub async fn snapshot(&self) -> FlowSnapshot {
        let state = self.state.lock().await;
        FlowSnapshot {
            step: state.wizard.step(),
            form: state.wizard.form().clone(),
            errors: state.wizard.errors().clone(),
            plan: state.wizard.plan().cloned(),
            payment: state.payment.clone(),
            in_flight: state.in_flight,
            alert: state.alert.clone(),
            outcome: state.outcome.clone(),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_active()
    }

    /// Sends the payment to the selected provider and starts polling.
    ///
    /// Rejected with [`PlatformError::Busy`] while a request is in flight or a
    /// payment is pending. Validation failures never reach the network.
    pub async fn initiate(&self) -> Result<PaymentSession> {
        let email = self.session.email().await.ok_or_else(|| {
            PlatformError::Unauthenticated("no email in session, please log in".to_string())
        })?;

        let (request, generation) = {
            let mut state = self.state.lock().await;
            if state.in_flight || state.payment.as_ref().is_some_and(blocks_new_payment) {
                return Err(PlatformError::Busy);
            }
            let request = state.wizard.payment_request(&email)?;
            state.in_flight = true;
            state.alert = None;
            (request, state.generation)
        };

        info!(
            method = %request.method,
            plan_id = request.plan_id,
            amount = %request.amount,
            "initiating payment"
        );
        let result = self.gateway.initiate(&request).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("discarding initiation result for a closed checkout");
            return Err(PlatformError::Stale);
        }
        state.in_flight = false;

        match result {
            Ok(payment) => {
                info!(payment_id = %payment.payment_id, "payment pending");
                state.payment = Some(payment.clone());
                state.outcome = None;
                let _ = self.events.send(FlowEvent::Initiated {
                    payment_id: payment.payment_id.clone(),
                    method: request.method,
                    qr_code_url: payment.qr_code_url.clone(),
                    checkout_url: payment.checkout_url.clone(),
                });
                self.start_polling(payment.payment_id.clone(), request.plan_id, generation);
                Ok(payment)
            }
            Err(e) => {
                warn!(error = %e, "payment initiation failed");
                state.alert = Some(e.to_string());
                let _ = self.events.send(FlowEvent::InitiationFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn start_polling(&self, payment_id: String, plan_id: u64, generation: u64) {
        let poll = StatusPoll {
            gateway: self.gateway.clone(),
            subscriptions: self.subscriptions.clone(),
            session: self.session.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            schedule: self.schedule,
            payment_id,
            plan_id,
            generation,
        };
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ScheduledTask::spawn("payment-status", poll.run()));
    }

    /// Callers hold the state lock so a concurrent `initiate` cannot install a
    /// poller between the reset and the cancel.
    fn cancel_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel()
    }
}

/// Everything one polling task needs, detached from the flow that spawned it.
struct StatusPoll {
    gateway: PaymentGatewayRef,
    subscriptions: SubscriptionApiRef,
    session: Arc<SessionContext>,
    state: Arc<Mutex<FlowState>>,
    events: mpsc::UnboundedSender<FlowEvent>,
    schedule: PollSchedule,
    payment_id: String,
    plan_id: u64,
    generation: u64,
}

impl StatusPoll {
    async fn run(self) {
        let mut ticks = self.schedule.start();
        loop {
            if !ticks.next().await {
                self.finish(FlowOutcome::TimedOut, FlowEvent::TimedOut {
                    payment_id: self.payment_id.clone(),
                })
                .await;
                return;
            }

            let status = match self.gateway.status(&self.payment_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(payment_id = %self.payment_id, error = %e, "status check failed");
                    let _ = self.events.send(FlowEvent::StatusCheckFailed {
                        payment_id: self.payment_id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            {
                let mut state = self.state.lock().await;
                if state.generation != self.generation {
                    return;
                }
                let Some(payment) = state.payment.as_mut() else {
                    return;
                };
                if payment.apply(status) {
                    info!(payment_id = %self.payment_id, %status, "payment status changed");
                }
                let _ = self.events.send(FlowEvent::StatusChecked {
                    payment_id: self.payment_id.clone(),
                    status,
                });
            }

            match status {
                PaymentStatus::Pending => continue,
                PaymentStatus::Completed => {
                    // Outlives the poller: a paid subscription is always activated.
                    tokio::spawn(self.activate());
                    return;
                }
                PaymentStatus::Failed => {
                    self.finish(FlowOutcome::PaymentFailed, FlowEvent::PaymentFailed {
                        payment_id: self.payment_id.clone(),
                    })
                    .await;
                    return;
                }
                PaymentStatus::Canceled => {
                    self.finish(FlowOutcome::PaymentCanceled, FlowEvent::PaymentCanceled {
                        payment_id: self.payment_id.clone(),
                    })
                    .await;
                    return;
                }
            }
        }
    }

    async fn activate(self) {
        let result = match self.session.bearer().await {
            Ok(bearer) => self.subscriptions.activate(self.plan_id, &bearer).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(payment_id = %self.payment_id, plan_id = self.plan_id, "subscription activated");
                self.finish(FlowOutcome::Activated, FlowEvent::Activated {
                    payment_id: self.payment_id.clone(),
                    plan_id: self.plan_id,
                })
                .await;
            }
            Err(e) => {
                error!(
                    payment_id = %self.payment_id,
                    plan_id = self.plan_id,
                    error = %e,
                    "payment completed but activation failed"
                );
                self.finish(
                    FlowOutcome::ActivationFailed(e.to_string()),
                    FlowEvent::ActivationFailed {
                        payment_id: self.payment_id.clone(),
                        reason: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn finish(&self, outcome: FlowOutcome, event: FlowEvent) {
        let mut state = self.state.lock().await;
        if state.generation != self.generation {
            return;
        }
        state.alert = (!outcome.is_success()).then(|| outcome.to_string());
        state.outcome = Some(outcome);
        let _ = self.events.send(event);
    }
}

//! Application layer: the checkout flow and the state around it.
//!
//! `PaymentFlow` is the entry point for buying a plan. It drives the two-step
//! `PaymentWizard`, hands the validated request to a payment provider, and
//! polls the payment on a `ScheduledTask` until it resolves. `SessionContext`
//! owns the bearer token used for activation and the dashboard calls.

pub mod checkout;
pub mod poller;
pub mod session;
pub mod wizard;

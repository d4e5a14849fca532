//! Tenant-side rent payment client.
//!
//! Drives the payment lifecycle against the `/pg-tenant/payments/*` API:
//! load the due summary, create a gateway order, hand it to a checkout
//! provider, reconcile the outcome against the server, and refresh the due
//! state. Every collaborator is injected (API transport, checkout surface,
//! sleep) so the whole flow is testable without timers or a network.

pub mod api;
pub mod checkout;
pub mod flow;
pub mod session;
pub mod verifier;

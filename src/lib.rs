//! PG rent payment backend and tenant client.
//!
//! The server half exposes the `/pg-tenant/payments/*` REST API backed by
//! Postgres and Razorpay; the [`client`] module implements the tenant-side
//! payment lifecycle (order creation, checkout hand-off, verification
//! reconciliation, due refresh) against that API.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod repository;
pub mod routes;
pub mod schemas;
pub mod services;
pub mod state;

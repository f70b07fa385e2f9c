//! Core types and trait definitions for the Fanout push dispatch engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! It owns the filter-match algorithm and the dispatch/reconciliation
//! pipeline; storage backends and delivery transports plug in through the
//! [`store::SubscriptionStore`] and [`transport::PushTransport`] traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod cache;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod limiter;
pub mod matcher;
pub mod store;
pub mod subscription;
pub mod transport;

pub use error::{Error, Result};

//! Matching engine
//!
//! Price-time-priority limit order matching with partial fills,
//! cancellation, and per-user open-order and fill views.
//!
//! **Key invariants:**
//! - Best price crosses first; equal-price matches are FIFO by arrival
//! - Deterministic matching (same inputs, same outputs)
//! - Conservation of amount: resting + matched == posted
//! - Self-trading is permitted; both legs are recorded

pub mod book;
pub mod engine;

pub use engine::{BookError, OrderBook, PostLimitResult};

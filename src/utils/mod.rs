//! The `utils` module provides shared building blocks used across `ordermq`:
//! the error taxonomy, logging initialisation and the retry/backoff policy.

pub mod error;
pub mod logging;
pub mod retry;

#[cfg(test)]
mod tests;

//! Workflow core: appointment lifecycle and its dependent side effects.
//!
//! Each operation takes the pool it works against, fails fast on the first
//! violated precondition, and leaves retries to the caller. Multi-step
//! writes (invoice generation, rating submission) run inside a single
//! transaction.

pub mod appointments;
pub mod invoices;
pub mod ratings;

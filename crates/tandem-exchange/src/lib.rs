//! Synchronized selfie-exchange rendezvous.
//!
//! Two users reveal a live selfie to each other only if both submit within a
//! server-enforced capture window. [`machine::ExchangeService`] owns every
//! transition; timers, reveal delivery and media cleanup hang off it.

pub mod cleanup;
pub mod delivery;
pub mod error;
pub mod fake;
pub mod guard;
pub mod keys;
pub mod machine;
pub mod ports;
pub mod reveal;
pub mod scheduler;
pub mod sqlite;


pub use error::ExchangeError;
pub use machine::{ExchangeQueues, ExchangeService};

//! Identifier Lifecycle Manager
//!
//! Mint, reserve, resolve, redirect and retract persistent identifiers.

pub mod manager;

pub use manager::{Binding, IdentifierManager};

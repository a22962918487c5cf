#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # silo
//!
//! Declarative object-storage reconciliation. Buckets, users, canned
//! policies and service accounts are declared in a manifest and driven
//! toward that declaration by the controller in [`silo_reconciler`].
//!
//! This crate holds the binary's plumbing: CLI definitions, configuration,
//! manifest loading and command handlers.

pub use silo_core;
pub use silo_events;
pub use silo_reconciler;

pub mod cli;
pub mod commands;
pub mod config;
pub mod manifest;

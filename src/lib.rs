//! AIMP Hub: an email-transported meeting-negotiation service. See
//! `spec.md`/`SPEC_FULL.md` at the repository root for the design.
//!
//! This crate is the negotiation engine only — IMAP/SMTP wire handling, LLM
//! HTTP transport details beyond the `oracle::LlmOracle` trait boundary, CLI
//! entry points, and config-file loading are out of scope (`spec.md` §1) and
//! left to the embedding application. `hub::build` wires the in-scope pieces
//! (`Store`, a `Transport`, an `LlmOracle`, identity) into a runnable
//! `PollLoop` given a concrete `HubConfig` and injected collaborators.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod hub;
pub mod identity;
pub mod mail;
pub mod oracle;
pub mod poll_loop;
pub mod protocol;
pub mod store;
pub mod transport;

pub use error::{HubError, HubResult};
pub use poll_loop::{PollLoop, TickReport};

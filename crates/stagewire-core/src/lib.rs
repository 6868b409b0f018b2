//! Shared vocabulary for the stagewire component runtime.
//!
//! This crate holds the types every layer agrees on: component states and
//! the legal transition table, the error taxonomy, buffer headers, port
//! definitions, the command/event vocabulary, the data-I/O strategy trait,
//! and the collaborator contracts implemented by codec adapters and
//! platform layers.

#![deny(clippy::wildcard_imports)]

pub mod adapter;
pub mod buffer;
pub mod command;
pub mod dio;
pub mod error;
pub mod event;
pub mod event_flag;
pub mod port;
pub mod state;

//! Go-Back-N ARQ Link Simulation

#![forbid(unsafe_code, unused_must_use)]
#![warn(clippy::all, missing_docs)]

/// Common simulation defaults.
pub mod common;

/// Discrete-event scheduler.
pub mod event_loop;

/// Frames, headers and link addressing.
pub mod frame;

/// Receiver-side corruption oracles.
pub mod error_model;

/// Bounded transmit queue.
pub mod queue;

/// Shared broadcast channel.
pub mod channel;

/// The ARQ link endpoint.
pub mod endpoint;

/// Upper-layer traffic source and sink.
pub mod app;

/// End-to-end simulation harness.
pub mod simulation;

// SPDX-License-Identifier: MIT OR Apache-2.0
//! The user-facing Backend: persists sessions, messages, tool
//! executions, usage, and the run queue; processes forwarded executor
//! callbacks; brokers user-input requests; and fans events out to
//! WebSocket clients.
#![deny(unsafe_code)]

pub mod api;
pub mod callbacks;
pub mod imports;
pub mod input_requests;
pub mod repo;
pub mod sessions;
pub mod settings;
pub mod state;
pub mod tasks;
pub mod ws;
pub mod ws_api;
pub mod ws_service;

pub use api::build_app;
pub use repo::Database;
pub use settings::BackendSettings;
pub use state::AppState;

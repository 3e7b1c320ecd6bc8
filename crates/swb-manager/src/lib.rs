// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Executor Manager: claims queued runs from the Backend, stages
//! workspaces, dispatches to executors, brokers callbacks back to the
//! Backend, and exports finished workspaces to the blob store.
#![deny(unsafe_code)]

pub mod api;
pub mod backend_client;
pub mod callbacks;
pub mod dispatch;
pub mod executor_client;
pub mod export;
pub mod pull;
pub mod resolver;
pub mod settings;
pub mod staging;
pub mod state;
pub mod workspace_local;

pub use api::build_app;
pub use settings::ManagerSettings;
pub use state::ManagerState;

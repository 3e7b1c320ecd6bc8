// SPDX-License-Identifier: MIT OR Apache-2.0
//! Core domain types shared by the switchboard Backend and Executor
//! Manager: sessions, runs, executor callbacks, agent message content,
//! state patches, user-input requests, and skill-import jobs.
#![deny(unsafe_code)]

pub mod callback;
pub mod config;
pub mod import;
pub mod input_request;
pub mod message;
pub mod preset;
pub mod run;
pub mod session;
pub mod state;
pub mod trace;

pub use callback::{AgentCallback, CallbackReceipt, CallbackResponse, CallbackStatus};
pub use config::{ContainerMode, TaskConfig};
pub use import::{SkillImportJob, SkillImportStatus};
pub use input_request::{UserInputRequest, UserInputStatus};
pub use message::{AgentMessage, ContentBlock, MessageRole};
pub use preset::{McpPreset, SkillPreset};
pub use run::{ClaimedRun, NewRun, Run, RunStatus, ScheduleMode};
pub use session::{Session, SessionStatus, WorkspaceExportStatus};
pub use state::{AgentState, FileChange, McpStatus, TodoItem, WorkspaceState};
pub use trace::RequestContext;

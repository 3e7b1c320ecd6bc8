// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory repositories.
//!
//! Plain records keyed by id behind a thin store layer. No reverse
//! relationships; cross-entity lookups go through explicit queries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use swb_core::{
    McpPreset, MessageRole, Session, SkillImportJob, SkillPreset, UserInputRequest,
    UserInputStatus,
};
use swb_queue::RunQueue;
use uuid::Uuid;

/// A persisted message, append-only with a monotonically increasing id.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    /// Monotonic message id.
    pub id: i64,
    /// Owning session.
    pub session_id: Uuid,
    /// Persisted role.
    pub role: MessageRole,
    /// Raw message content as received from the executor.
    pub content: Value,
    /// First text block, truncated.
    pub text_preview: Option<String>,
    /// Persist time.
    pub created_at: DateTime<Utc>,
}

/// One tool call: the Use block creates the row, the Result block
/// completes it. At most one row per `(session_id, tool_use_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionRow {
    /// Row id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// SDK tool-use id, unique per session.
    pub tool_use_id: String,
    /// Message that created the row.
    pub message_id: i64,
    /// Tool name (`"unknown"` until the Use block arrives).
    pub tool_name: String,
    /// Tool input payload.
    pub tool_input: Option<Value>,
    /// Tool output payload (`{"content": ...}`).
    pub tool_output: Option<Value>,
    /// Whether the tool reported an error.
    pub is_error: bool,
    /// Message that carried the result.
    pub result_message_id: Option<i64>,
    /// Milliseconds between row creation and the result landing.
    pub duration_ms: Option<i64>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Usage accounting appended per `ResultMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRow {
    /// Row id.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Total cost in USD.
    pub total_cost_usd: Option<f64>,
    /// Inbound tokens.
    pub input_tokens: Option<i64>,
    /// Outbound tokens.
    pub output_tokens: Option<i64>,
    /// Run duration.
    pub duration_ms: Option<i64>,
    /// Raw usage object.
    pub usage: Value,
    /// Persist time.
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MessageState {
    next_id: i64,
    messages: Vec<StoredMessage>,
}

/// All Backend state. Every store is independently locked; locks are
/// never held across await points.
#[derive(Default)]
pub struct Database {
    /// The run queue.
    pub runs: RunQueue,
    sessions: RwLock<HashMap<Uuid, Session>>,
    messages: RwLock<MessageState>,
    tool_executions: RwLock<Vec<ToolExecutionRow>>,
    usage_logs: RwLock<Vec<UsageRow>>,
    input_requests: RwLock<HashMap<Uuid, UserInputRequest>>,
    import_jobs: RwLock<HashMap<Uuid, SkillImportJob>>,
    env_vars: RwLock<HashMap<String, BTreeMap<String, String>>>,
    mcp_presets: RwLock<BTreeMap<String, McpPreset>>,
    skill_presets: RwLock<BTreeMap<String, SkillPreset>>,
    slash_commands: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl Database {
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- sessions ----------------------------------------------------------

    /// Insert a session.
    pub fn insert_session(&self, session: Session) {
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .insert(session.session_id, session);
    }

    /// Fetch a session by UUID.
    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .get(&session_id)
            .cloned()
    }

    /// Fetch a session by its assigned SDK session id.
    pub fn session_by_sdk_id(&self, sdk_session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .values()
            .find(|s| s.sdk_session_id.as_deref() == Some(sdk_session_id))
            .cloned()
    }

    /// Apply `mutate` to a session, bumping `updated_at`. Returns the
    /// updated session.
    pub fn update_session(
        &self,
        session_id: Uuid,
        mutate: impl FnOnce(&mut Session),
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().expect("sessions lock poisoned");
        let session = sessions.get_mut(&session_id)?;
        mutate(session);
        session.updated_at = Utc::now();
        Some(session.clone())
    }

    /// Sessions for `user_id`, newest first.
    pub fn sessions_for_user(&self, user_id: &str, limit: usize, offset: usize) -> Vec<Session> {
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        let mut list: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.into_iter().skip(offset).take(limit).collect()
    }

    // -- messages ----------------------------------------------------------

    /// Append a message, assigning the next monotonic id.
    pub fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: Value,
        text_preview: Option<String>,
    ) -> StoredMessage {
        let mut state = self.messages.write().expect("messages lock poisoned");
        state.next_id += 1;
        let message = StoredMessage {
            id: state.next_id,
            session_id,
            role,
            content,
            text_preview,
            created_at: Utc::now(),
        };
        state.messages.push(message.clone());
        message
    }

    /// All messages of a session in persist order.
    pub fn messages_for_session(&self, session_id: Uuid) -> Vec<StoredMessage> {
        self.messages
            .read()
            .expect("messages lock poisoned")
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    /// First user message of a session.
    pub fn first_user_message(&self, session_id: Uuid) -> Option<StoredMessage> {
        self.messages
            .read()
            .expect("messages lock poisoned")
            .messages
            .iter()
            .find(|m| m.session_id == session_id && m.role == MessageRole::User)
            .cloned()
    }

    // -- tool executions ---------------------------------------------------

    /// Fetch the row for `(session_id, tool_use_id)`.
    pub fn tool_execution(&self, session_id: Uuid, tool_use_id: &str) -> Option<ToolExecutionRow> {
        self.tool_executions
            .read()
            .expect("tool executions lock poisoned")
            .iter()
            .find(|t| t.session_id == session_id && t.tool_use_id == tool_use_id)
            .cloned()
    }

    /// Insert a tool-execution row.
    pub fn insert_tool_execution(&self, row: ToolExecutionRow) {
        self.tool_executions
            .write()
            .expect("tool executions lock poisoned")
            .push(row);
    }

    /// Apply `mutate` to the row for `(session_id, tool_use_id)`.
    pub fn update_tool_execution(
        &self,
        session_id: Uuid,
        tool_use_id: &str,
        mutate: impl FnOnce(&mut ToolExecutionRow),
    ) -> Option<ToolExecutionRow> {
        let mut rows = self
            .tool_executions
            .write()
            .expect("tool executions lock poisoned");
        let row = rows
            .iter_mut()
            .find(|t| t.session_id == session_id && t.tool_use_id == tool_use_id)?;
        mutate(row);
        Some(row.clone())
    }

    /// All tool executions of a session in creation order.
    pub fn tool_executions_for_session(&self, session_id: Uuid) -> Vec<ToolExecutionRow> {
        self.tool_executions
            .read()
            .expect("tool executions lock poisoned")
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    // -- usage -------------------------------------------------------------

    /// Append a usage row.
    pub fn append_usage(&self, row: UsageRow) {
        self.usage_logs
            .write()
            .expect("usage lock poisoned")
            .push(row);
    }

    /// All usage rows of a session.
    pub fn usage_for_session(&self, session_id: Uuid) -> Vec<UsageRow> {
        self.usage_logs
            .read()
            .expect("usage lock poisoned")
            .iter()
            .filter(|u| u.session_id == session_id)
            .cloned()
            .collect()
    }

    // -- user-input requests -----------------------------------------------

    /// Insert a user-input request.
    pub fn insert_input_request(&self, request: UserInputRequest) {
        self.input_requests
            .write()
            .expect("input requests lock poisoned")
            .insert(request.id, request);
    }

    /// Fetch a user-input request.
    pub fn input_request(&self, id: Uuid) -> Option<UserInputRequest> {
        self.input_requests
            .read()
            .expect("input requests lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Apply `mutate` to a user-input request.
    pub fn update_input_request(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut UserInputRequest),
    ) -> Option<UserInputRequest> {
        let mut requests = self
            .input_requests
            .write()
            .expect("input requests lock poisoned");
        let request = requests.get_mut(&id)?;
        mutate(request);
        Some(request.clone())
    }

    /// Pending requests of a session, oldest first.
    pub fn pending_input_requests(&self, session_id: Uuid) -> Vec<UserInputRequest> {
        let mut list: Vec<UserInputRequest> = self
            .input_requests
            .read()
            .expect("input requests lock poisoned")
            .values()
            .filter(|r| r.session_id == session_id && r.status == UserInputStatus::Pending)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    // -- skill import jobs -------------------------------------------------

    /// Insert a skill-import job.
    pub fn insert_import_job(&self, job: SkillImportJob) {
        self.import_jobs
            .write()
            .expect("import jobs lock poisoned")
            .insert(job.id, job);
    }

    /// Fetch a skill-import job.
    pub fn import_job(&self, id: Uuid) -> Option<SkillImportJob> {
        self.import_jobs
            .read()
            .expect("import jobs lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Apply `mutate` to a job, bumping `updated_at`.
    pub fn update_import_job(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut SkillImportJob),
    ) -> Option<SkillImportJob> {
        let mut jobs = self.import_jobs.write().expect("import jobs lock poisoned");
        let job = jobs.get_mut(&id)?;
        mutate(job);
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    /// Oldest queued import job, if any.
    pub fn next_queued_import_job(&self) -> Option<SkillImportJob> {
        self.import_jobs
            .read()
            .expect("import jobs lock poisoned")
            .values()
            .filter(|j| j.status == swb_core::SkillImportStatus::Queued)
            .min_by_key(|j| j.created_at)
            .cloned()
    }

    // -- env vars, presets, slash commands ---------------------------------

    /// Replace the env map for `user_id`.
    pub fn set_env_vars(&self, user_id: &str, vars: BTreeMap<String, String>) {
        self.env_vars
            .write()
            .expect("env vars lock poisoned")
            .insert(user_id.to_string(), vars);
    }

    /// Env map for `user_id`.
    pub fn env_vars(&self, user_id: &str) -> BTreeMap<String, String> {
        self.env_vars
            .read()
            .expect("env vars lock poisoned")
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Register an MCP preset by name.
    pub fn upsert_mcp_preset(&self, preset: McpPreset) {
        self.mcp_presets
            .write()
            .expect("mcp presets lock poisoned")
            .insert(preset.name.clone(), preset);
    }

    /// List MCP presets.
    pub fn mcp_presets(&self, include_inactive: bool) -> Vec<McpPreset> {
        self.mcp_presets
            .read()
            .expect("mcp presets lock poisoned")
            .values()
            .filter(|p| include_inactive || p.is_active)
            .cloned()
            .collect()
    }

    /// Register a skill preset by name.
    pub fn upsert_skill_preset(&self, preset: SkillPreset) {
        self.skill_presets
            .write()
            .expect("skill presets lock poisoned")
            .insert(preset.name.clone(), preset);
    }

    /// List skill presets.
    pub fn skill_presets(&self, include_inactive: bool) -> Vec<SkillPreset> {
        self.skill_presets
            .read()
            .expect("skill presets lock poisoned")
            .values()
            .filter(|p| include_inactive || p.is_active)
            .cloned()
            .collect()
    }

    /// Replace the slash-command set for `user_id`.
    pub fn set_slash_commands(&self, user_id: &str, commands: BTreeMap<String, String>) {
        self.slash_commands
            .write()
            .expect("slash commands lock poisoned")
            .insert(user_id.to_string(), commands);
    }

    /// Slash commands (name → markdown) for `user_id`.
    pub fn slash_commands(&self, user_id: &str) -> BTreeMap<String, String> {
        self.slash_commands
            .read()
            .expect("slash commands lock poisoned")
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swb_core::TaskConfig;

    #[test]
    fn message_ids_are_monotonic() {
        let db = Database::new();
        let session_id = Uuid::new_v4();
        let a = db.append_message(session_id, MessageRole::User, json!({}), None);
        let b = db.append_message(session_id, MessageRole::Assistant, json!({}), None);
        assert!(b.id > a.id);
    }

    #[test]
    fn session_update_bumps_updated_at() {
        let db = Database::new();
        let session = Session::new("u1", TaskConfig::for_user("u1"));
        let id = session.session_id;
        let before = session.updated_at;
        db.insert_session(session);
        let updated = db
            .update_session(id, |s| s.title = Some("t".into()))
            .unwrap();
        assert!(updated.updated_at >= before);
        assert_eq!(updated.title.as_deref(), Some("t"));
    }

    #[test]
    fn sdk_id_lookup() {
        let db = Database::new();
        let mut session = Session::new("u1", TaskConfig::for_user("u1"));
        session.sdk_session_id = Some("sdk-9".into());
        let id = session.session_id;
        db.insert_session(session);
        assert_eq!(db.session_by_sdk_id("sdk-9").unwrap().session_id, id);
        assert!(db.session_by_sdk_id("other").is_none());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object-key layout for the blob store.
//!
//! ```text
//! sessions/<session_id>/manifest.json
//! sessions/<session_id>/files/<relative_path>
//! sessions/<session_id>/archive.zip
//! skills/<user_id>/<skill_name>/...
//! attachments/<user_id>/<session_id>/<attachment_id>/<name>
//! ```

/// Prefix under which a session's workspace files are exported.
#[must_use]
pub fn session_files_prefix(session_id: &str) -> String {
    format!("sessions/{session_id}/files")
}

/// Key of one exported workspace file.
#[must_use]
pub fn session_file_key(session_id: &str, rel_path: &str) -> String {
    format!("sessions/{session_id}/files/{}", rel_path.trim_start_matches('/'))
}

/// Key of a session's manifest JSON.
#[must_use]
pub fn session_manifest_key(session_id: &str) -> String {
    format!("sessions/{session_id}/manifest.json")
}

/// Key of a session's workspace archive.
#[must_use]
pub fn session_archive_key(session_id: &str) -> String {
    format!("sessions/{session_id}/archive.zip")
}

/// Prefix under which one user's skill trees live.
#[must_use]
pub fn skill_prefix(user_id: &str, skill_name: &str) -> String {
    format!("skills/{user_id}/{skill_name}/")
}

/// Prefix for one uploaded attachment.
#[must_use]
pub fn attachment_prefix(user_id: &str, session_id: &str, attachment_id: &str) -> String {
    format!("attachments/{user_id}/{session_id}/{attachment_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_layout() {
        assert_eq!(session_manifest_key("s1"), "sessions/s1/manifest.json");
        assert_eq!(session_archive_key("s1"), "sessions/s1/archive.zip");
        assert_eq!(session_file_key("s1", "/a/b.txt"), "sessions/s1/files/a/b.txt");
        assert_eq!(session_files_prefix("s1"), "sessions/s1/files");
    }
}

//! Stable buffer key derivation.
//!
//! One logical audio stream maps to exactly one key for its lifetime; two
//! concurrent streams always map to distinct keys. The key is an opaque
//! string composed from the session, room, stream, speaker and target
//! language identifiers of the job record.

use crate::error::{Result, UttermillError};
use crate::job::JobRequest;
use std::fmt;

/// Opaque identifier of one logical audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey(String);

impl BufferKey {
    /// Composes a key from individual identifiers.
    ///
    /// `session` is mandatory; each optional identifier is appended as a
    /// tagged segment when present, so partial identity (e.g. a stream with
    /// no speaker label) still yields a stable, distinct key.
    pub fn new(
        session: &str,
        room: Option<&str>,
        stream: Option<&str>,
        speaker: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self> {
        if session.is_empty() {
            return Err(UttermillError::InvalidJob {
                message: "empty session_id".to_string(),
            });
        }

        let mut key = String::with_capacity(session.len() + 32);
        key.push_str(session);
        if let Some(room) = room
            && !room.is_empty()
        {
            key.push_str("|room:");
            key.push_str(room);
        }
        if let Some(stream) = stream
            && !stream.is_empty()
        {
            key.push_str("|stream:");
            key.push_str(stream);
        }
        if let Some(speaker) = speaker
            && !speaker.is_empty()
        {
            key.push_str("|speaker:");
            key.push_str(speaker);
        }
        if let Some(language) = language
            && !language.is_empty()
        {
            key.push_str("|lang:");
            key.push_str(language);
        }
        Ok(Self(key))
    }

    /// Derives the key for a job record.
    pub fn from_job(job: &JobRequest) -> Result<Self> {
        Self::new(
            &job.session_id,
            job.room_id.as_deref(),
            job.stream_id.as_deref(),
            job.speaker_id.as_deref(),
            job.target_language.as_deref(),
        )
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

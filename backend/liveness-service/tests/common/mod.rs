//! Fakes for reconciler integration tests
//!
//! In-memory stand-ins for the upstream backends, the session table, the hint
//! store and the playback prober. Each one records what it was asked to do.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use liveness_service::db::SessionRepository;
use liveness_service::error::{AppError, Result};
use liveness_service::models::{BackendKind, LiveSession};
use liveness_service::services::{
    BackendError, HealthProbe, LivenessKey, LogSink, ProbeError, StreamingBackend,
};
use redis::RedisResult;
use redis_utils::{HintStore, MemoryHintStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted liveness answer for one room.
#[derive(Debug, Clone, Copy)]
pub enum Liveness {
    Live,
    Gone,
    Unreachable,
    /// The query never answers.
    Hang,
    /// Not live, answered after a delay.
    GoneAfter(Duration),
}

/// Streaming backend answering from a per-room script.
#[derive(Clone)]
pub struct FakeBackend {
    kind: BackendKind,
    rooms: Arc<Mutex<HashMap<i64, Liveness>>>,
    queries: Arc<Mutex<Vec<i64>>>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            rooms: Arc::new(Mutex::new(HashMap::new())),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_room(self, room_id: i64, liveness: Liveness) -> Self {
        self.rooms.lock().unwrap().insert(room_id, liveness);
        self
    }

    pub fn queries(&self) -> Vec<i64> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn is_live(&self, room_id: i64) -> std::result::Result<bool, BackendError> {
        self.queries.lock().unwrap().push(room_id);
        let liveness = self
            .rooms
            .lock()
            .unwrap()
            .get(&room_id)
            .copied()
            .unwrap_or(Liveness::Gone);

        match liveness {
            Liveness::Live => Ok(true),
            Liveness::Gone => Ok(false),
            Liveness::Unreachable => Err(BackendError::Status {
                status: 502,
                url: format!("http://fake/{}", room_id),
            }),
            Liveness::Hang => std::future::pending().await,
            Liveness::GoneAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(false)
            }
        }
    }

    fn playback_url(&self, room_id: i64) -> String {
        format!("http://fake-{}/live/room_{}.m3u8", self.kind, room_id)
    }
}

/// In-memory live session table with soft delete.
#[derive(Clone, Default)]
pub struct FakeSessionRepository {
    sessions: Arc<Mutex<Vec<LiveSession>>>,
    deleted: Arc<Mutex<Vec<i64>>>,
    teardown_calls: Arc<Mutex<Vec<(Vec<i64>, String)>>>,
    extensions: Arc<Mutex<Vec<(i64, u64)>>>,
    failing_rooms: Arc<Mutex<Vec<i64>>>,
}

impl FakeSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session created `age` ago.
    pub fn insert(
        &self,
        id: i64,
        backend: BackendKind,
        room_id: i64,
        record_id: i64,
        stream_id: i64,
        age: Duration,
    ) {
        let created_at = Utc::now() - ChronoDuration::from_std(age).unwrap();
        self.sessions.lock().unwrap().push(LiveSession {
            id,
            room_id,
            record_id,
            stream_id,
            backend,
            remark: None,
            created_at,
        });
    }

    /// Session lookups by key for `room_id` fail from now on.
    pub fn fail_lookup_for_room(&self, room_id: i64) {
        self.failing_rooms.lock().unwrap().push(room_id);
    }

    pub fn teardown_calls(&self) -> Vec<(Vec<i64>, String)> {
        self.teardown_calls.lock().unwrap().clone()
    }

    pub fn extensions(&self) -> Vec<(i64, u64)> {
        self.extensions.lock().unwrap().clone()
    }

    pub fn is_live(&self, id: i64) -> bool {
        !self.deleted.lock().unwrap().contains(&id)
    }

    pub fn remark(&self, id: i64) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.remark.clone())
    }
}

#[async_trait]
impl SessionRepository for FakeSessionRepository {
    async fn find_sessions_older_than(
        &self,
        backend: BackendKind,
        threshold: Duration,
    ) -> Result<Vec<LiveSession>> {
        let cutoff = Utc::now() - ChronoDuration::from_std(threshold).unwrap();
        let deleted = self.deleted.lock().unwrap().clone();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.backend == backend && s.created_at < cutoff && !deleted.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn find_session_ids(&self, key: &LivenessKey) -> Result<Vec<i64>> {
        if self.failing_rooms.lock().unwrap().contains(&key.room_id) {
            return Err(AppError::Internal(format!(
                "lookup failed for room {}",
                key.room_id
            )));
        }
        let deleted = self.deleted.lock().unwrap().clone();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.backend == key.backend
                    && s.room_id == key.room_id
                    && s.record_id == key.record_id
                    && s.stream_id == key.stream_id
                    && !deleted.contains(&s.id)
            })
            .map(|s| s.id)
            .collect())
    }

    async fn mark_and_delete(&self, ids: &[i64], remark: &str) -> Result<u64> {
        self.teardown_calls
            .lock()
            .unwrap()
            .push((ids.to_vec(), remark.to_string()));

        let mut deleted = self.deleted.lock().unwrap();
        let mut sessions = self.sessions.lock().unwrap();
        let mut removed = 0;
        for session in sessions.iter_mut() {
            if ids.contains(&session.id) && !deleted.contains(&session.id) {
                session.remark = Some(remark.to_string());
                deleted.push(session.id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn extend_duration(&self, record_id: i64, secs: u64) -> Result<()> {
        self.extensions.lock().unwrap().push((record_id, secs));
        Ok(())
    }
}

/// Hint store that records every `set_ex` on top of the in-memory store.
#[derive(Default)]
pub struct RecordingHintStore {
    inner: MemoryHintStore,
    writes: Mutex<Vec<(String, String, Duration)>>,
}

impl RecordingHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(String, String, Duration)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }
}

#[async_trait]
impl HintStore for RecordingHintStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string(), ttl));
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> RedisResult<bool> {
        self.inner.set_nx_px(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> RedisResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }
}

/// Probe replaying a queue of results per URL; an exhausted queue repeats
/// its fallback.
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    fallback: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn healthy_by_default() -> Self {
        Self::with_fallback(true)
    }

    pub fn unhealthy_by_default() -> Self {
        Self::with_fallback(false)
    }

    fn with_fallback(fallback: bool) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, url: impl Into<String>, results: impl IntoIterator<Item = bool>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.into(), results.into_iter().collect());
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> std::result::Result<(), ProbeError> {
        self.calls.lock().unwrap().push(url.to_string());
        let healthy = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(self.fallback);

        if healthy {
            Ok(())
        } else {
            Err(ProbeError::Status(503))
        }
    }
}

#[derive(Default)]
pub struct RecordingLogSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl RecordingLogSink {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for RecordingLogSink {
    async fn write(&self, channel: &str, payload: &str) -> Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

//! # Request Registry
//!
//! Process-lifetime store of `PipelineState`, keyed by request id and indexed
//! by every stage id. Nothing is evicted and nothing survives a restart.
//!
//! `put` is the only mutator. Writes are checked against the stored revision
//! so a caller that read a state before an await cannot overwrite a newer one.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use super::records::{PipelineState, RecordKind};
use crate::error::{PipelineError, PipelineResult};

/// Rejected write
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Stale write for {request_id}: expected revision {expected}, found {found}")]
    StaleRevision {
        request_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Request {0} is already registered")]
    AlreadyExists(String),
}

#[derive(Default)]
struct RegistryInner {
    states: HashMap<String, PipelineState>,
    /// stage id -> (kind, request id)
    index: HashMap<String, (RecordKind, String)>,
    last_activity: Option<DateTime<Utc>>,
}

/// In-memory registry of pipeline states
#[derive(Default)]
pub struct RequestRegistry {
    inner: RwLock<RegistryInner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a state.
    ///
    /// A state with revision 0 is a new request. Otherwise its revision must
    /// match the stored one. Returns the stored copy with its new revision.
    pub fn put(&self, mut state: PipelineState) -> Result<PipelineState, RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        match inner.states.get(&state.request_id) {
            None if state.revision != 0 => {
                return Err(RegistryError::StaleRevision {
                    request_id: state.request_id,
                    expected: state.revision,
                    found: 0,
                });
            }
            Some(_) if state.revision == 0 => {
                return Err(RegistryError::AlreadyExists(state.request_id));
            }
            Some(current) if current.revision != state.revision => {
                return Err(RegistryError::StaleRevision {
                    request_id: state.request_id,
                    expected: state.revision,
                    found: current.revision,
                });
            }
            _ => {}
        }

        let now = Utc::now();
        state.revision += 1;
        state.updated_at = now;

        for (kind, id) in state.stage_ids() {
            inner.index.insert(id, (kind, state.request_id.clone()));
        }
        inner.last_activity = Some(now);
        inner.states.insert(state.request_id.clone(), state.clone());

        Ok(state)
    }

    pub fn get(&self, request_id: &str) -> Option<PipelineState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.states.get(request_id).cloned()
    }

    /// Look up a request id, failing with `NotFound`
    pub fn require(&self, request_id: &str) -> PipelineResult<PipelineState> {
        self.get(request_id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Request, request_id))
    }

    /// Resolve a stage id of the given kind to its request's state.
    ///
    /// An id of a different kind is reported as not found.
    pub fn get_by_stage(&self, kind: RecordKind, id: &str) -> PipelineResult<PipelineState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .index
            .get(id)
            .filter(|(indexed_kind, _)| *indexed_kind == kind)
            .and_then(|(_, request_id)| inner.states.get(request_id))
            .cloned()
            .ok_or_else(|| PipelineError::not_found(kind, id))
    }

    /// Resolve any id (request or stage) to its request's state
    pub fn lookup(&self, id: &str) -> Option<PipelineState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = inner.states.get(id) {
            return Some(state.clone());
        }
        inner
            .index
            .get(id)
            .and_then(|(_, request_id)| inner.states.get(request_id))
            .cloned()
    }

    /// Snapshot of every state, oldest first
    pub fn states(&self) -> Vec<PipelineState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut states: Vec<PipelineState> = inner.states.values().cloned().collect();
        states.sort_by_key(|s| s.created_at);
        states
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .states
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity
    }
}

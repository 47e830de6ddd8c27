//! In-memory resource store for exercising the updater without a cluster

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ResourceId, ResourceStore, StoreError, UpdateError, VersionedDocument};

/// Scripted behaviour for the next call to `update`
pub enum UpdateScript {
    /// Another writer bumps the version before ours lands
    Conflict,
    Fail(StoreError),
}

pub struct MemoryStore {
    id: ResourceId,
    state: Mutex<State>,
}

struct State {
    document: Value,
    version: u64,
    gets: usize,
    writes: usize,
    script: VecDeque<UpdateScript>,
    get_error: Option<StoreError>,
}

impl MemoryStore {
    pub fn new(id: ResourceId, document: Value) -> Self {
        Self {
            id,
            state: Mutex::new(State {
                document,
                version: 1,
                gets: 0,
                writes: 0,
                script: VecDeque::new(),
                get_error: None,
            }),
        }
    }

    /// Queue outcomes for upcoming updates; once drained, updates behave
    /// normally
    pub fn script(self, script: impl IntoIterator<Item = UpdateScript>) -> Self {
        self.state.lock().unwrap().script.extend(script);
        self
    }

    /// Make the next `get` fail
    pub fn failing_get(self, error: StoreError) -> Self {
        self.state.lock().unwrap().get_error = Some(error);
        self
    }

    pub fn document(&self) -> Value {
        self.state.lock().unwrap().document.clone()
    }

    pub fn gets(&self) -> usize {
        self.state.lock().unwrap().gets
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn image(&self, index: usize) -> Option<String> {
        self.document()
            .pointer(&format!("{}/{index}/image", super::CONTAINERS_POINTER))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, id: &ResourceId) -> Result<VersionedDocument, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        if let Some(err) = state.get_error.take() {
            return Err(err);
        }
        if *id != self.id {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(VersionedDocument {
            document: state.document.clone(),
            version: state.version.to_string(),
        })
    }

    async fn update(
        &self,
        id: &ResourceId,
        document: &VersionedDocument,
    ) -> Result<(), UpdateError> {
        let mut state = self.state.lock().unwrap();
        if *id != self.id {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        match state.script.pop_front() {
            Some(UpdateScript::Conflict) => state.version += 1,
            Some(UpdateScript::Fail(err)) => return Err(err.into()),
            None => {}
        }
        if document.version != state.version.to_string() {
            return Err(UpdateError::Conflict(format!(
                "stale version {}, current is {}",
                document.version, state.version
            )));
        }
        state.document = document.document.clone();
        state.version += 1;
        state.writes += 1;
        Ok(())
    }
}

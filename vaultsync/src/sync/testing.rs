//! In-memory remote used by the engine tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use drive_core::DriveError;
use reqwest::StatusCode;
use time::{Duration, OffsetDateTime};

use super::remote::{RemoteObject, RemoteStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub lists: usize,
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub renames: usize,
    pub deletes: usize,
}

struct StoredObject {
    name: String,
    bytes: Vec<u8>,
    modified: OffsetDateTime,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    next_id: u64,
    tick: i64,
    stats: CallStats,
    uploads: Vec<String>,
    failing: Option<String>,
}

impl State {
    fn now(&mut self) -> OffsetDateTime {
        self.tick += 1;
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(self.tick)
    }

    fn object(&self, id: &str) -> Result<RemoteObject, DriveError> {
        let stored = self.objects.get(id).ok_or_else(|| not_found(id))?;
        Ok(RemoteObject {
            id: id.to_string(),
            name: stored.name.clone(),
            modified_time: Some(stored.modified),
        })
    }

    fn check_available(&self, name: &str) -> Result<(), DriveError> {
        if self.failing.as_deref() == Some(name) {
            return Err(DriveError::Api {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: format!("{name} is unavailable"),
            });
        }
        Ok(())
    }

    fn name_of(&self, id: &str) -> Result<String, DriveError> {
        self.objects
            .get(id)
            .map(|object| object.name.clone())
            .ok_or_else(|| not_found(id))
    }

    fn insert(&mut self, name: &str, bytes: Vec<u8>) -> String {
        self.next_id += 1;
        let id = format!("obj-{}", self.next_id);
        let modified = self.now();
        self.objects.insert(
            id.clone(),
            StoredObject {
                name: name.to_string(),
                bytes,
                modified,
            },
        );
        id
    }
}

/// Clones share the same folder, like two devices pointed at one remote.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seeds an object without counting it as a call.
    pub fn put(&self, name: &str, bytes: &[u8]) -> String {
        self.lock().insert(name, bytes.to_vec())
    }

    pub fn content_of(&self, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .values()
            .find(|object| object.name == name)
            .map(|object| object.bytes.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().objects.values().map(|o| o.name.clone()).collect();
        names.sort();
        names
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.lock().objects.values().filter(|o| o.name == name).count()
    }

    pub fn remove_named(&self, name: &str) {
        self.lock().objects.retain(|_, object| object.name != name);
    }

    pub fn stats(&self) -> CallStats {
        self.lock().stats
    }

    /// Names passed to `create`/`update`, in call order.
    pub fn uploads(&self) -> Vec<String> {
        self.lock().uploads.clone()
    }

    /// Every later `get`, `create` or `update` of `name` fails with a 503.
    pub fn fail_transfers_of(&self, name: &str) {
        self.lock().failing = Some(name.to_string());
    }

    pub fn stop_failing(&self) {
        self.lock().failing = None;
    }

    pub fn reset_stats(&self) {
        let mut state = self.lock();
        state.stats = CallStats::default();
        state.uploads.clear();
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(&self) -> Result<Vec<RemoteObject>, DriveError> {
        let mut state = self.lock();
        state.stats.lists += 1;
        let objects: Result<Vec<_>, _> = state.objects.keys().map(|id| state.object(id)).collect();
        objects
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, DriveError> {
        let mut state = self.lock();
        state.stats.gets += 1;
        state.check_available(&state.name_of(id)?)?;
        let bytes = state.objects.get(id).map(|object| object.bytes.clone());
        bytes.ok_or_else(|| not_found(id))
    }

    async fn create(&self, name: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.stats.creates += 1;
        state.check_available(name)?;
        state.uploads.push(name.to_string());
        let id = state.insert(name, bytes);
        state.object(&id)
    }

    async fn update(&self, id: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.stats.updates += 1;
        state.check_available(&state.name_of(id)?)?;
        let modified = state.now();
        let stored = state.objects.get_mut(id).ok_or_else(|| not_found(id))?;
        stored.bytes = bytes;
        stored.modified = modified;
        let name = stored.name.clone();
        state.uploads.push(name);
        state.object(id)
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.stats.renames += 1;
        let stored = state.objects.get_mut(id).ok_or_else(|| not_found(id))?;
        stored.name = new_name.to_string();
        state.object(id)
    }

    async fn delete(&self, id: &str) -> Result<bool, DriveError> {
        let mut state = self.lock();
        state.stats.deletes += 1;
        Ok(state.objects.remove(id).is_some())
    }
}

fn not_found(id: &str) -> DriveError {
    DriveError::Api {
        status: StatusCode::NOT_FOUND,
        body: format!("file {id} not found"),
    }
}

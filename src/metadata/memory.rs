//! In-memory metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses a single `RwLock` so uniqueness checks
//! and inserts are atomic with respect to each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::store::{
    MetadataStore, ObjectRecord, SessionRecord, StoreError, StoreFuture, Table, UserRecord,
};

#[derive(Debug, Default)]
struct Inner {
    /// email -> user
    users: HashMap<String, UserRecord>,
    /// session id -> (insertion sequence, session)
    sessions: HashMap<String, (u64, SessionRecord)>,
    /// insertion sequence -> object
    objects: BTreeMap<u64, ObjectRecord>,
    next_seq: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_sessions<'a>(
    iter: impl Iterator<Item = &'a (u64, SessionRecord)>,
) -> Vec<SessionRecord> {
    let mut entries: Vec<_> = iter.collect();
    entries.sort_by_key(|(seq, _)| *seq);
    entries.into_iter().map(|(_, s)| s.clone()).collect()
}

impl MetadataStore for MemoryMetadataStore {
    fn create_user(&self, record: UserRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.users.contains_key(&record.email) {
                return Err(StoreError::Conflict(format!(
                    "users.email: {}",
                    record.email
                )));
            }
            if inner.users.values().any(|u| u.username == record.username) {
                return Err(StoreError::Conflict(format!(
                    "users.username: {}",
                    record.username
                )));
            }
            inner.users.insert(record.email.clone(), record);
            Ok(())
        })
    }

    fn get_user_by_email(&self, email: &str) -> StoreFuture<'_, Option<UserRecord>> {
        let email = email.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.users.get(&email).cloned())
        })
    }

    fn get_user_by_username(&self, username: &str) -> StoreFuture<'_, Option<UserRecord>> {
        let username = username.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .users
                .values()
                .find(|u| u.username == username)
                .cloned())
        })
    }

    fn list_users(&self) -> StoreFuture<'_, Vec<UserRecord>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut users: Vec<_> = inner.users.values().cloned().collect();
            users.sort_by(|a, b| (&a.created_at, &a.email).cmp(&(&b.created_at, &b.email)));
            Ok(users)
        })
    }

    fn create_session(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if !inner.users.contains_key(&record.email) {
                return Err(StoreError::Conflict(format!(
                    "sessions.email references unknown user {}",
                    record.email
                )));
            }
            if inner.sessions.contains_key(&record.id) {
                return Err(StoreError::Conflict("sessions.id".to_string()));
            }
            let seq = inner.bump();
            inner.sessions.insert(record.id.clone(), (seq, record));
            Ok(())
        })
    }

    fn get_session(&self, id: &str) -> StoreFuture<'_, Option<SessionRecord>> {
        let id = id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.sessions.get(&id).map(|(_, s)| s.clone()))
        })
    }

    fn list_sessions_for(&self, email: &str) -> StoreFuture<'_, Vec<SessionRecord>> {
        let email = email.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(sorted_sessions(
                inner.sessions.values().filter(|(_, s)| s.email == email),
            ))
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, Vec<SessionRecord>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(sorted_sessions(inner.sessions.values()))
        })
    }

    fn delete_session(&self, id: &str) -> StoreFuture<'_, ()> {
        let id = id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner.sessions.remove(&id);
            Ok(())
        })
    }

    fn insert_object(&self, record: ObjectRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            for existing in inner.objects.values() {
                if existing.id == record.id {
                    return Err(StoreError::Conflict(format!("objects.id: {}", record.id)));
                }
                if existing.username == record.username && existing.filename == record.filename
                {
                    return Err(StoreError::Conflict(format!(
                        "objects.username, objects.filename: {}/{}",
                        record.username, record.filename
                    )));
                }
                if existing.backend_key == record.backend_key {
                    return Err(StoreError::Conflict(format!(
                        "objects.backend_key: {}",
                        record.backend_key
                    )));
                }
            }
            let seq = inner.bump();
            inner.objects.insert(seq, record);
            Ok(())
        })
    }

    fn get_object(&self, id: &str) -> StoreFuture<'_, Option<ObjectRecord>> {
        let id = id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.objects.values().find(|o| o.id == id).cloned())
        })
    }

    fn get_object_by_path(
        &self,
        username: &str,
        filename: &str,
    ) -> StoreFuture<'_, Option<ObjectRecord>> {
        let username = username.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .objects
                .values()
                .find(|o| o.username == username && o.filename == filename)
                .cloned())
        })
    }

    fn list_objects_for(&self, username: &str) -> StoreFuture<'_, Vec<ObjectRecord>> {
        let username = username.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .objects
                .values()
                .filter(|o| o.username == username)
                .cloned()
                .collect())
        })
    }

    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectRecord>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.objects.values().cloned().collect())
        })
    }

    fn reset(&self, table: Table) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match table {
                Table::Users => {
                    inner.users.clear();
                    inner.sessions.clear();
                }
                Table::Sessions => inner.sessions.clear(),
                Table::Objects => inner.objects.clear(),
            }
            Ok(())
        })
    }
}

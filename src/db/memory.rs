//! In-memory collaborators for tests.

use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{AccessResolver, DocumentStore, StoreResult, UserDirectory};
use crate::error::StoreError;
use crate::models::{DocumentAccess, EditRecord, Identity};

#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashSet<String>>,
    access: Mutex<HashMap<(String, String), DocumentAccess>>,
    users: Mutex<HashMap<String, Identity>>,
    edits: Mutex<Vec<EditRecord>>,
    touched: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, document_id: &str) {
        self.documents.lock().unwrap().insert(document_id.to_string());
    }

    pub fn grant(&self, document_id: &str, user_id: &str, access: DocumentAccess) {
        self.access
            .lock()
            .unwrap()
            .insert((document_id.to_string(), user_id.to_string()), access);
    }

    pub fn add_user(&self, identity: Identity) {
        self.users.lock().unwrap().insert(identity.id.clone(), identity);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn edits(&self) -> Vec<EditRecord> {
        self.edits.lock().unwrap().clone()
    }

    pub fn touched(&self) -> Vec<String> {
        self.touched.lock().unwrap().clone()
    }

    /// Wait until the background persistence has written `count` edits.
    pub async fn wait_for_edits(&self, count: usize) -> Vec<EditRecord> {
        for _ in 0..100 {
            let edits = self.edits();
            if edits.len() >= count {
                return edits;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.edits()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn document_exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.documents.lock().unwrap().contains(document_id)) })
    }

    fn append_edit(&self, record: EditRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.check_writable()?;
            self.edits.lock().unwrap().push(record);
            Ok(())
        })
    }

    fn touch_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.check_writable()?;
            self.touched.lock().unwrap().push(document_id.to_string());
            Ok(())
        })
    }
}

impl AccessResolver for MemoryStore {
    fn check_access<'a>(
        &'a self,
        document_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<DocumentAccess>> {
        Box::pin(async move {
            Ok(self
                .access
                .lock()
                .unwrap()
                .get(&(document_id.to_string(), user_id.to_string()))
                .copied()
                .unwrap_or_default())
        })
    }
}

impl UserDirectory for MemoryStore {
    fn find_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Identity>>> {
        Box::pin(async move { Ok(self.users.lock().unwrap().get(user_id).cloned()) })
    }
}

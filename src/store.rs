use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::patch::{apply_patch, GamePatch};
use crate::types::GameDoc;

pub trait DocumentStore: Send + Sync {
    fn create(&self, doc: GameDoc) -> Result<(), StoreError>;
    fn get(&self, code: &str) -> Result<GameDoc, StoreError>;
    fn subscribe(&self, code: &str) -> Result<Subscription, StoreError>;
    fn update(&self, code: &str, patch: &GamePatch) -> Result<(), StoreError>;

    fn exists(&self, code: &str) -> bool {
        self.get(code).is_ok()
    }
}

pub struct Subscription {
    code: String,
    rx: watch::Receiver<Arc<GameDoc>>,
}

impl Subscription {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn current(&self) -> Arc<GameDoc> {
        self.rx.borrow().clone()
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Waits for the next write and returns the document after it. `None`
    /// once the document has been removed from the store.
    pub async fn changed(&mut self) -> Option<Arc<GameDoc>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn mark_seen(&mut self) -> Arc<GameDoc> {
        self.rx.borrow_and_update().clone()
    }

    pub fn unsubscribe(self) {}
}

#[derive(Default)]
pub struct MemoryStore {
    games: RwLock<HashMap<String, watch::Sender<Arc<GameDoc>>>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: impl IntoIterator<Item = GameDoc>) -> Self {
        let store = Self::new();
        if let Ok(mut games) = store.games.write() {
            for doc in docs {
                let (tx, _rx) = watch::channel(Arc::new(doc.clone()));
                games.insert(doc.code, tx);
            }
        }
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.is_offline() {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.games.read().map(|games| games.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = match self.games.read() {
            Ok(games) => games.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        codes.sort();
        codes
    }

    pub fn documents(&self) -> Vec<GameDoc> {
        let mut docs: Vec<GameDoc> = match self.games.read() {
            Ok(games) => games
                .values()
                .map(|tx| tx.borrow().as_ref().clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        docs.sort_by(|a, b| a.code.cmp(&b.code));
        docs
    }

    pub fn subscriber_count(&self, code: &str) -> usize {
        match self.games.read() {
            Ok(games) => games.get(code).map(|tx| tx.receiver_count()).unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn remove(&self, code: &str) -> Option<GameDoc> {
        let mut games = self.games.write().ok()?;
        let tx = games.remove(code)?;
        let doc = tx.borrow().as_ref().clone();
        info!(code, "game removed from store");
        Some(doc)
    }

    pub fn prune_idle(&self, now_ms: u64, ttl_ms: u64) -> Vec<String> {
        let Ok(mut games) = self.games.write() else {
            return Vec::new();
        };
        let stale: Vec<String> = games
            .iter()
            .filter(|(_, tx)| now_ms.saturating_sub(tx.borrow().last_activity) > ttl_ms)
            .map(|(code, _)| code.clone())
            .collect();
        for code in &stale {
            games.remove(code);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "pruned idle games");
        }
        stale
    }
}

impl DocumentStore for MemoryStore {
    fn create(&self, doc: GameDoc) -> Result<(), StoreError> {
        self.check_online()?;
        let mut games = self.games.write().map_err(|_| StoreError::Unavailable)?;
        if games.contains_key(&doc.code) {
            return Err(StoreError::AlreadyExists(doc.code));
        }
        debug!(code = %doc.code, "game created");
        let (tx, _rx) = watch::channel(Arc::new(doc.clone()));
        games.insert(doc.code, tx);
        Ok(())
    }

    fn get(&self, code: &str) -> Result<GameDoc, StoreError> {
        self.check_online()?;
        let games = self.games.read().map_err(|_| StoreError::Unavailable)?;
        games
            .get(code)
            .map(|tx| tx.borrow().as_ref().clone())
            .ok_or_else(|| StoreError::NotFound(code.to_string()))
    }

    fn subscribe(&self, code: &str) -> Result<Subscription, StoreError> {
        self.check_online()?;
        let games = self.games.read().map_err(|_| StoreError::Unavailable)?;
        let tx = games
            .get(code)
            .ok_or_else(|| StoreError::NotFound(code.to_string()))?;
        let mut rx = tx.subscribe();
        rx.mark_changed();
        Ok(Subscription {
            code: code.to_string(),
            rx,
        })
    }

    fn update(&self, code: &str, patch: &GamePatch) -> Result<(), StoreError> {
        self.check_online()?;
        if patch.is_empty() {
            return Ok(());
        }
        let games = self.games.read().map_err(|_| StoreError::Unavailable)?;
        let tx = games
            .get(code)
            .ok_or_else(|| StoreError::NotFound(code.to_string()))?;
        tx.send_modify(|doc| apply_patch(Arc::make_mut(doc), patch));
        Ok(())
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn create(&self, doc: GameDoc) -> Result<(), StoreError> {
        (**self).create(doc)
    }

    fn get(&self, code: &str) -> Result<GameDoc, StoreError> {
        (**self).get(code)
    }

    fn subscribe(&self, code: &str) -> Result<Subscription, StoreError> {
        (**self).subscribe(code)
    }

    fn update(&self, code: &str, patch: &GamePatch) -> Result<(), StoreError> {
        (**self).update(code, patch)
    }
}

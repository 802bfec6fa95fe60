use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use sae_store::StorageBackend;
use sae_types::events::StorageEvent;
use sae_types::models::Session;

use crate::bus::StorageBus;

pub const ACCESS_TOKEN_KEY: &str = "sb-access-token";
pub const REFRESH_TOKEN_KEY: &str = "sb-refresh-token";
pub const LOGIN_COMPLETE_KEY: &str = "telegram-login-complete";
pub const RELOAD_PENDING_KEY: &str = "auth-reload-pending";

pub const AUTH_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    LOGIN_COMPLETE_KEY,
    RELOAD_PENDING_KEY,
];

/// Keys owned by the hosted auth SDK. Cleared together with [`AUTH_KEYS`].
pub const RESERVED_PREFIXES: [&str; 2] = ["supabase.", "sb-"];

/// How many recent event ids a tab remembers for duplicate suppression.
const SEEN_EVENTS: usize = 512;

pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

type ListenerMap = HashMap<String, Vec<(ListenerId, Listener)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One tab's view of the shared auth storage.
///
/// Clones share the same tab identity and listeners.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

struct TokenStoreInner {
    tab_id: Uuid,
    backend: Arc<dyn StorageBackend>,
    bus: StorageBus,
    listeners: Mutex<ListenerMap>,
    next_listener: AtomicU64,
    seen: Mutex<SeenEvents>,
}

#[derive(Default)]
struct SeenEvents {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenEvents {
    /// Returns false if the id was already recorded.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_EVENTS {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

impl TokenStore {
    pub fn new(backend: Arc<dyn StorageBackend>, bus: StorageBus) -> Self {
        Self {
            inner: Arc::new(TokenStoreInner {
                tab_id: Uuid::new_v4(),
                backend,
                bus,
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                seen: Mutex::new(SeenEvents::default()),
            }),
        }
    }

    pub fn tab_id(&self) -> Uuid {
        self.inner.tab_id
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        match self.inner.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("storage read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write a value and announce it to other tabs. Returns false if the
    /// backend rejected the write, in which case nothing was announced.
    pub fn set_item(&self, key: &str, value: &str) -> bool {
        if let Err(e) = self.inner.backend.set(key, value) {
            warn!("storage write failed for {}: {}", key, e);
            return false;
        }
        self.announce(key, Some(value.to_string()));
        true
    }

    pub fn remove_item(&self, key: &str) -> bool {
        if let Err(e) = self.inner.backend.remove(key) {
            warn!("storage remove failed for {}: {}", key, e);
            return false;
        }
        self.announce(key, None);
        true
    }

    pub fn get_flag(&self, key: &str) -> bool {
        self.get_item(key).is_some_and(|v| v == "true")
    }

    pub fn set_flag(&self, key: &str, on: bool) -> bool {
        if on {
            self.set_item(key, "true")
        } else {
            self.remove_item(key)
        }
    }

    /// Register a callback for changes to `key` made by other tabs.
    pub fn add_listener<F>(&self, key: &str, callback: F) -> ListenerId
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(lid, _)| *lid != id);
            removed |= entries.len() != before;
        }
        listeners.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Number of callbacks registered on this tab.
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().values().map(Vec::len).sum()
    }

    /// Remove the fixed auth keys and every key under a reserved prefix.
    pub fn clear_auth_storage(&self) {
        let mut doomed: Vec<String> = AUTH_KEYS.iter().map(|k| k.to_string()).collect();

        match self.inner.backend.keys() {
            Ok(keys) => {
                for key in keys {
                    let reserved = RESERVED_PREFIXES.iter().any(|p| key.starts_with(p));
                    if reserved && !doomed.contains(&key) {
                        doomed.push(key);
                    }
                }
            }
            Err(e) => warn!("storage key listing failed: {}", e),
        }

        for key in &doomed {
            if self.get_item(key).is_some() {
                self.remove_item(key);
            }
        }
        debug!("auth storage cleared ({} keys checked)", doomed.len());
    }

    /// The stored session, if both tokens are present.
    pub fn load_session(&self) -> Option<Session> {
        let access_token = self.get_item(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.get_item(REFRESH_TOKEN_KEY)?;
        Some(Session {
            access_token,
            refresh_token,
            login_complete: self.get_flag(LOGIN_COMPLETE_KEY),
            reload_pending: self.get_flag(RELOAD_PENDING_KEY),
        })
    }

    pub fn save_session(&self, session: &Session) -> bool {
        let ok = self.set_item(ACCESS_TOKEN_KEY, &session.access_token)
            && self.set_item(REFRESH_TOKEN_KEY, &session.refresh_token);
        self.set_flag(LOGIN_COMPLETE_KEY, session.login_complete);
        self.set_flag(RELOAD_PENDING_KEY, session.reload_pending);
        ok
    }

    /// Hand an event from the bus to this tab's listeners.
    ///
    /// Events published by this tab, and events already delivered, are
    /// skipped. Returns how many listeners ran.
    pub fn deliver(&self, event: &StorageEvent) -> usize {
        if event.origin == self.inner.tab_id {
            return 0;
        }

        let fresh = match self.inner.seen.lock() {
            Ok(mut seen) => seen.insert(event.id),
            Err(_) => true,
        };
        if !fresh {
            debug!("dropping duplicate storage event {}", event.id);
            return 0;
        }

        let targets: Vec<Listener> = self
            .lock_listeners()
            .get(&event.key)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &targets {
            listener(event);
        }
        targets.len()
    }

    /// Subscribe to the bus and deliver events. The task keeps this store
    /// alive; abort the handle when the tab closes.
    ///
    /// The subscription is taken before this returns, so writes made by
    /// other tabs after the call are never missed.
    pub fn spawn_sync(&self) -> JoinHandle<()> {
        let mut rx = self.inner.bus.subscribe();
        let store = self.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        store.deliver(&event);
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("tab {} missed {} storage events", store.tab_id(), n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn announce(&self, key: &str, new_value: Option<String>) {
        self.inner
            .bus
            .publish(StorageEvent::new(self.inner.tab_id, key, new_value));
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, ListenerMap> {
        self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

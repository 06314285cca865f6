use std::collections::HashMap;
use crate::db::{connect, Pool};

/// Default number of pooled connections.
pub const MAX_CONNECTIONS: usize = 10;

/// Caches sessions by token.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, u64>,
}

impl SessionStore {
    /// Insert a session for `token`.
    pub fn insert(&mut self, token: &str, user_id: u64) -> Option<u64> {
        self.sessions.insert(token.to_string(), user_id)
    }

    fn purge(&mut self) {
        self.sessions.clear();
    }
}

pub trait Authenticator {
    fn authenticate(&self, token: &str) -> bool;
}

pub fn open_pool(url: &str) -> Pool {
    connect(url)
}

use std::time::{Duration, Instant};

use interlude_protocol::SessionKey;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

struct SessionEntry {
    key: SessionKey,
    created_at: Instant,
}

/// The short-lived account → session-key map bridging the login flow and
/// the game server's auth relay.
///
/// Read-heavy: every PlayerAuthRequest is one lookup, while stores happen
/// once per login. A single account has at most one live login attempt, so
/// per-key writes never race each other — the lock only serializes
/// unrelated accounts, briefly.
#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<FxHashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, account: &str, key: SessionKey) {
        self.entries.write().insert(
            account.to_owned(),
            SessionEntry {
                key,
                created_at: Instant::now(),
            },
        );
    }

    /// Checks a presented key. Strict compares all four components; lax
    /// compares only the play pair.
    pub fn validate(&self, account: &str, key: &SessionKey, strict: bool) -> bool {
        self.entries
            .read()
            .get(account)
            .is_some_and(|e| e.key.matches(key, strict))
    }

    /// The relay consume: remove and return success only if the presented
    /// key matches. A second identical request finds nothing.
    pub fn take_if_matches(&self, account: &str, key: &SessionKey, strict: bool) -> bool {
        let mut entries = self.entries.write();
        match entries.get(account) {
            Some(e) if e.key.matches(key, strict) => {
                entries.remove(account);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, account: &str) {
        self.entries.write().remove(account);
    }

    pub fn contains(&self, account: &str) -> bool {
        self.entries.read().contains_key(account)
    }

    /// Sweeps out entries older than `ttl`. Runs from a background task;
    /// concurrent stores and removes just wait out the sweep.
    pub fn clean_expired(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.created_at.elapsed() <= ttl);
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "expired login sessions removed");
        }
        swept
    }

    /// O(n); not for hot paths.
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(a: i32, b: i32, c: i32, d: i32) -> SessionKey {
        SessionKey {
            login_ok1: a,
            login_ok2: b,
            play_ok1: c,
            play_ok2: d,
        }
    }

    #[test]
    fn store_then_validate_both_modes() {
        let reg = SessionRegistry::new();
        let k = key(1, 2, 3, 4);
        reg.store("alice", k);

        assert!(reg.validate("alice", &k, true));
        assert!(reg.validate("alice", &k, false));

        reg.remove("alice");
        assert!(!reg.validate("alice", &k, true));
        assert!(!reg.validate("alice", &k, false));
    }

    #[test]
    fn take_consumes_exactly_once() {
        let reg = SessionRegistry::new();
        let k = key(1, 2, 3, 4);
        reg.store("alice", k);

        assert!(reg.take_if_matches("alice", &k, true));
        assert!(!reg.take_if_matches("alice", &k, true));
    }

    #[test]
    fn take_rejects_wrong_key_without_consuming() {
        let reg = SessionRegistry::new();
        let k = key(1, 2, 3, 4);
        reg.store("alice", k);

        assert!(!reg.take_if_matches("alice", &key(9, 9, 9, 9), false));
        assert!(reg.validate("alice", &k, true));
    }

    #[test]
    fn expired_entries_are_swept() {
        let reg = SessionRegistry::new();
        reg.store("old", key(1, 1, 1, 1));

        std::thread::sleep(Duration::from_millis(30));
        reg.store("new", key(2, 2, 2, 2));

        let swept = reg.clean_expired(Duration::from_millis(20));
        assert_eq!(swept, 1);
        assert!(!reg.contains("old"));
        assert!(reg.contains("new"));
    }
}

use std::net::IpAddr;
use std::time::SystemTime;

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};

/// A stored account row. `access_level < 0` means banned.
#[derive(Clone, Debug)]
pub struct Account {
    pub login: String,
    pub password_hash: String,
    pub access_level: i32,
    pub last_ip: Option<IpAddr>,
    pub last_login: Option<SystemTime>,
}

/// The only contract the login flow has with account storage. The real
/// deployment backs this with the game database; tests and the default
/// binary use [`MemoryAccountStore`].
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    async fn get_account(&self, login: &str) -> anyhow::Result<Option<Account>>;

    /// Atomic upsert: returns the existing row or creates it with the
    /// given hash. Two racing logins with the same fresh name must both
    /// land on one row — database implementations lean on a uniqueness
    /// violation to detect the loser, which then re-reads.
    async fn get_or_create(
        &self,
        login: &str,
        password_hash: &str,
        ip: IpAddr,
    ) -> anyhow::Result<Account>;

    async fn update_last_login(&self, login: &str, ip: IpAddr) -> anyhow::Result<()>;
}

/// Hashes a cleartext password the way the account tables store it.
pub fn hash_password(password: &str) -> String {
    BASE64_STANDARD.encode(Sha1::digest(password.as_bytes()))
}

/// Equality over the full length regardless of where the first mismatch
/// sits, so a wrong password costs the same time as a nearly-right one.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// In-memory account store.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<FxHashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account, for tests and tooling.
    pub fn insert(&self, login: &str, password: &str, access_level: i32) {
        self.accounts.write().insert(
            login.to_owned(),
            Account {
                login: login.to_owned(),
                password_hash: hash_password(password),
                access_level,
                last_ip: None,
                last_login: None,
            },
        );
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, login: &str) -> anyhow::Result<Option<Account>> {
        Ok(self.accounts.read().get(login).cloned())
    }

    async fn get_or_create(
        &self,
        login: &str,
        password_hash: &str,
        ip: IpAddr,
    ) -> anyhow::Result<Account> {
        let mut accounts = self.accounts.write();
        let account = accounts.entry(login.to_owned()).or_insert_with(|| Account {
            login: login.to_owned(),
            password_hash: password_hash.to_owned(),
            access_level: 0,
            last_ip: Some(ip),
            last_login: Some(SystemTime::now()),
        });
        Ok(account.clone())
    }

    async fn update_last_login(&self, login: &str, ip: IpAddr) -> anyhow::Result<()> {
        if let Some(account) = self.accounts.write().get_mut(login) {
            account.last_ip = Some(ip);
            account.last_login = Some(SystemTime::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_base64() {
        let h = hash_password("secret");
        assert_eq!(h, hash_password("secret"));
        assert_ne!(h, hash_password("Secret"));
        assert!(BASE64_STANDARD.decode(&h).is_ok());
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(constant_time_eq("", ""));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = MemoryAccountStore::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let first = store.get_or_create("alice", "h1", ip).await.unwrap();
        let second = store.get_or_create("alice", "h2", ip).await.unwrap();
        // The loser of the race sees the winner's row, not its own hash.
        assert_eq!(first.password_hash, "h1");
        assert_eq!(second.password_hash, "h1");
    }
}

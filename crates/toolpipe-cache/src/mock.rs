//! In-process [`KvClient`] for tests.
//!
//! [`MockKvClient`] behaves like a tiny Redis: string values, per-key
//! expiry, glob-prefix key listing. Tests can queue failures and inspect
//! every call that reached the client.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use serde_json::json;
//! use toolpipe_cache::{Cache, RemoteCache, RemoteCacheConfig};
//! use toolpipe_cache::mock::MockKvClient;
//! use toolpipe_core::RequestContext;
//!
//! # async fn example() {
//! let cache = RemoteCache::new(MockKvClient::new(), RemoteCacheConfig {
//!     prefix: "app".into(),
//!     default_ttl: Duration::ZERO,
//! });
//! let ctx = RequestContext::new();
//! cache.set(&ctx, "k", json!(1), Duration::ZERO).await.unwrap();
//! assert_eq!(cache.client().recorded_calls(), vec!["set app:k"]);
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::KvError;
use crate::kv::{KvClient, KvFuture};

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// A fake key-value store held in memory.
#[derive(Default)]
pub struct MockKvClient {
    entries: Mutex<HashMap<String, Stored>>,
    errors: Mutex<VecDeque<KvError>>,
    calls: Mutex<Vec<String>>,
    flushes: Mutex<u64>,
    no_key_listing: bool,
}

impl fmt::Debug for MockKvClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockKvClient")
            .field("entries", &self.entries.lock().len())
            .field("queued_errors", &self.errors.lock().len())
            .field("no_key_listing", &self.no_key_listing)
            .finish()
    }
}

impl MockKvClient {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`KvClient::keys`] fail as unsupported, like a client that
    /// cannot scan.
    #[must_use]
    pub fn without_key_listing(mut self) -> Self {
        self.no_key_listing = true;
        self
    }

    /// Makes the next operation fail with `error`. Errors are consumed in
    /// the order they were queued.
    pub fn queue_error(&self, error: KvError) {
        self.errors.lock().push_back(error);
    }

    /// Stores a raw string with no expiry, bypassing any encoding.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(
            key.to_string(),
            Stored {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    /// Reads the raw stored string, ignoring expiry.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|s| s.value.clone())
    }

    /// Every call made so far, as `"<op> <args>"`.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many times `flush_all` ran.
    pub fn flush_count(&self) -> u64 {
        *self.flushes.lock()
    }

    fn begin(&self, call: String) -> Result<(), KvError> {
        self.calls.lock().push(call);
        match self.errors.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn live(&self, key: &str) -> Option<Stored> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Some(stored.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            '*' => Token::AnyRun,
            '?' => Token::AnyOne,
            other => Token::Literal(other),
        });
    }
    tokens
}

/// Matches `key` against a Redis-style glob: `*`, `?` and backslash
/// escapes. Character classes are not supported.
fn glob_match(pattern: &str, key: &str) -> bool {
    let tokens = tokenize(pattern);
    let key: Vec<char> = key.chars().collect();
    let (mut t, mut k) = (0, 0);
    // Last `*` seen and the key position it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        match tokens.get(t) {
            Some(Token::AnyRun) => {
                backtrack = Some((t, k));
                t += 1;
            }
            Some(Token::AnyOne) => {
                t += 1;
                k += 1;
            }
            Some(Token::Literal(c)) if *c == key[k] => {
                t += 1;
                k += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    backtrack = Some((star, absorbed + 1));
                    t = star + 1;
                    k = absorbed + 1;
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|token| *token == Token::AnyRun)
}

impl KvClient for MockKvClient {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(async move {
            self.begin(format!("get {key}"))?;
            Ok(self.live(key).map(|s| s.value))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Option<Duration>) -> KvFuture<'a, ()> {
        Box::pin(async move {
            self.begin(format!("set {key}"))?;
            let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
            self.entries
                .lock()
                .insert(key.to_string(), Stored { value, expires_at });
            Ok(())
        })
    }

    fn del<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64> {
        Box::pin(async move {
            self.begin(format!("del {}", keys.join(" ")))?;
            let now = Instant::now();
            let mut entries = self.entries.lock();
            let removed = keys
                .iter()
                .filter_map(|k| entries.remove(k))
                .filter(|s| s.is_live(now))
                .count();
            Ok(removed as u64)
        })
    }

    fn exists<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64> {
        Box::pin(async move {
            self.begin(format!("exists {}", keys.join(" ")))?;
            Ok(keys.iter().filter(|k| self.live(k).is_some()).count() as u64)
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<Duration>> {
        Box::pin(async move {
            self.begin(format!("ttl {key}"))?;
            let now = Instant::now();
            Ok(self
                .live(key)
                .and_then(|s| s.expires_at)
                .map(|at| at.saturating_duration_since(now)))
        })
    }

    fn flush_all(&self) -> KvFuture<'_, ()> {
        Box::pin(async move {
            self.begin("flush_all".to_string())?;
            self.entries.lock().clear();
            *self.flushes.lock() += 1;
            Ok(())
        })
    }

    fn keys<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.begin(format!("keys {pattern}"))?;
            if self.no_key_listing {
                return Err(KvError::Unsupported("keys"));
            }
            let now = Instant::now();
            let mut keys: Vec<String> = self
                .entries
                .lock()
                .iter()
                .filter(|(k, s)| s.is_live(now) && glob_match(pattern, k))
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn close(&self) -> KvFuture<'_, ()> {
        Box::pin(async move { self.begin("close".to_string()) })
    }
}

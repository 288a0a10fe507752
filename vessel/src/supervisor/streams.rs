//! Short-lived streaming sessions.
//!
//! `exec`, `attach` and `port_forward` return opaque URLs; this registry
//! backs those URLs with session records a streaming endpoint resolves.
//! Sessions expire after a bounded lifetime and are pruned on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use vessel_shared::constants::defaults;

/// What a streaming endpoint is supposed to do with a resolved session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Exec {
        container_id: String,
        cmd: Vec<String>,
        tty: bool,
        stdin: bool,
    },
    Attach {
        container_id: String,
        stdin: bool,
    },
    PortForward {
        sandbox_id: String,
        ports: Vec<i32>,
    },
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    pub token: String,
    pub kind: StreamKind,
    created: Instant,
}

/// Registry of active sessions keyed by opaque token.
pub struct StreamRegistry {
    ttl: Duration,
    sessions: Mutex<HashMap<String, StreamSession>>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(defaults::STREAM_SESSION_TTL_SECS))
    }
}

impl StreamRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session; returns its token.
    pub fn register(&self, kind: StreamKind) -> StreamSession {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let session = StreamSession {
            token: token.clone(),
            kind,
            created: Instant::now(),
        };
        let mut sessions = self.sessions.lock();
        prune(&mut sessions, self.ttl);
        sessions.insert(token, session.clone());
        session
    }

    /// Resolve a token; expired and unknown tokens return `None`.
    pub fn resolve(&self, token: &str) -> Option<StreamSession> {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions, self.ttl);
        sessions.get(token).cloned()
    }

    /// One-shot claim: resolves and removes the session.
    pub fn claim(&self, token: &str) -> Option<StreamSession> {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions, self.ttl);
        sessions.remove(token)
    }

    pub fn len(&self) -> usize {
        let mut sessions = self.sessions.lock();
        prune(&mut sessions, self.ttl);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(sessions: &mut HashMap<String, StreamSession>, ttl: Duration) {
    sessions.retain(|_, s| s.created.elapsed() < ttl);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_kind() -> StreamKind {
        StreamKind::Exec {
            container_id: "c1".into(),
            cmd: vec!["sh".into()],
            tty: false,
            stdin: false,
        }
    }

    #[test]
    fn register_then_resolve() {
        let registry = StreamRegistry::default();
        let session = registry.register(exec_kind());
        assert_eq!(session.token.len(), 32);
        let resolved = registry.resolve(&session.token).unwrap();
        assert_eq!(resolved.kind, session.kind);
    }

    #[test]
    fn claim_is_one_shot() {
        let registry = StreamRegistry::default();
        let session = registry.register(exec_kind());
        assert!(registry.claim(&session.token).is_some());
        assert!(registry.claim(&session.token).is_none());
    }

    #[test]
    fn sessions_expire() {
        let registry = StreamRegistry::new(Duration::from_millis(20));
        let session = registry.register(exec_kind());
        std::thread::sleep(Duration::from_millis(40));
        assert!(registry.resolve(&session.token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_token_is_none() {
        let registry = StreamRegistry::default();
        assert!(registry.resolve("nope").is_none());
    }
}

//! Network identities: proxy + user agent + cookie jar, and the pool that rotates them.
//!
//! The harvester only ever asks the pool for a session, hands it back, or tells it to
//! retire one. Whatever the pool does about a retired identity (spinning up a fresh one
//! on the next acquire) is its own business.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionOptions;
use crate::cookies::NormalizedCookie;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Linux; Android 10; SM-G973F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36",
        "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
        "Mozilla/5.0 (Linux; Android 12; SM-A525F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Mobile Safari/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    ]
});

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; SM-G973F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36";

/// Where an identity stands. Transitions only move forward; `Retired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionLifecycle {
    Fresh,
    AuthPending,
    Authenticated,
    Blocked,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    CookiesApplied,
    AuthVerified,
    PageRejected,
    Retire,
}

impl SessionLifecycle {
    pub fn transition(self, event: SessionEvent) -> SessionLifecycle {
        use SessionEvent::*;
        use SessionLifecycle::*;

        match (self, event) {
            (Retired, _) | (_, Retire) => Retired,
            (Blocked, _) => Blocked,
            (_, PageRejected) => Blocked,
            (Fresh, CookiesApplied) => AuthPending,
            (Fresh | AuthPending, AuthVerified) => Authenticated,
            (state, _) => state,
        }
    }

    pub fn is_usable(self) -> bool {
        matches!(
            self,
            SessionLifecycle::Fresh | SessionLifecycle::AuthPending | SessionLifecycle::Authenticated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// `scheme://host:port`, what Chrome's `--proxy-server` wants.
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        let username = Some(url.username().to_string()).filter(|u| !u.is_empty());
        let password = url.password().map(str::to_string);
        Some(Self {
            server: format!("{}://{}:{}", url.scheme(), host, port),
            username,
            password,
        })
    }

    pub fn requires_auth(&self) -> bool {
        self.username.is_some()
    }
}

/// Proxy list from the opaque `proxy` input: `{"proxyUrls": [...]}`, a bare URL string,
/// or an array of URL strings.
pub fn proxies_from_input(proxy: Option<&Value>) -> Vec<ProxyEndpoint> {
    let urls: Vec<&str> = match proxy {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(url)) => vec![url.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(other) => other
            .get("proxyUrls")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default(),
    };

    urls.into_iter()
        .filter_map(|raw| {
            let parsed = ProxyEndpoint::parse(raw);
            if parsed.is_none() {
                warn!(proxy = raw, "Ignoring unparseable proxy URL");
            }
            parsed
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub proxy: Option<ProxyEndpoint>,
    pub user_agent: String,
    pub lifecycle: SessionLifecycle,
    /// Set once the configured cookies have been pushed into a browser for this identity.
    pub cookies_applied: bool,
    /// Cookies that belong to this identity; restored into every browser it drives.
    pub cookie_jar: Vec<NormalizedCookie>,
    pub usage_count: u32,
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(proxy: Option<ProxyEndpoint>) -> Self {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(DEFAULT_USER_AGENT)
            .to_string();
        Self {
            id: Uuid::new_v4(),
            proxy,
            user_agent,
            lifecycle: SessionLifecycle::Fresh,
            cookies_applied: false,
            cookie_jar: Vec::new(),
            usage_count: 0,
            error_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, event: SessionEvent) {
        let next = self.lifecycle.transition(event);
        if next != self.lifecycle {
            debug!(session = %self.id, from = ?self.lifecycle, to = ?next, "Session transition");
        }
        self.lifecycle = next;
    }

    /// True exactly once per identity; later calls are the idempotent skip.
    pub fn claim_cookie_application(&mut self) -> bool {
        if self.cookies_applied {
            return false;
        }
        self.cookies_applied = true;
        true
    }
}

#[async_trait]
pub trait IdentityPool: Send + Sync {
    async fn acquire(&self) -> Result<Session>;
    /// Hand a session back with whatever state it picked up.
    async fn release(&self, session: Session) -> Result<()>;
    /// Drop the identity for good.
    async fn retire(&self, session: Session) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolState {
    sessions: Vec<Session>,
    next_proxy: usize,
    retired_total: u64,
}

/// In-process pool: grows to `max_pool_size`, then hands out random usable sessions.
/// Proxies are assigned round-robin as sessions are created.
pub struct SessionPool {
    state: Mutex<PoolState>,
    max_pool_size: usize,
    proxies: Vec<ProxyEndpoint>,
    persist_path: Option<PathBuf>,
}

impl SessionPool {
    /// Loads persisted state from `persist_path` when `options.persist_state` is on.
    pub async fn open(
        options: &SessionOptions,
        proxies: Vec<ProxyEndpoint>,
        persist_path: PathBuf,
    ) -> Result<Self> {
        let persist_path = options.persist_state.then_some(persist_path);

        let mut state = match &persist_path {
            Some(path) => match tokio::fs::read(path).await {
                Ok(bytes) => serde_json::from_slice::<PoolState>(&bytes).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable session pool state");
                    PoolState::default()
                }),
                Err(_) => PoolState::default(),
            },
            None => PoolState::default(),
        };
        state.sessions.retain(|s| s.lifecycle.is_usable());
        state.sessions.truncate(options.max_pool_size);

        if !state.sessions.is_empty() {
            info!(restored = state.sessions.len(), "♻️ Restored session pool state");
        }

        Ok(Self {
            state: Mutex::new(state),
            max_pool_size: options.max_pool_size,
            proxies,
            persist_path,
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    async fn persist(&self, state: &PoolState) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("writing session pool state to {}", path.display()))
    }
}

#[async_trait]
impl IdentityPool for SessionPool {
    async fn acquire(&self) -> Result<Session> {
        let mut state = self.state.lock().await;

        let session = if state.sessions.len() < self.max_pool_size {
            let proxy = if self.proxies.is_empty() {
                None
            } else {
                let idx = state.next_proxy % self.proxies.len();
                state.next_proxy = state.next_proxy.wrapping_add(1);
                Some(self.proxies[idx].clone())
            };
            let session = Session::new(proxy);
            info!(
                session = %session.id,
                proxy = session.proxy.as_ref().map(|p| p.server.as_str()).unwrap_or("direct"),
                "🆕 New network identity"
            );
            state.sessions.push(session.clone());
            session
        } else {
            let usable: Vec<usize> = state
                .sessions
                .iter()
                .enumerate()
                .filter(|(_, s)| s.lifecycle.is_usable())
                .map(|(i, _)| i)
                .collect();
            let idx = *usable
                .choose(&mut rand::thread_rng())
                .context("session pool has no usable identities")?;
            state.sessions[idx].usage_count += 1;
            state.sessions[idx].clone()
        };

        self.persist(&state).await?;
        Ok(session)
    }

    async fn release(&self, session: Session) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(slot) = state.sessions.iter_mut().find(|s| s.id == session.id) {
            *slot = session;
        }
        self.persist(&state).await
    }

    async fn retire(&self, mut session: Session) -> Result<()> {
        session.apply(SessionEvent::Retire);
        let mut state = self.state.lock().await;
        state.sessions.retain(|s| s.id != session.id);
        state.retired_total += 1;
        info!(
            session = %session.id,
            retired_total = state.retired_total,
            "🪦 Retired network identity"
        );
        self.persist(&state).await
    }
}

//! Session pool with time-budgeted rotation
//!
//! A session is one `reqwest::Client` with its own cookie jar, identity
//! and header fingerprint. The manager hands out the current session,
//! rotates it once it outlives its budget (or when the transport asks
//! after an access-denied response), and carries cookies across
//! rotations through a per-domain store.
//!
//! The pool and the cookie store sit behind one `tokio::sync::Mutex`;
//! every mutation goes through it.

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderMap;
use reqwest::Url;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use kadou_common::config::{SessionConfig, TransportConfig};

use super::identity::{header_fingerprint, Identity, IdentityPool};
use crate::error::TransportError;

/// Why a session was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// Outlived the configured lifetime
    Expired,
    /// Site returned an access-denied status
    AccessDenied,
    /// Requested by an operator or test
    Manual,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RotationReason::Expired => "expired",
            RotationReason::AccessDenied => "access_denied",
            RotationReason::Manual => "manual",
        })
    }
}

/// One HTTP session
pub struct Session {
    id: Uuid,
    created_at: Instant,
    identity: Identity,
    headers: HeaderMap,
    client: reqwest::Client,
    jar: Arc<Jar>,
    /// One URL per domain this session has requested, for cookie harvest
    visited: StdMutex<HashMap<String, Url>>,
}

impl Session {
    fn build(
        identity: Identity,
        headers: HeaderMap,
        timeout: Duration,
        seed_cookies: &HashMap<String, DomainCookies>,
    ) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        for stored in seed_cookies.values() {
            for cookie in &stored.cookies {
                jar.add_cookie_str(cookie, &stored.url);
            }
        }

        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers.clone())
            .timeout(timeout)
            .gzip(true);
        if let Some(proxy) = &identity.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                TransportError::NetworkError(format!("Invalid proxy {}: {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::NetworkError(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            identity,
            headers,
            client,
            jar,
            visited: StdMutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Remember that `url`'s domain was requested through this session
    pub fn note_visit(&self, url: &Url) {
        if let Some(host) = url.host_str() {
            if let Ok(mut visited) = self.visited.lock() {
                visited.entry(host.to_string()).or_insert_with(|| url.clone());
            }
        }
    }

    /// Cookies currently held, per visited domain
    fn harvest_cookies(&self) -> Vec<(String, DomainCookies)> {
        let visited = match self.visited.lock() {
            Ok(v) => v.clone(),
            Err(_) => return Vec::new(),
        };
        visited
            .into_iter()
            .filter_map(|(domain, url)| {
                let header = self.jar.cookies(&url)?;
                let cookies: Vec<String> = header
                    .to_str()
                    .ok()?
                    .split(';')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if cookies.is_empty() {
                    None
                } else {
                    Some((domain, DomainCookies { url, cookies }))
                }
            })
            .collect()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("identity", &self.identity)
            .finish()
    }
}

/// Cookies persisted for one domain, as `name=value` pairs
#[derive(Debug, Clone)]
struct DomainCookies {
    url: Url,
    cookies: Vec<String>,
}

struct PoolState {
    current: Option<Arc<Session>>,
    /// Replaced sessions possibly still used by in-flight requests
    retired: Vec<Arc<Session>>,
    cookies: HashMap<String, DomainCookies>,
    rotations: u64,
}

/// Owns the session pool and the per-domain cookie store
pub struct SessionManager {
    lifetime: Duration,
    timeout: Duration,
    identities: IdentityPool,
    state: Mutex<PoolState>,
}

impl SessionManager {
    pub fn new(sessions: &SessionConfig, transport: &TransportConfig) -> Self {
        Self {
            lifetime: sessions.lifetime(),
            timeout: transport.timeout(),
            identities: IdentityPool::from_config(transport),
            state: Mutex::new(PoolState {
                current: None,
                retired: Vec::new(),
                cookies: HashMap::new(),
                rotations: 0,
            }),
        }
    }

    /// Current session, creating or rotating it as its age requires
    ///
    /// Past the lifetime the session is rotated with its cookies kept;
    /// past twice the lifetime it is dropped outright.
    pub async fn acquire(&self) -> Result<Arc<Session>, TransportError> {
        let mut state = self.state.lock().await;
        self.sweep_locked(&mut state);

        let current = state.current.as_ref().map(|s| (s.id(), s.age()));
        if let Some((session_id, age)) = current {
            if age > self.lifetime * 2 {
                tracing::warn!(
                    %session_id,
                    age_secs = age.as_secs(),
                    "Discarding stale session without cookie carry-over"
                );
                state.current = None;
            } else if age > self.lifetime {
                self.rotate_locked(&mut state, RotationReason::Expired)?;
            }
        }

        match &state.current {
            Some(current) => Ok(current.clone()),
            None => {
                let session = self.create_locked(&state)?;
                state.current = Some(session.clone());
                Ok(session)
            }
        }
    }

    /// Replace the current session unconditionally
    pub async fn rotate(&self, reason: RotationReason) -> Result<Arc<Session>, TransportError> {
        let mut state = self.state.lock().await;
        self.rotate_locked(&mut state, reason)
    }

    /// Replace the current session only if it is still `session_id`
    ///
    /// Concurrent tasks that were all denied on the same session cause a
    /// single rotation; later callers get the already-fresh session.
    pub async fn rotate_if_current(
        &self,
        session_id: Uuid,
        reason: RotationReason,
    ) -> Result<Arc<Session>, TransportError> {
        let mut state = self.state.lock().await;
        match &state.current {
            Some(current) if current.id() != session_id => Ok(current.clone()),
            _ => self.rotate_locked(&mut state, reason),
        }
    }

    /// Drop every session, keeping the cookie store
    pub async fn close_all(&self) {
        let mut state = self.state.lock().await;
        if let Some(current) = state.current.take() {
            Self::persist_cookies(&mut state, &current);
        }
        state.retired.clear();
    }

    /// Live sessions: the current one plus retired ones not yet swept
    pub async fn live_sessions(&self) -> usize {
        let mut state = self.state.lock().await;
        self.sweep_locked(&mut state);
        state.retired.len() + usize::from(state.current.is_some())
    }

    pub async fn rotation_count(&self) -> u64 {
        self.state.lock().await.rotations
    }

    pub async fn current_id(&self) -> Option<Uuid> {
        self.state.lock().await.current.as_ref().map(|s| s.id())
    }

    /// Domains with persisted cookies
    pub async fn cookie_domains(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut domains: Vec<String> = state.cookies.keys().cloned().collect();
        domains.sort();
        domains
    }

    fn rotate_locked(
        &self,
        state: &mut PoolState,
        reason: RotationReason,
    ) -> Result<Arc<Session>, TransportError> {
        if let Some(old) = state.current.take() {
            Self::persist_cookies(state, &old);
            tracing::info!(
                session_id = %old.id(),
                age_secs = old.age().as_secs(),
                %reason,
                "Rotating session"
            );
            state.retired.push(old);
        }

        let session = self.create_locked(state)?;
        state.current = Some(session.clone());
        state.rotations += 1;
        Ok(session)
    }

    fn create_locked(&self, state: &PoolState) -> Result<Arc<Session>, TransportError> {
        let (identity, headers) = {
            let mut rng = rand::thread_rng();
            let identity = self.identities.choose(&mut rng);
            let headers = header_fingerprint(&identity, &mut rng);
            (identity, headers)
        };
        let session = Session::build(identity, headers, self.timeout, &state.cookies)?;
        tracing::debug!(
            session_id = %session.id(),
            user_agent = %session.identity().user_agent,
            proxy = session.identity().proxy.as_deref().unwrap_or("direct"),
            seeded_domains = state.cookies.len(),
            "Created session"
        );
        Ok(Arc::new(session))
    }

    fn persist_cookies(state: &mut PoolState, session: &Session) {
        for (domain, cookies) in session.harvest_cookies() {
            state.cookies.insert(domain, cookies);
        }
    }

    /// Forget retired sessions older than twice the lifetime
    fn sweep_locked(&self, state: &mut PoolState) {
        let limit = self.lifetime * 2;
        let before = state.retired.len();
        state.retired.retain(|s| s.age() <= limit);
        let dropped = before - state.retired.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Swept retired sessions");
        }
    }
}

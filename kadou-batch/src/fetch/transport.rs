//! Single-page fetch with delay, retry and backoff
//!
//! Response handling per attempt:
//! - rate-limit / overload status: exponential backoff, then retry
//! - access-denied status: rotate the session, retry once, then fail
//! - timeout, connection error, other non-success status: retry as is
//!
//! A denied attempt counts against the attempt budget. The one retry
//! after a rotation is still made when the budget is spent, so a fetch
//! can report one attempt more than `max_attempts`.

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use kadou_common::config::TransportConfig;

use super::delay::DelayPolicy;
use super::session::{RotationReason, SessionManager};
use crate::error::TransportError;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub session_id: Uuid,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Fetch transport over a shared [`SessionManager`]
pub struct FetchTransport {
    sessions: Arc<SessionManager>,
    delay: DelayPolicy,
    max_attempts: u32,
    backoff_base: Duration,
    rate_limit_statuses: Vec<u16>,
    access_denied_statuses: Vec<u16>,
}

impl FetchTransport {
    pub fn new(config: &TransportConfig, sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            delay: DelayPolicy::from_config(config),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_secs_f64(config.backoff_base_secs.max(0.0)),
            rate_limit_statuses: config.rate_limit_statuses.clone(),
            access_denied_statuses: config.access_denied_statuses.clone(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Backoff before retry `attempt + 1` after a rate-limit response
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }

    async fn pause_before_request(&self) {
        let delay = self.delay.sample(&mut rand::thread_rng());
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Inter-request delay");
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetch one page
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::NetworkError(format!("Invalid URL {}: {}", url, e)))?;

        let mut attempt = 0u32;
        let mut rotated_after_denial = false;

        loop {
            attempt += 1;
            self.pause_before_request().await;

            let session = self.sessions.acquire().await?;
            tracing::debug!(
                url,
                attempt,
                max_attempts = self.max_attempts,
                session_id = %session.id(),
                "Fetching page"
            );

            let outcome = session.client().get(parsed.clone()).send().await;
            session.note_visit(&parsed);

            let failure = match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        match response.text().await {
                            Ok(body) => {
                                tracing::debug!(url, status, bytes = body.len(), "Fetched page");
                                return Ok(FetchedPage {
                                    url: url.to_string(),
                                    status,
                                    body,
                                    session_id: session.id(),
                                    attempts: attempt,
                                });
                            }
                            Err(e) => TransportError::from_reqwest(e),
                        }
                    } else if self.access_denied_statuses.contains(&status) {
                        if rotated_after_denial {
                            tracing::warn!(url, status, "Access denied after session rotation");
                            return Err(TransportError::AccessDenied { status });
                        }
                        tracing::warn!(url, status, "Access denied, rotating session");
                        self.sessions
                            .rotate_if_current(session.id(), RotationReason::AccessDenied)
                            .await?;
                        rotated_after_denial = true;
                        continue;
                    } else if self.rate_limit_statuses.contains(&status) {
                        TransportError::RateLimited { status }
                    } else {
                        TransportError::NetworkError(format!("HTTP {}", status))
                    }
                }
                Err(e) => TransportError::from_reqwest(e),
            };

            if attempt >= self.max_attempts {
                tracing::error!(url, attempts = attempt, error = %failure, "Fetch failed, retries exhausted");
                return Err(TransportError::ExhaustedRetries {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            if matches!(failure, TransportError::RateLimited { .. }) {
                let backoff = self.backoff_for(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %failure,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
            } else {
                tracing::warn!(url, attempt, error = %failure, "Fetch attempt failed, retrying");
            }
        }
    }
}

//! Request identities and header fingerprints
//!
//! Every session gets a user agent, an optional upstream proxy, an
//! optional referer and a header set with a little randomness in it.

use kadou_common::config::TransportConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

const FALLBACK_REFERER: &str = "https://www.google.com/";
const REFERER_PROBABILITY: f64 = 0.2;
const XHR_PROBABILITY: f64 = 0.3;

const ACCEPT_LANGUAGES: [&str; 3] = [
    "ja,en-US;q=0.7,en;q=0.3",
    "ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7",
    "ja,en;q=0.9",
];

/// Who a session claims to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub referer: Option<String>,
}

/// Pools of user agents, proxies and referers to draw identities from
#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
    proxies: Vec<String>,
    referers: Vec<String>,
}

impl IdentityPool {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            user_agents: config.user_agents.clone(),
            proxies: config.proxies.clone(),
            referers: config.referers.clone(),
        }
    }

    /// Draw a fresh identity
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Identity {
        let user_agent = self
            .user_agents
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| "Mozilla/5.0".to_string());
        let proxy = self.proxies.choose(rng).cloned();
        let referer = if rng.gen_bool(REFERER_PROBABILITY) {
            Some(
                self.referers
                    .choose(rng)
                    .cloned()
                    .unwrap_or_else(|| FALLBACK_REFERER.to_string()),
            )
        } else {
            None
        };

        Identity {
            user_agent,
            proxy,
            referer,
        }
    }
}

/// Browser-like default headers for a session
pub fn header_fingerprint<R: Rng + ?Sized>(identity: &Identity, rng: &mut R) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: HeaderName, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };

    put(header::USER_AGENT, &identity.user_agent);
    put(
        header::ACCEPT,
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    );
    put(
        header::ACCEPT_LANGUAGE,
        ACCEPT_LANGUAGES.choose(rng).copied().unwrap_or(ACCEPT_LANGUAGES[0]),
    );
    put(header::DNT, "1");
    put(header::UPGRADE_INSECURE_REQUESTS, "1");
    put(HeaderName::from_static("sec-fetch-dest"), "document");
    put(HeaderName::from_static("sec-fetch-mode"), "navigate");
    put(HeaderName::from_static("sec-fetch-site"), "none");
    put(header::CACHE_CONTROL, "max-age=0");
    if rng.gen_bool(XHR_PROBABILITY) {
        put(HeaderName::from_static("x-requested-with"), "XMLHttpRequest");
    }
    if let Some(referer) = &identity.referer {
        put(header::REFERER, referer);
    }

    headers
}

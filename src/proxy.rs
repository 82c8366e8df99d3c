//! Proxy-bound HTTP client pool.
//!
//! The pool owns a fixed set of `reqwest::Client`s, one per upstream proxy,
//! each pre-configured with a browser fingerprint that stays fixed for the
//! client's lifetime. Selection is round-robin over the currently active
//! subset; a client whose proxy misbehaves is deactivated permanently for
//! the process lifetime.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Proxy};
use tracing::{debug, warn};

use crate::error::{CrawlError, Result};
use crate::fingerprint;

/// Per-client request timeout.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One upstream proxy endpoint with credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Proxy host (IP or domain).
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Username for proxy authentication.
    pub username: String,
    /// Password for proxy authentication.
    pub password: String,
}

impl ProxyEndpoint {
    /// Parses a `host:port:username:password` line.
    ///
    /// Returns `None` for blank or malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 4 {
            return None;
        }

        let port: u16 = parts[1].parse().ok()?;
        if parts[0].is_empty() {
            return None;
        }

        Some(Self {
            host: parts[0].to_string(),
            port,
            username: parts[2].to_string(),
            password: parts[3].to_string(),
        })
    }

    /// Returns the `host:port` label, safe to log (no credentials).
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A client borrowed from the pool for one request attempt.
///
/// Cheap to clone around: `reqwest::Client` is internally reference-counted.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub(crate) index: usize,
    /// The proxy-bound HTTP client.
    pub client: Client,
    /// Label of the backing proxy, for log output.
    pub proxy: String,
}

#[derive(Debug)]
struct PoolSlot {
    client: Client,
    label: String,
}

#[derive(Debug)]
struct PoolState {
    cursor: usize,
    active: Vec<bool>,
}

/// Fixed pool of proxy-bound clients with round-robin rotation.
#[derive(Debug)]
pub struct ProxyPool {
    slots: Vec<PoolSlot>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Builds a pool from a line-oriented credential file.
    ///
    /// Each line is `host:port:username:password`. Malformed lines are
    /// skipped with a warning; a missing file or zero valid lines is a
    /// fatal configuration error.
    pub fn from_file<R: Rng + ?Sized>(path: impl AsRef<Path>, rng: &mut R) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Configuration(format!("cannot read proxy file {}: {}", path.display(), e))
        })?;
        Self::from_lines(contents.lines(), rng)
    }

    /// Builds a pool from an iterator of credential lines.
    pub fn from_lines<'a, R, I>(lines: I, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let mut slots = Vec::new();

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }

            let Some(endpoint) = ProxyEndpoint::parse(line) else {
                warn!("skipping malformed proxy line");
                continue;
            };

            match Self::build_client(&endpoint, rng) {
                Ok(client) => slots.push(PoolSlot {
                    client,
                    label: endpoint.label(),
                }),
                Err(e) => {
                    warn!("failed to build client for proxy {}: {}", endpoint.label(), e);
                }
            }
        }

        if slots.is_empty() {
            return Err(CrawlError::Configuration(
                "no valid proxies found in file".to_string(),
            ));
        }

        debug!("proxy pool initialized with {} clients", slots.len());
        let active = vec![true; slots.len()];
        Ok(Self {
            slots,
            state: Mutex::new(PoolState { cursor: 0, active }),
        })
    }

    fn build_client<R: Rng + ?Sized>(endpoint: &ProxyEndpoint, rng: &mut R) -> Result<Client> {
        let proxy = Proxy::all(format!("http://{}:{}", endpoint.host, endpoint.port))?
            .basic_auth(&endpoint.username, &endpoint.password);

        let client = Client::builder()
            .default_headers(fingerprint::default_headers(rng))
            .timeout(CLIENT_TIMEOUT)
            .proxy(proxy)
            .build()?;

        Ok(client)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the next active client in round-robin order.
    ///
    /// The rotation walks the active subset only, so deactivated proxies
    /// stop receiving traffic immediately. Fails with `NoActiveProxies`
    /// once every client has been deactivated.
    pub fn acquire(&self) -> Result<ClientHandle> {
        let mut state = self.lock();

        let active: Vec<usize> = state
            .active
            .iter()
            .enumerate()
            .filter_map(|(i, alive)| alive.then_some(i))
            .collect();

        if active.is_empty() {
            return Err(CrawlError::NoActiveProxies);
        }

        let index = active[state.cursor % active.len()];
        state.cursor = state.cursor.wrapping_add(1);

        let slot = &self.slots[index];
        Ok(ClientHandle {
            index,
            client: slot.client.clone(),
            proxy: slot.label.clone(),
        })
    }

    /// Removes the handle's client from the rotation.
    ///
    /// Idempotent; deactivation is permanent for the process lifetime.
    pub fn deactivate(&self, handle: &ClientHandle) {
        let mut state = self.lock();
        if state.active[handle.index] {
            state.active[handle.index] = false;
            warn!("proxy {} deactivated", handle.proxy);
        }
    }

    /// Snapshot count of clients still in the rotation.
    pub fn active_count(&self) -> usize {
        self.lock().active.iter().filter(|a| **a).count()
    }

    /// Total number of clients built at startup.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns whether the pool holds no clients.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

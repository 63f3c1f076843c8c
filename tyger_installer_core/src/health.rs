/// HTTP healthcheck facade for the Tyger chart install step's
/// `/healthcheck` poll. Pulled out from a bare `reqwest` call inline so
/// tests can swap in `FakeHealthChecker` instead of needing a server
/// listening at the installed domain, matching the fake/live split
/// every other facade in this crate uses.
use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, url: &str) -> bool;
}

pub struct LiveHealthChecker {
    client: reqwest::Client,
}

impl LiveHealthChecker {
    pub fn new() -> Self {
        LiveHealthChecker { client: reqwest::Client::new() }
    }
}

impl Default for LiveHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for LiveHealthChecker {
    async fn check(&self, url: &str) -> bool {
        matches!(self.client.get(url).send().await, Ok(resp) if resp.status().is_success())
    }
}

/// Healthy for every URL by default; `mark_unhealthy` pins a URL to
/// always fail, for exercising the install DAG's healthcheck-timeout
/// path without a 60-second real sleep.
#[derive(Default)]
pub struct FakeHealthChecker {
    unhealthy: Mutex<BTreeSet<String>>,
}

impl FakeHealthChecker {
    pub fn new() -> Self {
        FakeHealthChecker::default()
    }

    pub fn mark_unhealthy(&self, url: &str) {
        self.unhealthy.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl HealthChecker for FakeHealthChecker {
    async fn check(&self, url: &str) -> bool {
        !self.unhealthy.lock().unwrap().contains(url)
    }
}

//! Concurrent API-key validation across providers.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arcade_types::Definition;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::transport::{Transport, TransportRequest};

/// One provider's key check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProbe {
    pub provider: String,
    pub validation_url: String,
    pub header: String,
    pub prefix: String,
    /// `None` or empty means no key was configured.
    pub api_key: Option<String>,
}

impl KeyProbe {
    /// Builds a probe from a definition's auth block.
    ///
    /// Definitions without a `validation_url` cannot be probed.
    pub fn from_definition(definition: &Definition, api_key: Option<String>) -> Option<Self> {
        let auth = &definition.auth;
        let validation_url = auth.validation_url.clone()?;
        Some(Self {
            provider: definition.provider.clone(),
            validation_url,
            header: auth.header.clone(),
            prefix: auth.prefix.clone(),
            api_key,
        })
    }
}

/// Outcome of a single key probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum KeyStatus {
    Valid,
    /// The provider answered 401 or 403.
    Invalid,
    /// Any other status code, or a transport failure.
    Error(String),
    TimedOut,
    /// No key was configured; nothing was sent.
    Missing,
}

/// Probes every provider's key concurrently.
///
/// At most `concurrency` probes run at once and each is bounded by `timeout`.
/// Results are collected only after every probe has finished or timed out.
/// Only the first probe per provider is run.
pub async fn probe_keys(
    probes: Vec<KeyProbe>,
    transport: Arc<dyn Transport>,
    concurrency: usize,
    timeout: Duration,
) -> BTreeMap<String, KeyStatus> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut results = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut join_set = JoinSet::new();

    for probe in probes {
        if !seen.insert(probe.provider.clone()) {
            continue;
        }
        let Some(api_key) = probe.api_key.clone().filter(|key| !key.is_empty()) else {
            debug!(provider = %probe.provider, "no key configured; probe skipped");
            results.insert(probe.provider, KeyStatus::Missing);
            continue;
        };
        let transport = Arc::clone(&transport);
        let semaphore = Arc::clone(&semaphore);
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let status = run_probe(transport.as_ref(), &probe, &api_key, timeout).await;
            (probe.provider, status)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((provider, status)) => {
                debug!(%provider, ?status, "key probe finished");
                results.insert(provider, status);
            }
            Err(error) => warn!(%error, "key probe task aborted"),
        }
    }

    info!(
        providers = results.len(),
        valid = results.values().filter(|status| **status == KeyStatus::Valid).count(),
        "key probes complete"
    );
    results
}

async fn run_probe(transport: &dyn Transport, probe: &KeyProbe, api_key: &str, timeout: Duration) -> KeyStatus {
    let mut headers = IndexMap::new();
    headers.insert(probe.header.clone(), format!("{}{}", probe.prefix, api_key));
    let request = TransportRequest::get(probe.validation_url.clone(), headers, timeout);

    match tokio::time::timeout(timeout, transport.send(request)).await {
        Err(_) | Ok(Err(EngineError::Timeout { .. })) => KeyStatus::TimedOut,
        Ok(Err(error)) => KeyStatus::Error(error.to_string()),
        Ok(Ok(response)) => match response.status {
            200..=299 => KeyStatus::Valid,
            401 | 403 => KeyStatus::Invalid,
            status => KeyStatus::Error(format!("HTTP {status}")),
        },
    }
}

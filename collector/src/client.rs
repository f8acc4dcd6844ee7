//! HTTP fetcher for the upstream sources.
//!
//! Every call carries its own timeout so one slow service cannot stall the
//! fan-out, and every response is parsed at this single boundary into a typed
//! [`RawValue`].

use crate::{
    auth::AccessToken,
    family::{
        TenantId,
        Window,
    },
    sources::{
        RawValue,
        SeriesPoint,
        ServiceKind,
        SourceFailure,
        SourceKind,
        SourceSpec,
    },
};
use async_trait::async_trait;
use edupulse_config::Endpoints;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    time::Duration,
};
use url::Url;

#[async_trait]
pub trait SourceFetch: Send + Sync {
    /// Fetches one source for one window, optionally scoped to a tenant.
    async fn fetch(
        &self,
        spec: &SourceSpec,
        window: &Window,
        scope: Option<&TenantId>,
        token: &AccessToken,
    ) -> Result<RawValue, SourceFailure>;
}

/// Fetches sources over HTTP with a shared client.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    endpoints: Endpoints,
    timeout: Duration,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct CountData {
    total: u64,
}

#[derive(Deserialize)]
struct BreakdownData {
    breakdown: BTreeMap<String, u64>,
}

#[derive(Deserialize)]
struct SeriesData {
    series: Vec<SeriesPoint>,
}

impl HttpSourceFetcher {
    pub fn new(client: reqwest::Client, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            client,
            endpoints,
            timeout,
        }
    }

    fn base_url(&self, service: ServiceKind) -> &Url {
        match service {
            ServiceKind::User => &self.endpoints.user_service,
            ServiceKind::Task => &self.endpoints.task_service,
            ServiceKind::Point => &self.endpoints.point_service,
            ServiceKind::Badge => &self.endpoints.badge_service,
        }
    }

    fn request_url(
        &self,
        spec: &SourceSpec,
        window: &Window,
        scope: Option<&TenantId>,
    ) -> Result<Url, SourceFailure> {
        let mut url = self
            .base_url(spec.service)
            .join(spec.path)
            .map_err(|e| SourceFailure::Unavailable(format!("invalid source url: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in spec.query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("windowStart", &window.start.to_rfc3339());
            pairs.append_pair("windowEnd", &window.end.to_rfc3339());
            if let Some(tenant) = scope {
                pairs.append_pair("tenantId", tenant.as_str());
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl SourceFetch for HttpSourceFetcher {
    async fn fetch(
        &self,
        spec: &SourceSpec,
        window: &Window,
        scope: Option<&TenantId>,
        token: &AccessToken,
    ) -> Result<RawValue, SourceFailure> {
        let url = self.request_url(spec, window, scope)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceFailure::TimedOut(self.timeout.as_secs())
                } else {
                    SourceFailure::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFailure::Unavailable(format!("status {status}")));
        }

        match spec.kind {
            SourceKind::Count => {
                let envelope: Envelope<CountData> = response
                    .json()
                    .await
                    .map_err(|e| SourceFailure::Malformed(e.to_string()))?;
                Ok(RawValue::Count(envelope.data.total))
            }
            SourceKind::Breakdown => {
                let envelope: Envelope<BreakdownData> = response
                    .json()
                    .await
                    .map_err(|e| SourceFailure::Malformed(e.to_string()))?;
                Ok(RawValue::Breakdown(envelope.data.breakdown))
            }
            SourceKind::Series => {
                let envelope: Envelope<SeriesData> = response
                    .json()
                    .await
                    .map_err(|e| SourceFailure::Malformed(e.to_string()))?;
                Ok(RawValue::Series(envelope.data.series))
            }
        }
    }
}

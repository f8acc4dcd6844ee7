//! School directory lookup.
//!
//! The school service owns the list of tenant ids; the rollup run asks it
//! once per run which per-tenant children to produce.

use crate::{
    auth::AccessToken,
    family::TenantId,
    sources::SourceFailure,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn list_tenants(&self, token: &AccessToken) -> Result<Vec<TenantId>, SourceFailure>;
}

pub struct HttpTenantDirectory {
    client: reqwest::Client,
    school_url: Url,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SchoolsEnvelope {
    data: SchoolsData,
}

#[derive(Deserialize)]
struct SchoolsData {
    schools: Vec<SchoolRecord>,
}

#[derive(Deserialize)]
struct SchoolRecord {
    id: String,
}

impl HttpTenantDirectory {
    pub fn new(client: reqwest::Client, school_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            school_url,
            timeout,
        }
    }
}

#[async_trait]
impl TenantDirectory for HttpTenantDirectory {
    async fn list_tenants(&self, token: &AccessToken) -> Result<Vec<TenantId>, SourceFailure> {
        let url = self
            .school_url
            .join("api/schools")
            .map_err(|e| SourceFailure::Unavailable(format!("invalid school url: {e}")))?;

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
                    SourceFailure::Unavailable(format!("school directory request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(SourceFailure::Unavailable(format!(
                "school directory returned {}",
                response.status()
            )));
        }

        let envelope: SchoolsEnvelope = response
            .json()
            .await
            .map_err(|e| SourceFailure::Malformed(format!("school payload: {e}")))?;

        Ok(envelope
            .data
            .schools
            .into_iter()
            .map(|school| TenantId(school.id))
            .collect())
    }
}

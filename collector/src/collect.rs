//! The fan-out itself.
//!
//! One collector invocation issues every source call of a family
//! concurrently and joins them once all settle. Failures are captured per
//! source; a timed-out or erroring call never aborts its siblings and never
//! bubbles as an error from `collect`.

use crate::{
    auth::{
        AccessToken,
        TokenProvider,
    },
    client::SourceFetch,
    family::{
        MetricFamily,
        TenantId,
        Window,
    },
    sources::{
        RawValue,
        SourceFailure,
        SourceKey,
    },
};
use futures::future::join_all;
use std::{
    collections::BTreeMap,
    sync::Arc,
};
use tracing::{
    debug,
    warn,
};

/// What one scope's fan-out produced: the values that arrived and the
/// sources that did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorOutput {
    pub values: BTreeMap<SourceKey, RawValue>,
    pub failures: BTreeMap<SourceKey, SourceFailure>,
}

impl CollectorOutput {
    pub fn count(&self, key: SourceKey) -> Option<u64> {
        self.values.get(&key).and_then(RawValue::as_count)
    }

    pub fn breakdown(&self, key: SourceKey) -> Option<&BTreeMap<String, u64>> {
        self.values.get(&key).and_then(RawValue::as_breakdown)
    }

    pub fn series(&self, key: SourceKey) -> Option<&[crate::sources::SeriesPoint]> {
        self.values.get(&key).and_then(RawValue::as_series)
    }

    /// Number of sources that answered.
    pub fn fetched(&self) -> usize {
        self.values.len()
    }
}

/// One family's collection across scopes: the global fan-out plus one scoped
/// fan-out per known tenant.
#[derive(Debug, Clone, Default)]
pub struct FamilyCollection {
    pub global: CollectorOutput,
    pub tenants: BTreeMap<TenantId, CollectorOutput>,
}

/// Fetches every raw value a family's aggregation needs for one window.
pub struct Collector {
    fetcher: Arc<dyn SourceFetch>,
    tokens: Arc<dyn TokenProvider>,
}

impl Collector {
    pub fn new(fetcher: Arc<dyn SourceFetch>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { fetcher, tokens }
    }

    /// Mints the run token. Call once per run and reuse the token across
    /// every family and tenant fan-out of that run.
    pub async fn begin_run(&self) -> Result<AccessToken, SourceFailure> {
        self.tokens.mint().await
    }

    /// Collects one family for one scope. Per-source failures are recorded
    /// in the output, never raised.
    pub async fn collect(
        &self,
        family: MetricFamily,
        window: &Window,
        scope: Option<&TenantId>,
        token: &AccessToken,
    ) -> CollectorOutput {
        let fetches = family.sources().iter().map(|spec| async move {
            let result = self.fetcher.fetch(spec, window, scope, token).await;
            (spec.key, result)
        });

        let mut output = CollectorOutput::default();
        for (key, result) in join_all(fetches).await {
            match result {
                Ok(value) => {
                    output.values.insert(key, value);
                }
                Err(failure) => {
                    warn!(family = %family, source = %key, %failure, "collector: source failed");
                    output.failures.insert(key, failure);
                }
            }
        }

        debug!(
            family = %family,
            scope = scope.map(TenantId::as_str).unwrap_or("global"),
            fetched = output.fetched(),
            failed = output.failures.len(),
            "collector: fan-out settled"
        );

        output
    }

    /// Collects one family globally and per tenant, all scopes concurrently.
    ///
    /// A tenant whose every source failed still appears in the result (with
    /// an empty `values` map) so downstream aggregation produces an all-zero
    /// child rather than omitting the tenant.
    pub async fn collect_with_tenants(
        &self,
        family: MetricFamily,
        window: &Window,
        tenants: &[TenantId],
        token: &AccessToken,
    ) -> FamilyCollection {
        let global_fut = self.collect(family, window, None, token);
        let tenant_futs = join_all(tenants.iter().map(|tenant| async move {
            let output = self.collect(family, window, Some(tenant), token).await;
            (tenant.clone(), output)
        }));

        let (global, tenant_outputs) = tokio::join!(global_fut, tenant_futs);

        FamilyCollection {
            global,
            tenants: tenant_outputs.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sources::SourceSpec;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    /// Serves canned counts; fails the sources named in `broken`.
    struct FakeFetcher {
        broken: Vec<SourceKey>,
    }

    #[async_trait]
    impl SourceFetch for FakeFetcher {
        async fn fetch(
            &self,
            spec: &SourceSpec,
            _window: &Window,
            scope: Option<&TenantId>,
            _token: &AccessToken,
        ) -> Result<RawValue, SourceFailure> {
            if self.broken.contains(&spec.key) {
                return Err(SourceFailure::TimedOut(10));
            }
            // Tenant scopes report smaller counts than global.
            let base = if scope.is_some() { 10 } else { 100 };
            Ok(RawValue::Count(base))
        }
    }

    struct FakeTokens;

    #[async_trait]
    impl TokenProvider for FakeTokens {
        async fn mint(&self) -> Result<AccessToken, SourceFailure> {
            Ok(AccessToken::new("test-token"))
        }
    }

    fn window() -> Window {
        Window::new(
            chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            chrono::Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn collector(broken: Vec<SourceKey>) -> Collector {
        Collector::new(Arc::new(FakeFetcher { broken }), Arc::new(FakeTokens))
    }

    #[tokio::test]
    async fn one_failing_source_leaves_its_siblings_intact() {
        let collector = collector(vec![SourceKey::PointsEarnedSeries]);
        let token = collector.begin_run().await.unwrap();

        let output = collector
            .collect(MetricFamily::Point, &window(), None, &token)
            .await;

        // Point family has five sources; four answered, one failed.
        assert_eq!(output.fetched(), 4);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(
            output.failures.get(&SourceKey::PointsEarnedSeries),
            Some(&SourceFailure::TimedOut(10))
        );
        assert_eq!(output.count(SourceKey::PointsEarned), Some(100));
    }

    #[tokio::test]
    async fn fully_healthy_family_has_no_failures() {
        let collector = collector(vec![]);
        let token = collector.begin_run().await.unwrap();

        let output = collector
            .collect(MetricFamily::Task, &window(), None, &token)
            .await;

        assert!(output.failures.is_empty());
        assert_eq!(output.fetched(), MetricFamily::Task.sources().len());
    }

    #[tokio::test]
    async fn tenant_scopes_are_collected_alongside_global() {
        let collector = collector(vec![]);
        let token = collector.begin_run().await.unwrap();
        let tenants = vec![TenantId::from("school-1"), TenantId::from("school-2")];

        let collection = collector
            .collect_with_tenants(MetricFamily::User, &window(), &tenants, &token)
            .await;

        assert_eq!(collection.global.count(SourceKey::UserTotals), Some(100));
        assert_eq!(collection.tenants.len(), 2);
        for tenant in &tenants {
            let output = collection.tenants.get(tenant).expect("tenant present");
            assert_eq!(output.count(SourceKey::UserTotals), Some(10));
        }
    }

    #[tokio::test]
    async fn broken_tenant_scope_still_yields_an_entry() {
        // Every source broken: the tenant entry must survive with zero values.
        use strum::IntoEnumIterator;
        let all: Vec<SourceKey> = MetricFamily::iter()
            .flat_map(|f| f.sources().iter().map(|s| s.key))
            .collect();
        let collector = collector(all);
        let token = collector.begin_run().await.unwrap();
        let tenants = vec![TenantId::from("school-9")];

        let collection = collector
            .collect_with_tenants(MetricFamily::Badge, &window(), &tenants, &token)
            .await;

        let output = collection
            .tenants
            .get(&TenantId::from("school-9"))
            .expect("tenant present despite failures");
        assert_eq!(output.fetched(), 0);
        assert_eq!(output.failures.len(), MetricFamily::Badge.sources().len());
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use reconmap::aggregator::ScanStatus;
    use reconmap::cache::ResultCache;
    use reconmap::error::ReconError;
    use reconmap::metrics::{MetricValue, MetricsCollector, MetricsConfig};
    use reconmap::module::{
        Capability, ModuleContext, ModuleDescriptor, ModuleError, ModuleReport, ModuleStatus,
        ReconModule,
    };
    use reconmap::orchestrator::{Orchestrator, ScanOptions, ScanRequest};
    use reconmap::rate_limit::{RateLimitPolicy, RateLimiter};
    use reconmap::registry::{ModuleRegistry, Selection};
    use reconmap::target::{Discoveries, Target};
    use serde_json::{json, Value};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Returns a fixed payload after one rate token
    struct Passive {
        id: &'static str,
        payload: Value,
        calls: AtomicUsize,
        cache_ttl: Option<Duration>,
    }

    impl Passive {
        fn new(id: &'static str, payload: Value) -> Self {
            Self {
                id,
                payload,
                calls: AtomicUsize::new(0),
                cache_ttl: None,
            }
        }

        fn cached(mut self, ttl: Duration) -> Self {
            self.cache_ttl = Some(ttl);
            self
        }
    }

    #[async_trait]
    impl ReconModule for Passive {
        fn descriptor(&self) -> ModuleDescriptor {
            let descriptor = ModuleDescriptor::new(self.id).with_capability(Capability::Passive);
            match self.cache_ttl {
                Some(ttl) => descriptor.cacheable(ttl),
                None => descriptor,
            }
        }

        async fn execute(
            &self,
            _target: &Target,
            ctx: &ModuleContext,
        ) -> Result<ModuleReport, ModuleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.acquire_token().await?;
            Ok(ModuleReport::complete(self.payload.clone()))
        }
    }

    /// Sleeps far past its budget inside a cancellable outbound call
    struct Hanging {
        id: &'static str,
        timeout: Duration,
    }

    #[async_trait]
    impl ReconModule for Hanging {
        fn descriptor(&self) -> ModuleDescriptor {
            ModuleDescriptor::new(self.id)
                .with_capability(Capability::Active)
                .with_timeout(self.timeout)
        }

        async fn execute(
            &self,
            _target: &Target,
            ctx: &ModuleContext,
        ) -> Result<ModuleReport, ModuleError> {
            ctx.outbound(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await?;
            Ok(ModuleReport::complete(Value::Null))
        }
    }

    struct Failing(&'static str);

    #[async_trait]
    impl ReconModule for Failing {
        fn descriptor(&self) -> ModuleDescriptor {
            ModuleDescriptor::new(self.0)
        }

        async fn execute(
            &self,
            _target: &Target,
            _ctx: &ModuleContext,
        ) -> Result<ModuleReport, ModuleError> {
            Err(ModuleError::failed("service unavailable"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ReconModule for Panicking {
        fn descriptor(&self) -> ModuleDescriptor {
            ModuleDescriptor::new("panicking")
        }

        async fn execute(
            &self,
            _target: &Target,
            _ctx: &ModuleContext,
        ) -> Result<ModuleReport, ModuleError> {
            panic!("index out of bounds");
        }
    }

    /// Reports a subdomain through the discovery channel
    struct Subdomains;

    #[async_trait]
    impl ReconModule for Subdomains {
        fn descriptor(&self) -> ModuleDescriptor {
            ModuleDescriptor::new("subdomains").with_capability(Capability::Passive)
        }

        async fn execute(
            &self,
            target: &Target,
            _ctx: &ModuleContext,
        ) -> Result<ModuleReport, ModuleError> {
            let found = format!("www.{}", target.canonical());
            Ok(ModuleReport::complete(json!([found.clone()])).with_discoveries(Discoveries {
                ip_addresses: BTreeSet::new(),
                subdomains: BTreeSet::from([found]),
            }))
        }
    }

    fn build(modules: Vec<Arc<dyn ReconModule>>) -> Orchestrator {
        let mut registry = ModuleRegistry::new();
        for module in modules {
            registry.register_module(module).unwrap();
        }
        Orchestrator::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new(RateLimitPolicy::new(100.0, 20)).unwrap()),
            Arc::new(ResultCache::new()),
        )
        .unwrap()
        .with_defaults(ScanOptions {
            timeout: Duration::from_secs(5),
            grace_period: Duration::from_millis(100),
            passive_only: false,
        })
    }

    #[tokio::test]
    async fn test_single_passive_module_payload_unchanged() {
        let whois = json!({ "whois": { "registrar": "Example Registrar", "created": "1995-08-14" } });
        let orch = build(vec![Arc::new(Passive::new("passive_recon", whois.clone()))]);

        let result = orch
            .scan(ScanRequest::new("example.com", Selection::parse("passive_recon").unwrap()))
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Success);
        assert_eq!(result.outcomes().len(), 1);
        let outcome = &result.outcomes()[0];
        assert_eq!(outcome.module_id(), "passive_recon");
        assert_eq!(outcome.status(), ModuleStatus::Success);
        assert_eq!(outcome.payload(), &whois);
        assert_eq!(result.target().canonical(), "example.com");
    }

    #[tokio::test]
    async fn test_active_timeout_gives_partial_scan() {
        let orch = build(vec![
            Arc::new(Passive::new("passive_recon", json!({ "whois": {} }))),
            Arc::new(Hanging {
                id: "active_recon",
                timeout: Duration::from_millis(100),
            }),
        ]);

        let result = orch
            .scan(ScanRequest::new(
                "example.com",
                Selection::parse("passive_recon,active_recon").unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Partial);
        assert_eq!(result.outcomes().len(), 2);
        assert_eq!(result.outcome("passive_recon").unwrap().status(), ModuleStatus::Success);
        let active = result.outcome("active_recon").unwrap();
        assert_eq!(active.status(), ModuleStatus::Timeout);
        assert!(active.error_detail().is_some());
        assert!(result.duration() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_module_rejected() {
        let orch = build(vec![Arc::new(Passive::new("passive_recon", Value::Null))]);
        let err = orch
            .scan(ScanRequest::new(
                "example.com",
                Selection::parse("nonexistent_module").unwrap(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::UnknownModule(ref id) if id == "nonexistent_module"));
        assert!(err.is_scan_rejection());
    }

    #[tokio::test]
    async fn test_outcomes_follow_registration_order() {
        let orch = build(vec![
            Arc::new(Hanging {
                id: "slow",
                timeout: Duration::from_millis(50),
            }),
            Arc::new(Passive::new("fast", json!(1))),
            Arc::new(Failing("broken")),
        ]);

        let result = orch
            .scan(ScanRequest::new("example.com", Selection::parse("broken,fast,slow").unwrap()))
            .await
            .unwrap();

        let ids: Vec<&str> = result.outcomes().iter().map(|o| o.module_id()).collect();
        assert_eq!(ids, vec!["slow", "fast", "broken"]);
        assert_eq!(result.summary().total, 3);
    }

    #[tokio::test]
    async fn test_panicking_module_is_isolated() {
        let orch = build(vec![
            Arc::new(Panicking),
            Arc::new(Passive::new("sibling", json!("fine"))),
        ]);

        let result = orch
            .scan(ScanRequest::new("example.com", Selection::All))
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Partial);
        let panicked = result.outcome("panicking").unwrap();
        assert_eq!(panicked.status(), ModuleStatus::Error);
        assert!(panicked.error_detail().unwrap().contains("index out of bounds"));
        assert_eq!(result.outcome("sibling").unwrap().payload(), &json!("fine"));
    }

    #[tokio::test]
    async fn test_all_modules_failing_still_returns_result() {
        let orch = build(vec![
            Arc::new(Failing("first")),
            Arc::new(Hanging {
                id: "second",
                timeout: Duration::from_millis(50),
            }),
        ]);

        let result = orch
            .scan(ScanRequest::new("10.1.2.3", Selection::All))
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Error);
        assert_eq!(result.summary().failed(), 2);
        assert_eq!(
            result.outcome("first").unwrap().error_detail(),
            Some("service unavailable")
        );
    }

    #[tokio::test]
    async fn test_cached_module_runs_once() {
        let module = Arc::new(Passive::new("whois", json!({ "whois": "cached" })).cached(Duration::from_secs(60)));
        let orch = build(vec![module.clone()]);

        let first = orch
            .scan(ScanRequest::new("example.com", Selection::All))
            .await
            .unwrap();
        let second = orch
            .scan(ScanRequest::new("https://Example.com/", Selection::All))
            .await
            .unwrap();

        assert_eq!(module.calls.load(Ordering::SeqCst), 1);
        assert!(!first.outcomes()[0].is_cached());
        assert!(second.outcomes()[0].is_cached());
        assert_eq!(second.outcomes()[0].payload(), first.outcomes()[0].payload());
        assert_eq!(second.summary().cached, 1);
    }

    #[tokio::test]
    async fn test_passive_only_skips_active_modules() {
        let orch = build(vec![
            Arc::new(Passive::new("passive_recon", json!({}))),
            Arc::new(Hanging {
                id: "active_recon",
                timeout: Duration::from_secs(1),
            }),
        ]);

        let request = ScanRequest::new("example.com", Selection::All).with_options(ScanOptions {
            passive_only: true,
            ..ScanOptions::default()
        });
        let result = orch.scan(request).await.unwrap();

        assert_eq!(result.status(), ScanStatus::Success);
        assert_eq!(result.outcome("active_recon").unwrap().status(), ModuleStatus::Skipped);
        assert_eq!(result.summary().skipped, 1);
    }

    #[tokio::test]
    async fn test_discoveries_merge_into_result_target() {
        let orch = build(vec![Arc::new(Subdomains)]);
        let result = orch
            .scan(ScanRequest::new("example.com", Selection::All))
            .await
            .unwrap();

        assert!(result.target().subdomains().contains("www.example.com"));
    }

    #[tokio::test]
    async fn test_shared_limiter_across_scans() {
        let orch = build(vec![Arc::new(Passive::new("a", json!(1))), Arc::new(Passive::new("b", json!(2)))]);

        let (left, right) = tokio::join!(
            orch.scan(ScanRequest::new("example.com", Selection::All)),
            orch.scan(ScanRequest::new("example.org", Selection::All)),
        );
        assert_eq!(left.unwrap().status(), ScanStatus::Success);
        assert_eq!(right.unwrap().status(), ScanStatus::Success);
        assert_eq!(orch.limiter().status().tokens_granted, 4);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig { enabled: true }));
        metrics.initialize().await.unwrap();
        let orch = build(vec![Arc::new(Passive::new("a", json!(1))), Arc::new(Failing("b"))])
            .with_metrics(Arc::clone(&metrics));

        orch.scan(ScanRequest::new("example.com", Selection::All))
            .await
            .unwrap();
        let _ = orch
            .scan(ScanRequest::new("not a target", Selection::All))
            .await;

        assert_eq!(metrics.get("scans_started").await, Some(MetricValue::Counter(1)));
        assert_eq!(metrics.get("scans_rejected").await, Some(MetricValue::Counter(1)));
        assert_eq!(metrics.get("module_outcomes_error").await, Some(MetricValue::Counter(1)));

        let export = metrics.export_prometheus().await.unwrap();
        assert!(export.contains("reconmap_scans_completed 1"));
    }
}

//! `dns_resolve`: address lookup through the system resolver.
//!
//! Payload shape:
//!
//! ```json
//! { "host": "example.com", "addresses": ["93.184.216.34"] }
//! ```
//!
//! Every address is also reported as a discovery so it lands on the
//! result's target.

use crate::constants;
use crate::module::{Capability, ModuleContext, ModuleDescriptor, ModuleError, ModuleReport, ReconModule};
use crate::target::{Discoveries, Target};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;

pub const ID: &str = "dns_resolve";

/// Passive, cacheable DNS lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolve;

#[async_trait]
impl ReconModule for DnsResolve {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(ID)
            .with_capability(Capability::Passive)
            .with_timeout(Duration::from_secs(5))
            .with_operation_key("lookup")
            .cacheable(Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS))
    }

    async fn execute(
        &self,
        target: &Target,
        ctx: &ModuleContext,
    ) -> Result<ModuleReport, ModuleError> {
        let host = target.canonical();

        // IP literals answer for themselves
        let addresses: BTreeSet<IpAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => BTreeSet::from([ip]),
            Err(_) => {
                let query = format!("{}:0", host);
                ctx.outbound(async {
                    lookup_host(query.as_str())
                        .await
                        .map(|addrs| addrs.map(|a| a.ip()).collect())
                        .map_err(|e| ModuleError::failed(format!("lookup of {} failed: {}", host, e)))
                })
                .await?
            }
        };

        debug!(host, count = addresses.len(), "DNS lookup finished");

        let payload = json!({
            "host": host,
            "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        Ok(ModuleReport::complete(payload).with_discoveries(Discoveries {
            ip_addresses: addresses,
            subdomains: BTreeSet::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleReport, TimeBudget};
    use crate::rate_limit::{RateLimitPolicy, RateLimiter};
    use crate::target;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(cancel: CancellationToken) -> ModuleContext {
        let descriptor = DnsResolve.descriptor();
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::new(10.0, 1)).unwrap());
        ModuleContext::new(
            &descriptor,
            descriptor.options.clone(),
            TimeBudget::from_now(descriptor.timeout),
            limiter,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_ip_target_short_circuits() {
        let target = target::resolve("10.0.0.7").unwrap();
        let ctx = context(CancellationToken::new());

        let report = DnsResolve.execute(&target, &ctx).await.unwrap();
        match report {
            ModuleReport::Complete { payload, discoveries } => {
                assert_eq!(payload["addresses"], json!(["10.0.0.7"]));
                assert!(discoveries.ip_addresses.contains(&"10.0.0.7".parse::<IpAddr>().unwrap()));
            }
            other => panic!("expected complete report, got {:?}", other),
        }
        // no lookup, no token taken
        assert_eq!(ctx.limiter().status().tokens_granted, 0);
    }

    #[tokio::test]
    async fn test_cancelled_lookup() {
        let target = target::resolve("example.com").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = DnsResolve.execute(&target, &context(cancel)).await.unwrap_err();
        assert_eq!(err, ModuleError::Cancelled);
    }
}

//! `tcp_probe`: TCP connect probe of a port list.
//!
//! Options:
//! - `ports`: array of ports, defaults to a short list of common services
//! - `connect_timeout_ms`: bound on each connect attempt
//!
//! Payload shape:
//!
//! ```json
//! { "host": "127.0.0.1", "open": [22, 80], "closed": [443], "probed": 3 }
//! ```

use crate::constants::modules::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PROBE_PORTS};
use crate::module::{Capability, ModuleContext, ModuleDescriptor, ModuleError, ModuleReport, ReconModule};
use crate::target::Target;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace};

pub const ID: &str = "tcp_probe";

/// Active port probe
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[derive(Debug, Default)]
struct Probed {
    open: Vec<u16>,
    closed: Vec<u16>,
}

impl Probed {
    fn payload(&self, host: &str) -> Value {
        json!({
            "host": host,
            "open": self.open,
            "closed": self.closed,
            "probed": self.open.len() + self.closed.len(),
        })
    }
}

#[async_trait]
impl ReconModule for TcpProbe {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(ID)
            .with_capability(Capability::Active)
            .with_option("ports", DEFAULT_PROBE_PORTS.to_vec())
            .with_option("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS)
            .with_operation_key("connect")
    }

    async fn execute(
        &self,
        target: &Target,
        ctx: &ModuleContext,
    ) -> Result<ModuleReport, ModuleError> {
        let ports: Vec<u16> = ctx.option_or("ports", DEFAULT_PROBE_PORTS.to_vec())?;
        let connect_timeout =
            Duration::from_millis(ctx.option_or("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS)?);
        if connect_timeout.is_zero() {
            return Err(ModuleError::InvalidOption {
                key: "connect_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let host = target.canonical();
        let addrs = resolve_addrs(host, ctx).await?;
        let mut probed = Probed::default();

        for port in ports {
            let result = match ctx.checkpoint() {
                Ok(()) => {
                    ctx.outbound(async { Ok(connect_any(&addrs, port, connect_timeout).await) })
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(true) => {
                    trace!(port, "Port open");
                    probed.open.push(port);
                }
                Ok(false) => probed.closed.push(port),
                Err(e) if e.is_timeout() => {
                    debug!(
                        probed = probed.open.len() + probed.closed.len(),
                        "Probe stopped early: {}", e
                    );
                    return Ok(ModuleReport::partial(
                        probed.payload(host),
                        format!("stopped before port {}: {}", port, e),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ModuleReport::complete(probed.payload(host)))
    }
}

/// Socket addresses for the target; IP targets skip the lookup
async fn resolve_addrs(host: &str, ctx: &ModuleContext) -> Result<Vec<SocketAddr>, ModuleError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, 0)]);
    }

    let query = format!("{}:0", host);
    let addrs: Vec<SocketAddr> = ctx
        .outbound(async {
            lookup_host(query.as_str())
                .await
                .map(Iterator::collect)
                .map_err(|e| ModuleError::failed(format!("could not resolve {}: {}", host, e)))
        })
        .await?;

    if addrs.is_empty() {
        return Err(ModuleError::failed(format!("{} has no addresses", host)));
    }
    Ok(addrs)
}

/// Try each address in turn; the port counts as open on the first connect
async fn connect_any(addrs: &[SocketAddr], port: u16, connect_timeout: Duration) -> bool {
    for base in addrs {
        let mut socket_addr = *base;
        socket_addr.set_port(port);

        if let Ok(Ok(_stream)) = timeout(connect_timeout, TcpStream::connect(socket_addr)).await {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::TimeBudget;
    use crate::rate_limit::{RateLimitPolicy, RateLimiter};
    use crate::target;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn context(ports: &[u16], budget: Duration) -> ModuleContext {
        let descriptor = TcpProbe.descriptor();
        let mut options = descriptor.options.clone();
        options.insert("ports".to_string(), json!(ports));
        options.insert("connect_timeout_ms".to_string(), json!(500));
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::new(1000.0, 100)).unwrap());
        ModuleContext::new(
            &descriptor,
            options,
            TimeBudget::from_now(budget),
            limiter,
            CancellationToken::new(),
        )
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_probe_local_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let target = target::resolve("127.0.0.1").unwrap();
        let ctx = context(&[open, closed], Duration::from_secs(5));

        let report = TcpProbe.execute(&target, &ctx).await.unwrap();
        match report {
            ModuleReport::Complete { payload, .. } => {
                assert_eq!(payload["open"], json!([open]));
                assert_eq!(payload["closed"], json!([closed]));
                assert_eq!(payload["probed"], json!(2));
            }
            other => panic!("expected complete report, got {:?}", other),
        }
        // one token per connect
        assert_eq!(ctx.limiter().status().tokens_granted, 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_reports_partial() {
        let target = target::resolve("127.0.0.1").unwrap();
        let ctx = context(&[1, 2, 3], Duration::ZERO);

        match TcpProbe.execute(&target, &ctx).await.unwrap() {
            ModuleReport::Partial { payload, detail, .. } => {
                assert_eq!(payload["probed"], json!(0));
                assert!(detail.contains("port 1"));
            }
            other => panic!("expected partial report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_ports_option() {
        let target = target::resolve("127.0.0.1").unwrap();
        let descriptor = TcpProbe.descriptor();
        let mut options = descriptor.options.clone();
        options.insert("ports".to_string(), json!("eighty"));
        let ctx = ModuleContext::new(
            &descriptor,
            options,
            TimeBudget::from_now(Duration::from_secs(1)),
            Arc::new(RateLimiter::standard().unwrap()),
            CancellationToken::new(),
        );

        let err = TcpProbe.execute(&target, &ctx).await.unwrap_err();
        assert!(matches!(err, ModuleError::InvalidOption { ref key, .. } if key == "ports"));
    }
}

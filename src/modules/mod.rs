//! # Reference Modules
//!
//! Modules shipped with reconmap. They are small on purpose and exist to
//! exercise the [`ReconModule`](crate::module::ReconModule) contract from the
//! binary; real deployments register their own implementations next to them.
//!
//! - [`dns::DnsResolve`] (`dns_resolve`, passive): system resolver lookup
//! - [`tcp::TcpProbe`] (`tcp_probe`, active): TCP connect probe of a port list

pub mod dns;
pub mod tcp;

use crate::error::Result;
use crate::module::ReconModule;
use crate::registry::ModuleRegistry;
use std::sync::Arc;

/// Every reference module, in canonical start order
pub fn builtin() -> Vec<Arc<dyn ReconModule>> {
    vec![Arc::new(dns::DnsResolve), Arc::new(tcp::TcpProbe)]
}

/// Register every reference module under its own descriptor
pub fn register_builtin(registry: &mut ModuleRegistry) -> Result<()> {
    for module in builtin() {
        registry.register_module(module)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Selection;

    #[test]
    fn test_register_builtin() {
        let mut registry = ModuleRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(registry.ids(), vec!["dns_resolve", "tcp_probe"]);

        let dns = registry.get("dns_resolve").unwrap();
        assert!(dns.descriptor.is_cacheable());
        assert!(!dns.descriptor.is_active());

        let tcp = registry.get("tcp_probe").unwrap();
        assert!(tcp.descriptor.is_active());
        assert!(!tcp.descriptor.is_cacheable());

        assert_eq!(registry.get_enabled(&Selection::All).unwrap().len(), 2);
        // registering twice is a duplicate
        assert!(register_builtin(&mut registry).is_err());
    }
}

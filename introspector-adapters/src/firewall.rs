//! Firewall-filter updates: the narrow external-collaborator boundary the
//! pipeline calls into after a successful post-processing phase. Actual
//! firewall-rule mutation (iptables/ipset generation, DHCP allowlisting)
//! stays out of scope; this crate only defines the seam and a couple of
//! stand-ins for tests.

use async_trait::async_trait;

use crate::error::AdapterResult;

#[async_trait]
pub trait FirewallUpdater: Send + Sync {
    /// Reconciles firewall filters against whatever the node cache
    /// currently considers active. Called once per successfully processed
    /// node, after ports have been created.
    async fn update_filters(&self) -> AdapterResult<()>;
}

/// Does nothing. The default when no firewall integration is configured.
#[derive(Default)]
pub struct NoopFirewallUpdater;

#[async_trait]
impl FirewallUpdater for NoopFirewallUpdater {
    async fn update_filters(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// Counts calls instead of touching any real firewall state, for pipeline
/// tests that need to assert the hook ran.
#[derive(Default)]
pub struct CountingFirewallUpdater {
    calls: std::sync::atomic::AtomicU64,
}

impl CountingFirewallUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl FirewallUpdater for CountingFirewallUpdater {
    async fn update_filters(&self) -> AdapterResult<()> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

//! Credential settler: after patching new IPMI credentials onto a node,
//! the bare-metal service needs a moment to actually start using them.
//! Grounded line-for-line on `_finish_set_ipmi_credentials` in
//! `process.py`, including its retry/backoff constants.

use std::time::Duration;

use chrono::Utc;
use introspector_adapters::{BareMetalClient, PowerState};

use crate::node_info::NodeInfo;

/// `_CREDENTIALS_WAIT_RETRIES` in the original.
pub const CREDENTIALS_WAIT_RETRIES: u32 = 10;
/// `_CREDENTIALS_WAIT_PERIOD`, in seconds, in the original.
pub const CREDENTIALS_WAIT_PERIOD: Duration = Duration::from_secs(3);

/// Polls `get_boot_device` until it succeeds (proof the new credentials
/// are in effect) or the retry budget is exhausted, then finishes the
/// node either way. Takes ownership of the already-locked `node_info` and
/// releases its lock before returning, the same as `_finish` does at the
/// end of the original's background greenthread.
pub async fn settle_credentials(
    mut node_info: NodeInfo,
    baremetal: &dyn BareMetalClient,
    power_off: bool,
) {
    for attempt in 0..CREDENTIALS_WAIT_RETRIES {
        match baremetal.get_boot_device(node_info.uuid).await {
            Ok(_) => {
                finish(node_info, power_off).await;
                return;
            }
            Err(err) => {
                tracing::debug!(
                    uuid = %node_info.uuid,
                    attempt,
                    error = %err,
                    "new IPMI credentials not yet in effect, retrying"
                );
                tokio::time::sleep(CREDENTIALS_WAIT_PERIOD).await;
            }
        }
    }

    tracing::warn!(uuid = %node_info.uuid, "node did not accept new IPMI credentials in time");
    let _ = node_info
        .finish(
            Utc::now(),
            Some("Failed to validate new IPMI credentials; manual intervention required".to_string()),
        )
        .await;
    node_info.release_lock();
}

/// Powers the node off (unless disabled) and marks it finished, the
/// shared tail of the success path both here and in the no-credentials
/// case in `process()`.
pub async fn finish(mut node_info: NodeInfo, power_off: bool) {
    if power_off {
        if let Err(err) = node_info.set_power_state(PowerState::Off).await {
            tracing::warn!(uuid = %node_info.uuid, error = %err, "failed to power node off after processing");
            let _ = node_info
                .finish(Utc::now(), Some(format!("Failed to power off node: {err}")))
                .await;
            node_info.release_lock();
            return;
        }
    }
    let _ = node_info.finish(Utc::now(), None).await;
    node_info.release_lock();
}

//! Helpers for pulling identification fields out of a raw introspection
//! submission: the MAC addresses a node can be looked up by, its BMC/IPMI
//! address, and the PXE-booting interface's MAC. Grounded on
//! `utils.get_valid_macs`/`utils.get_ipmi_address_from_data` as used from
//! `process.py`.

use serde_json::Value;

/// Object-store suffix for the raw, pre-processing payload, grounded on
/// `_UNPROCESSED_DATA_STORE_SUFFIX` in `process.py`.
pub const UNPROCESSED_SUFFIX: &str = "UNPROCESSED";

/// Keys stripped from a submission before it is archived in the object
/// store, grounded on `_STORAGE_EXCLUDED_KEYS` in `process.py` (ramdisk
/// logs are large and already persisted separately, if at all).
pub const STORAGE_EXCLUDED_KEYS: &[&str] = &["logs"];

/// Returns `data` with every key in [`STORAGE_EXCLUDED_KEYS`] removed.
pub fn filter_excluded_keys(data: &Value) -> Value {
    let mut filtered = data.clone();
    if let Some(map) = filtered.as_object_mut() {
        for key in STORAGE_EXCLUDED_KEYS {
            map.remove(*key);
        }
    }
    filtered
}

/// Every MAC address a node can be looked up by: each inventory interface's
/// `mac_address`, plus a top-level `macs` list if the ramdisk already
/// assembled one.
pub fn valid_macs(data: &Value) -> Vec<String> {
    let mut macs: Vec<String> = Vec::new();

    if let Some(list) = data.get("macs").and_then(Value::as_array) {
        macs.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
    }

    if let Some(interfaces) = data
        .get("inventory")
        .and_then(|i| i.get("interfaces"))
        .and_then(Value::as_array)
    {
        for iface in interfaces {
            if let Some(mac) = iface.get("mac_address").and_then(Value::as_str) {
                if !mac.is_empty() {
                    macs.push(mac.to_lowercase());
                }
            }
        }
    }

    macs.sort();
    macs.dedup();
    macs
}

/// The BMC/IPMI address a node can be looked up by, if the submission
/// carries one.
pub fn ipmi_address(data: &Value) -> Option<String> {
    data.get("ipmi_address")
        .or_else(|| data.get("inventory").and_then(|i| i.get("bmc_address")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The MAC address of the interface the ramdisk booted from, decoded from
/// `boot_interface`'s `01-<mac-with-dashes>` format.
pub fn pxe_mac(data: &Value) -> Option<String> {
    let boot_interface = data.get("boot_interface").and_then(Value::as_str)?;
    let dashed = boot_interface.strip_prefix("01-").unwrap_or(boot_interface);
    if dashed.matches('-').count() != 5 {
        return None;
    }
    Some(dashed.replace('-', ":").to_lowercase())
}

//! Ramdisk log persistence.
//!
//! Grounded on `_store_logs` in the original processing module: logs arrive
//! base64-encoded in the introspection payload, get decoded, and are
//! written under a configured directory with a filename built from the
//! node uuid, PXE MAC, BMC address, and current time.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use introspector_core::NodeUuid;
use std::path::PathBuf;

use crate::error::{AdapterError, AdapterResult};

/// The fields the original's `_store_logs` plugs into its filename format
/// string (`{uuid}`, `{mac}`, `{bmc}`, `{dt}`).
pub struct RamdiskLogContext<'a> {
    pub uuid: Option<NodeUuid>,
    pub mac: Option<&'a str>,
    pub bmc_address: Option<&'a str>,
    pub now: DateTime<Utc>,
}

pub trait RamdiskLogSink: Send + Sync {
    fn store(&self, ctx: &RamdiskLogContext, logs_b64: &str) -> AdapterResult<PathBuf>;
}

/// Writes decoded logs to a directory on disk, templating the filename.
pub struct FilesystemRamdiskLogSink {
    dir: PathBuf,
    filename_format: String,
}

impl FilesystemRamdiskLogSink {
    pub fn new(dir: impl Into<PathBuf>, filename_format: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename_format: filename_format.into(),
        }
    }

    fn render_filename(&self, ctx: &RamdiskLogContext) -> String {
        self.filename_format
            .replace(
                "{uuid}",
                &ctx.uuid.map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string()),
            )
            .replace(
                "{mac}",
                &ctx.mac.map(|m| m.replace(':', "")).unwrap_or_else(|| "unknown".to_string()),
            )
            .replace("{bmc}", ctx.bmc_address.unwrap_or("unknown"))
            .replace("{dt}", &ctx.now.format("%Y-%m-%d-%H-%M-%S").to_string())
    }
}

impl RamdiskLogSink for FilesystemRamdiskLogSink {
    fn store(&self, ctx: &RamdiskLogContext, logs_b64: &str) -> AdapterResult<PathBuf> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(logs_b64)
            .map_err(|e| AdapterError::RamdiskLogWriteFailed { reason: e.to_string() })?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AdapterError::RamdiskLogWriteFailed { reason: e.to_string() })?;

        let path = self.dir.join(self.render_filename(ctx));
        std::fs::write(&path, bytes)
            .map_err(|e| AdapterError::RamdiskLogWriteFailed { reason: e.to_string() })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use introspector_core::EntityIdType;

    #[test]
    fn store_decodes_base64_and_writes_templated_filename() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemRamdiskLogSink::new(dir.path(), "{uuid}_{dt}.tar.gz");
        let uuid = NodeUuid::now_v7();
        let ctx = RamdiskLogContext {
            uuid: Some(uuid),
            mac: Some("11:22:33:44:55:66"),
            bmc_address: Some("10.0.0.5"),
            now: Utc::now(),
        };

        let path = sink.store(&ctx, "aGVsbG8=").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(&uuid.to_string()));
    }

    #[test]
    fn store_rejects_invalid_base64() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemRamdiskLogSink::new(dir.path(), "{uuid}.tar.gz");
        let ctx = RamdiskLogContext {
            uuid: None,
            mac: None,
            bmc_address: None,
            now: Utc::now(),
        };
        let err = sink.store(&ctx, "not base64 at all!!").unwrap_err();
        assert!(matches!(err, AdapterError::RamdiskLogWriteFailed { .. }));
    }

    #[test]
    fn missing_context_fields_fall_back_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemRamdiskLogSink::new(dir.path(), "{uuid}_{mac}_{bmc}.tar.gz");
        let ctx = RamdiskLogContext {
            uuid: None,
            mac: None,
            bmc_address: None,
            now: Utc::now(),
        };
        let path = sink.store(&ctx, "aGVsbG8=").unwrap();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), "unknown_unknown_unknown.tar.gz");
    }
}

//! Capabilities for bridge calls.
//!
//! In dev mode every operation and host is allowed. Otherwise operations are
//! checked against the manifest's `[permissions]` section. Writes into the
//! application bundle are refused in both modes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ext_bridge::{BridgeCapabilityChecker, BridgeOp};
use ext_fs::FsCapabilityChecker;
use ext_net::NetCapabilityChecker;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;

/// `[permissions]` section of ren3d.toml
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Permissions {
    /// Bridge operations the page may call. Absent means all of them.
    pub ops: Option<Vec<String>>,
    pub net: Option<NetPermissions>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetPermissions {
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Permission denied: {capability} for {resource}")]
    Denied {
        capability: String,
        resource: String,
    },

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown operation in permissions: {0}")]
    UnknownOperation(String),
}

impl CapabilityError {
    fn denied(capability: &str, resource: &str) -> Self {
        Self::Denied {
            capability: capability.to_string(),
            resource: resource.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Capabilities {
    pub dev_mode: bool,
    ops: Option<Vec<BridgeOp>>,
    net_allow_patterns: Option<GlobSet>,
    net_deny_patterns: Option<GlobSet>,
    bundle_dir: PathBuf,
}

impl Capabilities {
    pub fn from_permissions(
        permissions: Option<&Permissions>,
        dev_mode: bool,
        bundle_dir: &Path,
    ) -> Result<Self, CapabilityError> {
        let permissions = permissions.cloned().unwrap_or_default();
        let net = permissions.net.unwrap_or_default();

        let ops = match permissions.ops {
            None => None,
            Some(names) => Some(
                names
                    .iter()
                    .map(|name| {
                        name.parse::<BridgeOp>()
                            .map_err(|_| CapabilityError::UnknownOperation(name.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        Ok(Self {
            dev_mode,
            ops,
            net_allow_patterns: Self::compile_host_patterns(net.allow.as_ref())?,
            net_deny_patterns: Self::compile_host_patterns(net.deny.as_ref())?,
            bundle_dir: bundle_dir
                .canonicalize()
                .unwrap_or_else(|_| bundle_dir.to_path_buf()),
        })
    }

    /// Compile glob patterns for hostnames (supports *.example.com style wildcards)
    fn compile_host_patterns(
        patterns: Option<&Vec<String>>,
    ) -> Result<Option<GlobSet>, CapabilityError> {
        match patterns {
            None => Ok(None),
            Some(pats) if pats.is_empty() => Ok(None),
            Some(pats) => {
                let mut builder = GlobSetBuilder::new();
                for pat in pats {
                    let glob = GlobBuilder::new(pat)
                        .literal_separator(false)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| CapabilityError::InvalidPattern(e.to_string()))?;
                    builder.add(glob);
                }
                Ok(Some(builder.build().map_err(|e| {
                    CapabilityError::InvalidPattern(e.to_string())
                })?))
            }
        }
    }

    pub fn check_op(&self, op: BridgeOp) -> Result<(), CapabilityError> {
        if self.dev_mode {
            return Ok(());
        }
        match &self.ops {
            Some(ops) if !ops.contains(&op) => Err(CapabilityError::denied("ops", op.as_str())),
            _ => Ok(()),
        }
    }

    /// Check if network access is allowed for the given host
    pub fn check_net(&self, host: &str) -> Result<(), CapabilityError> {
        if self.dev_mode {
            return Ok(());
        }

        // Deny takes precedence
        if let Some(deny) = &self.net_deny_patterns {
            if deny.is_match(host) {
                return Err(CapabilityError::denied("net", host));
            }
        }

        match &self.net_allow_patterns {
            Some(allow) if allow.is_match(host) => Ok(()),
            _ => Err(CapabilityError::denied("net", host)),
        }
    }

    pub fn check_fs_write(&self, path: &str) -> Result<(), CapabilityError> {
        let target = Path::new(path);
        let target = target
            .parent()
            .and_then(|parent| parent.canonicalize().ok())
            .and_then(|parent| target.file_name().map(|name| parent.join(name)))
            .unwrap_or_else(|| target.to_path_buf());

        if target.starts_with(&self.bundle_dir) {
            Err(CapabilityError::denied("fs.write", path))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Adapters
// ============================================================================

pub struct BridgeCapabilityAdapter(Arc<Capabilities>);

impl BridgeCapabilityChecker for BridgeCapabilityAdapter {
    fn check_op(&self, op: BridgeOp) -> Result<(), String> {
        self.0.check_op(op).map_err(|e| e.to_string())
    }

    fn check_fetch(&self, host: &str) -> Result<(), String> {
        self.0.check_net(host).map_err(|e| e.to_string())
    }
}

pub struct NetCapabilityAdapter(Arc<Capabilities>);

impl NetCapabilityChecker for NetCapabilityAdapter {
    fn check_connect(&self, host: &str) -> Result<(), String> {
        self.0.check_net(host).map_err(|e| e.to_string())
    }
}

pub struct FsCapabilityAdapter(Arc<Capabilities>);

impl FsCapabilityChecker for FsCapabilityAdapter {
    fn check_read(&self, _path: &str) -> Result<(), String> {
        Ok(())
    }

    fn check_write(&self, path: &str) -> Result<(), String> {
        self.0.check_fs_write(path).map_err(|e| e.to_string())
    }
}

pub fn create_capability_adapters(
    capabilities: Capabilities,
) -> (
    Arc<dyn BridgeCapabilityChecker>,
    Arc<dyn NetCapabilityChecker>,
    Arc<dyn FsCapabilityChecker>,
) {
    let caps = Arc::new(capabilities);
    (
        Arc::new(BridgeCapabilityAdapter(caps.clone())),
        Arc::new(NetCapabilityAdapter(caps.clone())),
        Arc::new(FsCapabilityAdapter(caps)),
    )
}

/// Cache key derivation for compiler bridges
///
/// The key covers every input that can change the bytes of the bootstrapped
/// bridge:
/// - Key format version
/// - Bridge source fingerprint
/// - Compiler interface fingerprint
/// - Runtime identity (version, ABI flags, jar fingerprints)
/// - Build strategy and compiler options
///
/// Only content fingerprints are hashed, never paths, so the same inputs
/// produce the same key on every machine.
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::BootstrapError;
use crate::runtime::RuntimeIdentity;
use crate::settings::{BuildStrategy, Settings};

/// Bump when the key recipe or the artifact layout changes
const KEY_FORMAT_VERSION: &str = "bridgeboot-key-v1";

/// Hex characters of the digest kept in the key
const KEY_HASH_LEN: usize = 24;

/// Deterministic identity of a bootstrapped compiler bridge
///
/// Format: `bridge-<version>-<hash>`. Keys are safe to use as file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilerCacheKey(String);

impl CompilerCacheKey {
    /// Accept an existing key string (e.g. from the command line)
    pub fn parse(raw: &str) -> Result<Self, BootstrapError> {
        let valid = raw.starts_with("bridge-")
            && raw.len() > "bridge-".len() + KEY_HASH_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(BootstrapError::InvalidConfiguration(format!(
                "not a compiler cache key: {}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompilerCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Derive the key for `settings` targeting the runtime `identity`
    ///
    /// Pure: performs no I/O.
    pub fn build(
        settings: &Settings,
        identity: &RuntimeIdentity,
    ) -> Result<CompilerCacheKey, BootstrapError> {
        Self::check(settings, identity)?;

        let mut hasher = Sha256::new();
        field(&mut hasher, "format", KEY_FORMAT_VERSION);
        field(&mut hasher, "bridge-src", &settings.compiler_bridge_src.digest);
        field(&mut hasher, "interface", &settings.compiler_interface.digest);

        field(&mut hasher, "runtime-version", &identity.version);
        for flag in &identity.abi_flags {
            field(&mut hasher, "abi-flag", flag);
        }
        for (role, digest) in &identity.jars {
            field(&mut hasher, role, digest);
        }

        match &settings.build.strategy {
            BuildStrategy::Compile => {
                field(&mut hasher, "strategy", "compile");
                for option in &settings.build.compiler_options {
                    field(&mut hasher, "compiler-option", option);
                }
            }
            BuildStrategy::Prebuilt(jar) => {
                field(&mut hasher, "strategy", "prebuilt");
                field(&mut hasher, "prebuilt", &jar.digest);
            }
        }

        let hash = hex::encode(hasher.finalize());
        Ok(CompilerCacheKey(format!(
            "bridge-{}-{}",
            sanitize(&identity.version),
            &hash[..KEY_HASH_LEN]
        )))
    }

    fn check(settings: &Settings, identity: &RuntimeIdentity) -> Result<(), BootstrapError> {
        let invalid = |msg: String| Err(BootstrapError::InvalidConfiguration(msg));

        if identity.version.trim().is_empty() {
            return invalid("compiler runtime has no version".to_string());
        }
        if identity.version != settings.scala.version {
            return invalid(format!(
                "compiler runtime {} does not match --scala-version {}",
                identity.version, settings.scala.version
            ));
        }
        if identity.jars.is_empty() || identity.jars.iter().any(|(_, d)| d.is_empty()) {
            return invalid("compiler runtime jars are not fingerprinted".to_string());
        }
        if settings.compiler_bridge_src.digest.is_empty()
            || settings.compiler_interface.digest.is_empty()
        {
            return invalid("bridge inputs are not fingerprinted".to_string());
        }
        if let BuildStrategy::Prebuilt(jar) = &settings.build.strategy {
            if jar.digest.is_empty() {
                return invalid("prebuilt bridge is not fingerprinted".to_string());
            }
        }

        Ok(())
    }
}

/// Hash a labelled, NUL-delimited field so adjacent values cannot collide
fn field(hasher: &mut Sha256, label: &str, value: &str) {
    hasher.update(label.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    hasher.update([0u8]);
}

fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

//! CLI configuration, read from a TOML file and overridden by flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use chronicle::LedgerConfig;
use chronicle_core::Keypair;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "chronicle.toml";

pub const DEFAULT_DATABASE: &str = "chronicle.db";

/// Contents of `chronicle.toml`.
///
/// ```toml
/// database = "/var/lib/chronicle/audit.db"
/// signing_key = "9d61b19d..."   # hex ed25519 seed, optional
///
/// [ledger]
/// page_size = 500
///
/// [ledger.retry]
/// max_retries = 5
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub database: PathBuf,

    /// Hex-encoded 32-byte seed of the export signing key.
    pub signing_key: Option<String>,

    pub ledger: LedgerConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            signing_key: None,
            ledger: LedgerConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if present.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !path.exists() {
            if required {
                bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::parse(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.ledger.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, database: Option<PathBuf>, signing_key: Option<String>) -> Self {
        if let Some(db) = database {
            self.database = db;
        }
        if signing_key.is_some() {
            self.signing_key = signing_key;
        }
        self
    }

    pub fn keypair(&self) -> Result<Option<Keypair>> {
        self.signing_key
            .as_deref()
            .map(|hex| Keypair::from_seed_hex(hex).context("invalid signing_key"))
            .transpose()
    }
}

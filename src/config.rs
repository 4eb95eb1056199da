//! `tpuprof.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{TpuProfError, TpuProfResult};

/// How `tiu_dma_id(before)` / `tiu_dma_id(after)` counters map onto instruction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdRangeConvention {
    /// `[before, after)`
    Raw,
    /// `[before + 1, after + 1)`
    #[default]
    Offset,
}

impl IdRangeConvention {
    pub fn range(self, before: i64, after: i64) -> std::ops::Range<i64> {
        match self {
            Self::Raw => before..after,
            Self::Offset => before.saturating_add(1)..after.saturating_add(1),
        }
    }
}

impl clap::ValueEnum for IdRangeConvention {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Offset, Self::Raw]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Raw => clap::builder::PossibleValue::new("raw"),
            Self::Offset => clap::builder::PossibleValue::new("offset"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Id-range numbering used by the op graph.
    #[serde(default)]
    pub id_range: IdRangeConvention,

    /// Bank size used when the log has no `lmem_spec` chip section.
    #[serde(default = "default_fallback_bank_bytes")]
    pub fallback_bank_bytes: i64,

    #[serde(default = "default_log_glob")]
    pub log_glob: String,

    #[serde(default = "default_opgraph_glob")]
    pub opgraph_glob: String,

    #[serde(default = "default_profile_glob")]
    pub profile_glob: String,

    /// Write `core_<n>.csv` next to `result.json`.
    #[serde(default = "default_csv")]
    pub csv: bool,
}

fn default_fallback_bank_bytes() -> i64 {
    16 * 1024
}

fn default_log_glob() -> String {
    "*.log".to_string()
}

fn default_opgraph_glob() -> String {
    "*.bmodel.json".to_string()
}

fn default_profile_glob() -> String {
    "compiler_profile_*".to_string()
}

fn default_csv() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_range: IdRangeConvention::default(),
            fallback_bank_bytes: default_fallback_bank_bytes(),
            log_glob: default_log_glob(),
            opgraph_glob: default_opgraph_glob(),
            profile_glob: default_profile_glob(),
            csv: default_csv(),
        }
    }
}

impl Config {
    /// Strict load: unreadable, unparseable or inconsistent files are errors.
    pub fn load(path: &Path) -> TpuProfResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        if cfg.fallback_bank_bytes <= 0 {
            return Err(TpuProfError::Config(format!(
                "fallback_bank_bytes must be positive, got {}",
                cfg.fallback_bank_bytes
            )));
        }
        Ok(cfg)
    }

    pub fn load_optional(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(TpuProfError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("ignoring config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Bank size to use for `bank_id`, preferring the chip section when it carries one.
    pub fn bank_bytes(&self, chip: Option<&crate::ChipSpec>) -> i64 {
        chip.and_then(|c| c.lmem_bank_bytes)
            .filter(|b| *b > 0)
            .unwrap_or(self.fallback_bank_bytes)
    }
}

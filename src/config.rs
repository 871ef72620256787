use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::LocusError;
use crate::layout::LocusLayout;

pub const CONFIG_FILE: &str = "locus.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub layout: Option<LayoutEntry>,
    #[serde(default)]
    pub cache_directory: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LayoutEntry {
    #[serde(default)]
    pub chrom: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub locus_column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub layout: LocusLayout,
    pub cache_directory: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LocusError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| LocusError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LocusError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LocusError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(LocusError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let defaults = LocusLayout::default();
        let layout = match config.layout {
            None => defaults,
            Some(entry) => LocusLayout {
                chrom: entry.chrom.unwrap_or(defaults.chrom),
                start: entry.start.unwrap_or(defaults.start),
                end: entry.end.unwrap_or(defaults.end),
                locus_column: entry.locus_column.unwrap_or(defaults.locus_column),
            },
        };

        let cache_directory = match config.cache_directory {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_directory()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            layout,
            cache_directory,
        })
    }
}

pub fn default_cache_directory() -> Result<Utf8PathBuf, LocusError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("locus")).ok()
        })
        .ok_or_else(|| LocusError::Filesystem("unable to resolve cache directory".to_string()))
}

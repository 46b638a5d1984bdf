// Copyright 2025 egafetch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loads `egafetch.toml` (if present) and layers CLI flags on top of it to
//! produce the `EngineConfig` an invocation actually runs with. File values
//! set the baseline; any flag the user passed on the command line wins.

use std::path::{Path, PathBuf};

use egafetch_base::ReadableSize;
use egafetch_engine::EngineConfig;
use serde::Deserialize;
use snafu::{OptionExt as _, ResultExt as _, Snafu};

/// On-disk configuration file, every field optional so a user only needs
/// to override what they care about.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub job_root:          Option<PathBuf>,
    pub parallel_files:    Option<usize>,
    pub parallel_chunks:   Option<usize>,
    pub chunk_size:        Option<String>,
    pub max_bandwidth:     Option<String>,
    pub adaptive_chunks:   Option<bool>,
    pub max_chunk_retries: Option<usize>,
    pub max_file_retries:  Option<usize>,
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("could not read config file {}: {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("could not parse config file {}: {source}", path.display()))]
    Parse { path: PathBuf, source: toml::de::Error },

    #[snafu(display("invalid size in config file: {source}"))]
    Size { source: egafetch_base::readable_size::ParseReadableSizeError },
}

impl FileConfig {
    /// Reads and parses a TOML config file. Missing files are treated as an
    /// empty config rather than an error, since the default config path is
    /// probed speculatively.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).context(ParseSnafu { path }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// The platform config directory's `egafetch/config.toml`, if the
    /// platform exposes one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> { dirs::config_dir().map(|dir| dir.join("egafetch").join("config.toml")) }
}

/// CLI-flag overrides, each `None` meaning "use the file value / engine
/// default". Populated straight from `clap::Args`.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub job_root:          Option<PathBuf>,
    pub parallel_files:    Option<usize>,
    pub parallel_chunks:   Option<usize>,
    pub chunk_size:        Option<ReadableSize>,
    pub max_bandwidth:     Option<ReadableSize>,
    pub adaptive_chunks:   bool,
    pub restart:           bool,
    pub max_chunk_retries: Option<usize>,
    pub max_file_retries:  Option<usize>,
}

/// Merges a file config and CLI overrides into a runnable `EngineConfig`,
/// with CLI flags winning over file values, and file values winning over
/// engine defaults.
pub fn build_engine_config(file: &FileConfig, cli: &CliOverrides) -> Result<EngineConfig, ConfigError> {
    let mut builder = EngineConfig::builder();

    if let Some(job_root) = cli.job_root.clone().or_else(|| file.job_root.clone()) {
        builder = builder.job_root(job_root);
    }
    if let Some(n) = cli.parallel_files.or(file.parallel_files) {
        builder = builder.parallel_files(n);
    }
    if let Some(n) = cli.parallel_chunks.or(file.parallel_chunks) {
        builder = builder.parallel_chunks(n);
    }

    let chunk_size = match (cli.chunk_size, file.chunk_size.as_deref()) {
        (Some(size), _) => Some(size),
        (None, Some(raw)) => Some(raw.parse::<ReadableSize>().context(SizeSnafu)?),
        (None, None) => None,
    };
    if let Some(size) = chunk_size {
        builder = builder.chunk_size(size);
    }

    let max_bandwidth = match (cli.max_bandwidth, file.max_bandwidth.as_deref()) {
        (Some(size), _) => Some(size),
        (None, Some(raw)) => Some(raw.parse::<ReadableSize>().context(SizeSnafu)?),
        (None, None) => None,
    };
    if let Some(size) = max_bandwidth {
        builder = builder.max_bandwidth(size);
    }

    if cli.adaptive_chunks || file.adaptive_chunks.unwrap_or(false) {
        builder = builder.adaptive_chunks(true);
    }
    if cli.restart {
        builder = builder.restart(true);
    }
    if let Some(n) = cli.max_chunk_retries.or(file.max_chunk_retries) {
        builder = builder.max_chunk_retries(n);
    }
    if let Some(n) = cli.max_file_retries.or(file.max_file_retries) {
        builder = builder.max_file_retries(n);
    }

    Ok(builder.build())
}

/// Convenience used by tests and `main`: pulls a missing field's source
/// path out of an `Option` the way `load` expects a caller to.
#[must_use]
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> { explicit.or_else(FileConfig::default_path) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_fill_in_defaults() {
        let file = FileConfig {
            parallel_files: Some(2),
            chunk_size: Some("16M".to_string()),
            ..FileConfig::default()
        };
        let config = build_engine_config(&file, &CliOverrides::default()).unwrap();
        assert_eq!(config.parallel_files, 2);
        assert_eq!(config.chunk_size, ReadableSize::mb(16));
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let file = FileConfig {
            parallel_files: Some(2),
            ..FileConfig::default()
        };
        let cli = CliOverrides {
            parallel_files: Some(9),
            ..CliOverrides::default()
        };
        let config = build_engine_config(&file, &cli).unwrap();
        assert_eq!(config.parallel_files, 9);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(&dir.path().join("does-not-exist.toml")).unwrap();
        assert!(config.job_root.is_none());
    }

    #[test]
    fn invalid_size_string_is_reported() {
        let file = FileConfig {
            chunk_size: Some("not-a-size".to_string()),
            ..FileConfig::default()
        };
        assert!(build_engine_config(&file, &CliOverrides::default()).is_err());
    }
}

use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use glob::Pattern;

use crate::error::ConfigError;

/// Ingest PGN game collections into DuckDB.
///
/// Every option can also be supplied through the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "chess-ingest", version, about)]
pub struct Config {
    /// DuckDB database file, or `:memory:`.
    #[arg(long, env = "DATABASE_URL", default_value = "chess.duckdb")]
    pub database_url: String,

    /// Schema the tables are created in.
    #[arg(long, env = "DATABASE_NAME", default_value = "main")]
    pub database_name: String,

    /// Table for files that sit directly under the root.
    #[arg(long, env = "TABLE_NAME", default_value = "games")]
    pub table: String,

    /// Root directory; each subdirectory becomes its own table.
    #[arg(long, env = "FOLDER_PATH")]
    pub folder_path: PathBuf,

    /// Directories processed at the same time.
    #[arg(long, env = "DIR_WORKERS", default_value_t = 3)]
    pub dir_workers: usize,

    /// File workers per directory.
    #[arg(long, env = "FILE_WORKERS", default_value_t = 8)]
    pub file_workers: usize,

    #[arg(long, env = "DIR_QUEUE_CAPACITY", default_value_t = 10)]
    pub dir_queue: usize,

    #[arg(long, env = "FILE_QUEUE_CAPACITY", default_value_t = 100)]
    pub file_queue: usize,

    /// Do not replay moves into position keys.
    #[arg(long, env = "SKIP_POSITIONS")]
    pub skip_positions: bool,

    /// Prefix stripped from the Site tag to form the external id. Empty disables ids.
    #[arg(long, env = "SITE_PREFIX", default_value = DEFAULT_SITE_PREFIX)]
    pub site_prefix: String,

    /// Only ingest files whose name matches this glob (e.g. `*.pgn`).
    #[arg(long, env = "INCLUDE_GLOB")]
    pub include: Option<String>,

    /// Extra attempts for a failed insert, with doubling backoff.
    #[arg(long, env = "INSERT_RETRIES", default_value_t = 0)]
    pub insert_retries: u32,
}

/// Knobs shared by every directory pool of one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub file_workers: usize,
    pub file_queue: usize,
    pub with_positions: bool,
    pub site_prefix: Option<String>,
    pub include: Option<Pattern>,
    pub insert_retries: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            file_workers: 8,
            file_queue: 100,
            with_positions: true,
            site_prefix: Some(DEFAULT_SITE_PREFIX.to_string()),
            include: None,
            insert_retries: 0,
        }
    }
}

pub const DEFAULT_SITE_PREFIX: &str = "https://lichess.org/";

impl Config {
    /// Check bounds and identifiers before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dir-workers", self.dir_workers),
            ("file-workers", self.file_workers),
            ("dir-queue", self.dir_queue),
            ("file-queue", self.file_queue),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroBound { name, value });
            }
        }

        if !is_identifier(&self.database_name) {
            return Err(ConfigError::SchemaName {
                raw: self.database_name.clone(),
            });
        }
        TableName::from_dir_name(&self.table)?;
        self.include_pattern()?;
        Ok(())
    }

    pub fn include_pattern(&self) -> Result<Option<Pattern>, ConfigError> {
        self.include
            .as_deref()
            .map(|raw| {
                Pattern::new(raw).map_err(|source| ConfigError::Include {
                    pattern: raw.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions, ConfigError> {
        let prefix = self.site_prefix.trim();
        Ok(PipelineOptions {
            file_workers: self.file_workers,
            file_queue: self.file_queue,
            with_positions: !self.skip_positions,
            site_prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            include: self.include_pattern()?,
            insert_retries: self.insert_retries,
        })
    }
}

/// A validated DuckDB table identifier derived from a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Characters outside `[A-Za-z0-9_]` become `_`; a leading digit gets a `_` prefix.
    pub fn from_dir_name(raw: &str) -> Result<Self, ConfigError> {
        let mut name: String = raw
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        if name.is_empty() || name.chars().all(|c| c == '_') {
            return Err(ConfigError::TableName {
                raw: raw.to_string(),
            });
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            name.insert(0, '_');
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from(["chess-ingest", "--folder-path", "/data/games"])
    }

    #[test]
    fn test_table_name_replaces_dashes() {
        let table = TableName::from_dir_name("lichess-2024-01").unwrap();
        assert_eq!(table.as_str(), "lichess_2024_01");
    }

    #[test]
    fn test_table_name_replaces_other_punctuation() {
        let table = TableName::from_dir_name("blitz games.v2").unwrap();
        assert_eq!(table.as_str(), "blitz_games_v2");
    }

    #[test]
    fn test_table_name_leading_digit_is_prefixed() {
        let table = TableName::from_dir_name("2024-02").unwrap();
        assert_eq!(table.as_str(), "_2024_02");
    }

    #[test]
    fn test_table_name_rejects_empty_and_punctuation_only() {
        assert!(TableName::from_dir_name("").is_err());
        assert!(TableName::from_dir_name("---").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = base_config();
        assert_eq!(config.dir_workers, 3);
        assert_eq!(config.file_workers, 8);
        assert_eq!(config.dir_queue, 10);
        assert_eq!(config.file_queue, 100);
        assert_eq!(config.site_prefix, DEFAULT_SITE_PREFIX);
        assert!(!config.skip_positions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = base_config();
        config.file_workers = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("file-workers"));
    }

    #[test]
    fn test_validate_rejects_bad_schema() {
        let mut config = base_config();
        config.database_name = "my-db".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SchemaName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_include_glob() {
        let mut config = base_config();
        config.include = Some("[*.pgn".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Include { .. })));
    }

    #[test]
    fn test_empty_site_prefix_disables_external_ids() {
        let mut config = base_config();
        config.site_prefix = "  ".to_string();
        let options = config.pipeline_options().unwrap();
        assert!(options.site_prefix.is_none());
    }
}

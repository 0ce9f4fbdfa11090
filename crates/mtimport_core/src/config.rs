use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "mtimport/0.2";
pub const DEFAULT_SLUG_SEPARATOR: &str = "-";
pub const DEFAULT_CONTENT_WIDTH: u32 = 550;
pub const DEFAULT_CONTENT_WIDTH_UPSCALE: u32 = 500;
pub const DEFAULT_UTC_OFFSET: &str = "+00:00";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ImporterConfig {
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub wordpress: WordPressSection,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ImportSection {
    pub slug_separator: Option<String>,
    pub autosizing: Option<bool>,
    pub content_width: Option<u32>,
    pub content_width_upscale: Option<u32>,
    pub placement_policy: Option<PlacementPolicy>,
    pub import_trackbacks: Option<bool>,
    pub utc_offset: Option<String>,
    pub staging_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WordPressSection {
    pub default_host: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HostSection {
    pub url: Option<String>,
    pub upload_dir: Option<String>,
    pub upload_url: Option<String>,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSection>,
}

/// Per-blog overrides inside a multisite host.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub url: Option<String>,
    pub upload_dir: Option<String>,
    pub upload_url: Option<String>,
}

/// How a `<placement>` assigns its category to a post.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    /// Append to the post's categories unless the post only carries the
    /// default "Uncategorized" term (or none), in which case replace.
    #[default]
    AppendUnlessUncategorized,
    /// Always replace the post's categories with the placed one.
    Replace,
}

impl PlacementPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppendUnlessUncategorized => "append-unless-uncategorized",
            Self::Replace => "replace",
        }
    }
}

/// Knobs that shape how entities and post bodies are transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub slug_separator: String,
    pub autosizing: bool,
    pub content_width: u32,
    pub content_width_upscale: u32,
    pub placement_policy: PlacementPolicy,
    pub import_trackbacks: bool,
    pub utc_offset: FixedOffset,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            slug_separator: DEFAULT_SLUG_SEPARATOR.to_string(),
            autosizing: false,
            content_width: DEFAULT_CONTENT_WIDTH,
            content_width_upscale: DEFAULT_CONTENT_WIDTH_UPSCALE,
            placement_policy: PlacementPolicy::default(),
            import_trackbacks: false,
            utc_offset: Utc.fix(),
        }
    }
}

impl ImporterConfig {
    pub fn import_options(&self) -> Result<ImportOptions> {
        let defaults = ImportOptions::default();
        let section = &self.import;
        let utc_offset = match section.utc_offset.as_deref() {
            Some(value) => parse_utc_offset(value)?,
            None => defaults.utc_offset,
        };
        let slug_separator = section
            .slug_separator
            .clone()
            .unwrap_or(defaults.slug_separator);
        Ok(ImportOptions {
            slug_separator,
            autosizing: section.autosizing.unwrap_or(defaults.autosizing),
            content_width: section.content_width.unwrap_or(defaults.content_width),
            content_width_upscale: section
                .content_width_upscale
                .unwrap_or(defaults.content_width_upscale),
            placement_policy: section
                .placement_policy
                .unwrap_or(defaults.placement_policy),
            import_trackbacks: section
                .import_trackbacks
                .unwrap_or(defaults.import_trackbacks),
            utc_offset,
        })
    }

    /// Resolve user agent: env WP_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_trimmed("WP_USER_AGENT") {
            return value;
        }
        self.wordpress
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_trimmed("WP_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.wordpress.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn retries(&self) -> usize {
        env_trimmed("WP_HTTP_RETRIES")
            .and_then(|value| value.parse::<usize>().ok())
            .or(self.wordpress.retries)
            .unwrap_or(DEFAULT_RETRIES)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.wordpress
            .retry_delay_ms
            .unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    pub fn rate_limit_ms(&self) -> u64 {
        self.wordpress.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }
}

/// Load and parse an ImporterConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ImporterConfig> {
    if !config_path.exists() {
        return Ok(ImporterConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ImporterConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Parse an offset such as `+02:00` or `-0530`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
        return Ok(Utc.fix());
    }
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => bail!("invalid utc_offset `{trimmed}` (expected e.g. +02:00)"),
    };
    let digits = rest.replace(':', "");
    if digits.len() != 4 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        bail!("invalid utc_offset `{trimmed}` (expected e.g. +02:00)");
    }
    let hours: i32 = digits[..2].parse().context("invalid utc_offset hours")?;
    let minutes: i32 = digits[2..].parse().context("invalid utc_offset minutes")?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("utc_offset `{trimmed}` is out of range"))
}

fn env_trimmed(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/mtimport.toml")).expect("load config");
        assert!(config.hosts.is_empty());
        assert_eq!(config.import_options().expect("options"), ImportOptions::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("mtimport.toml");
        fs::write(
            &config_path,
            r#"
[import]
slug_separator = "_"
autosizing = true
content_width = 640
placement_policy = "replace"
utc_offset = "+02:00"

[wordpress]
default_host = "wp_trunk"
user_agent = "test-agent/1.0"

[hosts.wp_trunk]
url = "https://new.example"
upload_dir = "/srv/uploads"
upload_url = "https://new.example/uploads/"

[hosts.wp_trunk.sites.4]
url = "https://new.example/news"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let options = config.import_options().expect("options");
        assert_eq!(options.slug_separator, "_");
        assert!(options.autosizing);
        assert_eq!(options.content_width, 640);
        assert_eq!(options.content_width_upscale, DEFAULT_CONTENT_WIDTH_UPSCALE);
        assert_eq!(options.placement_policy, PlacementPolicy::Replace);
        assert_eq!(options.utc_offset.local_minus_utc(), 2 * 3600);
        assert_eq!(config.wordpress.default_host.as_deref(), Some("wp_trunk"));
        let host = config.hosts.get("wp_trunk").expect("host");
        assert_eq!(host.url.as_deref(), Some("https://new.example"));
        assert_eq!(
            host.sites.get("4").and_then(|site| site.url.as_deref()),
            Some("https://new.example/news")
        );
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("mtimport.toml");
        fs::write(&config_path, "[import\nslug_separator = \"-\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn invalid_utc_offset_is_rejected() {
        let config = ImporterConfig {
            import: ImportSection {
                utc_offset: Some("two hours".to_string()),
                ..ImportSection::default()
            },
            ..ImporterConfig::default()
        };
        assert!(config.import_options().is_err());
    }

    #[test]
    fn utc_offset_accepts_utc_alias() {
        assert_eq!(parse_utc_offset("UTC").expect("utc").local_minus_utc(), 0);
        assert_eq!(
            parse_utc_offset("-05:30").expect("offset").local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
    }
}

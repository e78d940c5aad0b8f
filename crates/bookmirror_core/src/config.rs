use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::hierarchy::DEFAULT_FORBIDDEN_CHARS;

pub const DEFAULT_USER_AGENT: &str = "bookmirror/0.2";
pub const DEFAULT_HOST: &str = "https://localhost";
pub const DEFAULT_TOKEN_FILE: &str = "token.txt";
pub const DEFAULT_RATE_LIMIT: usize = 180;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IMAGES_DIR: &str = "images";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Plaintext,
    Pdf,
    Html,
    Zip,
}

impl ExportFormat {
    pub const ALL: [Self; 5] = [
        Self::Markdown,
        Self::Plaintext,
        Self::Pdf,
        Self::Html,
        Self::Zip,
    ];

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unsupported export format: {value} (expected markdown|plaintext|pdf|html|zip)"
                )
            })
    }

    /// Format name as used by the remote export endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Plaintext => "plaintext",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Zip => "zip",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Plaintext => "txt",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportLevel {
    Pages,
    Chapters,
    Books,
}

impl ExportLevel {
    pub const ALL: [Self; 3] = [Self::Pages, Self::Chapters, Self::Books];

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!("unsupported export level: {value} (expected pages|chapters|books)")
            })
    }

    /// API path segment of the level's export endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Chapters => "chapters",
            Self::Books => "books",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteSection {
    pub host: Option<String>,
    pub token_file: Option<PathBuf>,
    pub rate_limit: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExportSection {
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub formats: Vec<ExportFormat>,
    #[serde(default)]
    pub levels: Vec<ExportLevel>,
    #[serde(default)]
    pub force: bool,
    pub forbidden_chars: Option<String>,
    #[serde(default)]
    pub attachments: bool,
    #[serde(default)]
    pub images: bool,
    pub external_attachments: Option<bool>,
    #[serde(default)]
    pub skip_broken_links: bool,
    pub images_dir: Option<String>,
    #[serde(default)]
    pub markdown_images: bool,
}

impl MirrorConfig {
    /// Resolve the wiki host: env BOOKSTACK_HOST > config > DEFAULT_HOST.
    /// Trailing slashes are dropped.
    pub fn host(&self) -> String {
        let host = env_override("BOOKSTACK_HOST")
            .or_else(|| self.remote.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        host.trim_end_matches('/').to_string()
    }

    /// Resolve the token file relative to `base` when configured as relative.
    pub fn token_file(&self, base: &Path) -> PathBuf {
        let configured = self
            .remote
            .token_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));
        if configured.is_absolute() {
            configured
        } else {
            base.join(configured)
        }
    }

    /// Resolve the rate limit: env BOOKMIRROR_RATE_LIMIT > config > default.
    pub fn rate_limit(&self) -> usize {
        env_override("BOOKMIRROR_RATE_LIMIT")
            .and_then(|value| value.parse::<usize>().ok())
            .or(self.remote.rate_limit)
            .unwrap_or(DEFAULT_RATE_LIMIT)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.remote.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn user_agent(&self) -> String {
        self.remote
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn formats(&self) -> Vec<ExportFormat> {
        if self.export.formats.is_empty() {
            vec![ExportFormat::Markdown]
        } else {
            dedupe(&self.export.formats)
        }
    }

    pub fn levels(&self) -> Vec<ExportLevel> {
        if self.export.levels.is_empty() {
            vec![ExportLevel::Pages]
        } else {
            dedupe(&self.export.levels)
        }
    }

    pub fn forbidden_chars(&self) -> Vec<char> {
        match &self.export.forbidden_chars {
            Some(value) => value.chars().collect(),
            None => DEFAULT_FORBIDDEN_CHARS.to_vec(),
        }
    }

    pub fn images_dir(&self) -> String {
        self.export
            .images_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGES_DIR.to_string())
    }

    pub fn external_attachments(&self) -> bool {
        self.export.external_attachments.unwrap_or(true)
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Read the API token. BOOKSTACK_TOKEN wins over the token file, whose first
/// line must hold `TOKEN_ID:TOKEN_SECRET`.
pub fn load_token(token_path: &Path) -> Result<String> {
    if let Some(token) = env_override("BOOKSTACK_TOKEN") {
        return Ok(token);
    }
    let content = fs::read_to_string(token_path)
        .with_context(|| format!("failed to read token file {}", token_path.display()))?;
    let token = content.lines().next().unwrap_or("").trim().to_string();
    if token.is_empty() {
        bail!("token file {} is empty", token_path.display());
    }
    if !token.contains(':') {
        bail!(
            "token in {} must have the form TOKEN_ID:TOKEN_SECRET",
            token_path.display()
        );
    }
    Ok(token)
}

/// Parse `Name: value` header arguments.
pub fn parse_header(value: &str) -> Result<(String, String)> {
    let Some((name, header_value)) = value.split_once(':') else {
        bail!("invalid header `{value}` (expected `Name: value`)");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header `{value}`: empty name");
    }
    Ok((name.to_string(), header_value.trim().to_string()))
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn dedupe<T: Copy + PartialEq>(values: &[T]) -> Vec<T> {
    let mut output = Vec::with_capacity(values.len());
    for value in values {
        if !output.contains(value) {
            output.push(*value);
        }
    }
    output
}

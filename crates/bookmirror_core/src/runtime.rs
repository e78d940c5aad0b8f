use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::config::MirrorConfig;

pub const DEFAULT_CONFIG_FILENAME: &str = "bookmirror.toml";
pub const ORPHANED_ATTACHMENTS_DIR: &str = "orphaned_attachments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub output_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    pub images_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub output_root: PathBuf,
    pub images_dir: PathBuf,
    pub orphaned_attachments_dir: PathBuf,
    pub config_path: PathBuf,
    pub token_path: PathBuf,
    pub output_source: ValueSource,
    pub config_source: ValueSource,
    pub token_source: ValueSource,
}

impl ResolvedPaths {
    /// Paths rooted at `output_root` with default sources; used when the
    /// caller already knows where to write.
    pub fn for_output_root(output_root: &Path, images_dir: &str) -> Self {
        Self {
            output_root: output_root.to_path_buf(),
            images_dir: output_root.join(images_dir),
            orphaned_attachments_dir: output_root.join(ORPHANED_ATTACHMENTS_DIR),
            config_path: output_root.join(DEFAULT_CONFIG_FILENAME),
            token_path: output_root.join(crate::config::DEFAULT_TOKEN_FILE),
            output_source: ValueSource::Default,
            config_source: ValueSource::Default,
            token_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "output_root={} ({})\nimages_dir={}\norphaned_attachments_dir={}\nconfig_path={} ({})\ntoken_path={} ({})",
            normalize_for_display(&self.output_root),
            self.output_source.as_str(),
            normalize_for_display(&self.images_dir),
            normalize_for_display(&self.orphaned_attachments_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.token_path),
            self.token_source.as_str(),
        )
    }
}

/// Locate the config file: flag > BOOKMIRROR_CONFIG > `./bookmirror.toml`.
pub fn resolve_config_path(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> (PathBuf, ValueSource) {
    resolve_config_path_with_lookup(context, overrides, |key| env::var(key).ok())
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MirrorConfig,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, config, |key| env::var(key).ok())
}

fn resolve_config_path_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.config.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = non_empty(lookup_env("BOOKMIRROR_CONFIG")) {
        return (
            absolutize(Path::new(&value), &context.cwd),
            ValueSource::Env,
        );
    }
    (
        context.cwd.join(DEFAULT_CONFIG_FILENAME),
        ValueSource::Default,
    )
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MirrorConfig,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) =
        resolve_config_path_with_lookup(context, overrides, &lookup_env);

    let (output_root, output_source) = if let Some(path) = overrides.output_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("BOOKMIRROR_PATH")) {
        (
            absolutize(Path::new(&value), &context.cwd),
            ValueSource::Env,
        )
    } else if let Some(path) = config.export.path.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let (token_path, token_source) = if let Some(path) = overrides.token_file.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("BOOKMIRROR_TOKEN_FILE")) {
        (
            absolutize(Path::new(&value), &context.cwd),
            ValueSource::Env,
        )
    } else if config.remote.token_file.is_some() {
        (config.token_file(&context.cwd), ValueSource::Config)
    } else {
        (config.token_file(&context.cwd), ValueSource::Default)
    };

    let images_dir_name = overrides
        .images_dir
        .clone()
        .unwrap_or_else(|| config.images_dir());

    Ok(ResolvedPaths {
        images_dir: output_root.join(&images_dir_name),
        orphaned_attachments_dir: output_root.join(ORPHANED_ATTACHMENTS_DIR),
        output_root,
        config_path,
        token_path,
        output_source,
        config_source,
        token_source,
    })
}

/// Create `path` and any missing parents. Returns `true` when something was
/// created.
pub fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    info!("Creating dir {}", normalize_for_display(path));
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(true)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

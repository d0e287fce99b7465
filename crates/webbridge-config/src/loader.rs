use crate::schema::WebbridgeConfig;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Jsonc,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "jsonc" => Some(Self::Jsonc),
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: WebbridgeConfig,
    pub path: PathBuf,
    pub format: ConfigFormat,
}

/// Load the configuration. An explicit path must exist; without one the
/// candidate files are searched and defaults apply when none is found.
pub fn load_config(config_path: Option<&Path>) -> Result<WebbridgeConfig> {
    match config_path {
        Some(path) => load_config_from_file(path).map(|r| r.config),
        None => match find_config_file() {
            Some(path) => load_config_from_file(&path).map(|r| r.config),
            None => Ok(WebbridgeConfig::default()),
        },
    }
}

pub fn resolve_config(config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .or_else(find_config_file)
        .ok_or_else(|| anyhow!("No configuration file found"))?;

    load_config_from_file(&path)
}

pub fn load_config_from_file(path: &Path) -> Result<ResolvedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unknown config format for: {}", path.display()))?;

    let config = parse_config_content(&content, format)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(ResolvedConfig {
        config: expand_env_vars(config),
        path: path.to_path_buf(),
        format,
    })
}

fn parse_config_content(content: &str, format: ConfigFormat) -> Result<WebbridgeConfig> {
    match format {
        ConfigFormat::Jsonc => json5::from_str(content).context("Failed to parse JSONC"),
        ConfigFormat::Json => serde_json::from_str(content).context("Failed to parse JSON"),
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).context("Failed to parse YAML"),
    }
}

const CONFIG_CANDIDATES: &[&str] = &[
    "webbridge.jsonc",
    "webbridge.json",
    "webbridge.yml",
    "webbridge.yaml",
    ".webbridge.jsonc",
    ".webbridge.json",
    ".webbridge.yml",
    ".webbridge.yaml",
];

/// First candidate in the working directory, then in `~/.config/webbridge/`.
pub fn find_config_file() -> Option<PathBuf> {
    find_config_in(Path::new("."))
        .or_else(|| dirs::home_dir().and_then(|home| find_config_in(&home.join(".config").join("webbridge"))))
}

fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|candidate| dir.join(candidate))
        .find(|path| path.exists())
}

fn expand_env_vars(mut config: WebbridgeConfig) -> WebbridgeConfig {
    config.server.host = expand_env_string(&config.server.host);

    config.browser.executable = config.browser.executable.as_deref().map(expand_env_string);
    config.browser.user_data_dir = expand_env_string(&config.browser.user_data_dir);
    config.browser.screenshot_dir = expand_env_string(&config.browser.screenshot_dir);

    config.claude.url = expand_env_string(&config.claude.url);
    config.copilot.url = expand_env_string(&config.copilot.url);

    config.login.command = config.login.command.as_deref().map(expand_env_string);
    config.login.args = config
        .login
        .args
        .iter()
        .map(|arg| expand_env_string(arg))
        .collect();
    config.login.cookie_dir = expand_env_string(&config.login.cookie_dir);

    config
}

fn expand_env_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            match env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                    result.push('}');
                }
            }
            continue;
        }

        // $VAR stops at the first character that cannot be part of a name
        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                var_name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if var_name.is_empty() {
            result.push('$');
        } else if let Ok(value) = env::var(&var_name) {
            result.push_str(&value);
        } else {
            result.push('$');
            result.push_str(&var_name);
        }
    }

    result
}

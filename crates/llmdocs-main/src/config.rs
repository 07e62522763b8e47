use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use llmdocs_ai::{Connection, ConnectionKind};
use llmdocs_doc::DocDefaults;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "llmdocs.toml";
const DEFAULT_CONF_DIR_NAME: &str = ".llmdocs";
const DEFAULT_DOCS_DIR: &str = "LLM";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FILE_NAME: &str = "llmdocs.log";
const DEFAULT_LOG_ROTATE_SIZE_MB: u64 = 20;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmDocsConfig {
    pub conf_dir: PathBuf,
    /// Root that `[[links]]` resolve against.
    pub vault_dir: PathBuf,
    /// Where `new` creates documents.
    pub docs_dir: PathBuf,
    pub connections: Vec<Connection>,
    pub defaults: DocDefaults,
    pub pinned_models: BTreeSet<String>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub file_path: PathBuf,
    pub level: String,
    pub rotate_size_bytes: u64,
    pub stderr: bool,
}

#[derive(Debug, Deserialize, Default)]
struct LlmDocsTomlFile {
    #[serde(default)]
    vault_dir: Option<String>,
    #[serde(default)]
    docs_dir: Option<String>,
    #[serde(default)]
    connections: Vec<LlmDocsTomlConnection>,
    #[serde(default)]
    defaults: LlmDocsTomlDefaults,
    #[serde(default)]
    pinned_models: Vec<String>,
    #[serde(default)]
    log: LlmDocsTomlLog,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LlmDocsTomlConnection {
    #[serde(default)]
    kind: Option<String>,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LlmDocsTomlDefaults {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LlmDocsTomlLog {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    rotate_size_mb: Option<u64>,
    #[serde(default)]
    stderr: Option<bool>,
}

/// Resolves the `--conf-dir` argument, falling back to `~/.llmdocs`.
pub fn resolve_conf_dir(conf_dir: Option<&Path>) -> PathBuf {
    conf_dir
        .map(|path| absolutize(&expand_path_with_home(path), &current_dir()))
        .unwrap_or_else(|| home_dir().join(DEFAULT_CONF_DIR_NAME))
}

/// Loads `llmdocs.toml` from `conf_dir`. A missing file yields the defaults.
pub fn load_config(conf_dir: &Path) -> Result<LlmDocsConfig, String> {
    let path = conf_dir.join(CONFIG_FILE_NAME);
    let content = if path.exists() {
        std::fs::read_to_string(&path)
            .map_err(|error| format!("read config {} failed: {error}", path.display()))?
    } else {
        String::new()
    };
    parse_config(&content, conf_dir, &current_dir())
        .map_err(|error| format!("invalid config {}: {error}", path.display()))
}

/// Parses config text. Relative paths resolve against `cwd`, except the log
/// path which defaults into `conf_dir`.
pub fn parse_config(
    content: &str,
    conf_dir: &Path,
    cwd: &Path,
) -> Result<LlmDocsConfig, String> {
    let parsed: LlmDocsTomlFile = toml::from_str(content).map_err(|error| error.to_string())?;
    let env_map = &parsed.env;

    let vault_dir = parsed
        .vault_dir
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .map(|value| absolutize(&expand_path_with_home(Path::new(&value)), cwd))
        .unwrap_or_else(|| cwd.to_path_buf());
    let docs_dir = parsed
        .docs_dir
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_else(|| DEFAULT_DOCS_DIR.to_string());
    let docs_dir = absolutize(&expand_path_with_home(Path::new(&docs_dir)), &vault_dir);

    let connections = parsed
        .connections
        .iter()
        .enumerate()
        .map(|(index, connection)| resolve_connection(index, connection, env_map))
        .collect::<Result<Vec<_>, _>>()?;

    let defaults = DocDefaults {
        model: parsed
            .defaults
            .model
            .as_deref()
            .and_then(|value| resolve_config_value(value, env_map))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        system_prompt: parsed.defaults.system_prompt.clone().unwrap_or_default(),
    };

    let pinned_models = parsed
        .pinned_models
        .iter()
        .map(|model| model.trim())
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .collect();

    Ok(LlmDocsConfig {
        conf_dir: conf_dir.to_path_buf(),
        vault_dir,
        docs_dir,
        connections,
        defaults,
        pinned_models,
        log: build_log_config(&parsed.log, env_map, conf_dir),
    })
}

fn resolve_connection(
    index: usize,
    connection: &LlmDocsTomlConnection,
    env_map: &HashMap<String, String>,
) -> Result<Connection, String> {
    let kind = match connection.kind.as_deref().map(str::trim) {
        None | Some("") => ConnectionKind::OpenAI,
        Some(kind) if kind.eq_ignore_ascii_case("openai") => ConnectionKind::OpenAI,
        Some(other) => {
            return Err(format!(
                "connections[{index}]: unsupported kind '{other}', expected 'OpenAI'"
            ))
        }
    };
    let base_url = resolve_config_value(&connection.base_url, env_map)
        .ok_or_else(|| format!("connections[{index}]: base_url is empty"))?;
    let api_key = connection
        .api_key
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_default();
    Ok(Connection {
        kind,
        base_url,
        api_key,
    })
}

fn build_log_config(
    log: &LlmDocsTomlLog,
    env_map: &HashMap<String, String>,
    conf_dir: &Path,
) -> LogConfig {
    let dir = log
        .path
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .map(|value| absolutize(&expand_path_with_home(Path::new(&value)), conf_dir))
        .unwrap_or_else(|| conf_dir.join("logs"));
    let level = log
        .level
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let rotate_size_mb = log
        .rotate_size_mb
        .unwrap_or(DEFAULT_LOG_ROTATE_SIZE_MB)
        .max(1);

    LogConfig {
        file_path: dir.join(DEFAULT_LOG_FILE_NAME),
        level,
        rotate_size_bytes: rotate_size_mb * 1024 * 1024,
        stderr: log.stderr.unwrap_or(false),
    }
}

/// `$NAME` reads from `[env]`, then the process environment. Blank values
/// count as unset.
fn resolve_config_value(value: &str, env_map: &HashMap<String, String>) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(env_key) = trimmed.strip_prefix('$') {
        return env_map
            .get(env_key)
            .cloned()
            .or_else(|| std::env::var(env_key).ok())
            .filter(|resolved| !resolved.trim().is_empty());
    }
    Some(trimmed.to_string())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn expand_path_with_home(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" {
        return home_dir();
    }
    if let Some(suffix) = raw.strip_prefix("~/") {
        return home_dir().join(suffix);
    }
    path.to_path_buf()
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

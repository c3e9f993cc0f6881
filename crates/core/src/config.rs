use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::Fixture;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// None = 未配置，Some("") = 强制直连，Some(url) = 该 provider 专用代理
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// 显式指定 provider；不指定时从 model 前缀推断
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "glm-4.7".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    #[serde(default = "default_python_path")]
    pub python_path: String,
    /// In-process alarm budget.
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,
    /// Added on top of `timeout_secs` before the process is killed from outside.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_data_root")]
    pub data_root: String,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_python_path() -> String {
    "python3".to_string()
}

fn default_exec_timeout() -> u64 {
    60
}

fn default_kill_grace() -> u64 {
    5
}

fn default_data_root() -> String {
    "/ssd_data/stock".to_string()
}

fn default_max_output_chars() -> usize {
    10000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            python_path: default_python_path(),
            timeout_secs: default_exec_timeout(),
            kill_grace_secs: default_kill_grace(),
            data_root: default_data_root(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploreConfig {
    #[serde(default = "default_variant_count")]
    pub variant_count: usize,
    /// Outer bound on batch generation rounds.
    #[serde(default = "default_generation_attempts")]
    pub generation_attempts: u32,
    /// Per-variant bound on fix calls inside the repair loop.
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,
    /// Bound for the generate-code-from-description flow.
    #[serde(default = "default_code_fix_attempts")]
    pub code_fix_attempts: u32,
    #[serde(default = "default_version_keep")]
    pub version_keep: usize,
    #[serde(default = "Fixture::validation")]
    pub default_fixture: Fixture,
    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,
}

fn default_variant_count() -> usize {
    3
}

fn default_generation_attempts() -> u32 {
    3
}

fn default_max_repair_attempts() -> u32 {
    10
}

fn default_code_fix_attempts() -> u32 {
    3
}

fn default_version_keep() -> usize {
    20
}

fn default_display_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            variant_count: default_variant_count(),
            generation_attempts: default_generation_attempts(),
            max_repair_attempts: default_max_repair_attempts(),
            code_fix_attempts: default_code_fix_attempts(),
            version_keep: default_version_keep(),
            default_fixture: Fixture::validation(),
            display_timezone: default_display_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub explore: ExploreConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("zhipu".to_string(), ProviderConfig::default());
        providers.insert("openai".to_string(), ProviderConfig::default());
        providers.insert("deepseek".to_string(), ProviderConfig::default());
        providers.insert("kimi".to_string(), ProviderConfig {
            api_base: Some("https://api.moonshot.cn/v1".to_string()),
            ..Default::default()
        });
        providers.insert("vllm".to_string(), ProviderConfig {
            api_key: "dummy".to_string(),
            api_base: Some("http://localhost:8000/v1".to_string()),
            proxy: None,
        });

        Self {
            providers,
            ai: AiConfig::default(),
            network: NetworkConfig::default(),
            executor: ExecutorConfig::default(),
            explore: ExploreConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn db_path(&self, paths: &Paths) -> PathBuf {
        match self.storage.db_path.as_deref() {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => paths.explore_db(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.timeout_secs == 0 {
            return Err(Error::Config("executor.timeoutSecs must be > 0".to_string()));
        }
        if self.explore.variant_count == 0 {
            return Err(Error::Config("explore.variantCount must be > 0".to_string()));
        }
        if self.explore.display_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(Error::Config(format!(
                "explore.displayTimezone is not a valid IANA zone: {}",
                self.explore.display_timezone
            )));
        }
        Ok(())
    }
}

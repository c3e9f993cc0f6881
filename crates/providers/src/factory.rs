use factorlab_core::config::ProviderConfig;
use factorlab_core::Config;
use std::time::Duration;

use crate::client::ProxySettings;
use crate::{OpenAIProvider, Provider};

/// 默认的 OpenAI 兼容 api_base
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "zhipu" => "https://open.bigmodel.cn/api/paas/v4",
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "kimi" | "moonshot" => "https://api.moonshot.cn/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// 从 model 名推断 provider；None 表示需要 fallback
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("glm-") || model.starts_with("zhipu/") {
        Some("zhipu")
    } else if model.starts_with("gpt-") || model.starts_with("openai/") || model.starts_with("o1") || model.starts_with("o3") {
        Some("openai")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("kimi") || model.starts_with("moonshot") {
        Some("kimi")
    } else {
        None
    }
}

/// 第一个配置了真实 api_key 的 provider
fn fallback_provider_name(config: &Config) -> Option<&'static str> {
    let priority = ["zhipu", "deepseek", "openai", "kimi", "openrouter", "vllm"];
    priority.into_iter().find(|name| {
        config
            .providers
            .get(*name)
            .map(|p| !p.api_key.is_empty() && p.api_key != "dummy")
            .unwrap_or(false)
    })
}

/// Resolution order: explicit name, model prefix, first configured key.
pub fn create_provider(
    config: &Config,
    model: &str,
    explicit_provider: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let effective: &str = if let Some(ep) = explicit_provider {
        ep
    } else if let Some(inferred) = infer_provider_from_model(model) {
        inferred
    } else if let Some(fallback) = fallback_provider_name(config) {
        fallback
    } else {
        return Err(anyhow::anyhow!(
            "No AI provider configured. Set 'ai.provider', use a recognized model name \
             (e.g. 'glm-4.7', 'deepseek-chat'), or add an API key to the providers section."
        ));
    };

    let provider_cfg = config.providers.get(effective);
    if explicit_provider.is_some() {
        match provider_cfg {
            None => {
                return Err(anyhow::anyhow!(
                    "Provider '{}' is explicitly configured but not found in providers section",
                    effective
                ));
            }
            // vllm 等本地服务允许 dummy key
            Some(cfg) if cfg.api_key.is_empty() => {
                return Err(anyhow::anyhow!("Provider '{}' is explicitly configured but has no API key", effective));
            }
            _ => {}
        }
    }

    let empty_cfg = ProviderConfig::default();
    let resolved = provider_cfg.unwrap_or(&empty_cfg);
    let proxy = ProxySettings {
        provider: resolved.proxy.as_deref(),
        global: config.network.proxy.as_deref(),
        no_proxy: &config.network.no_proxy,
    };
    let api_base = resolved.api_base.as_deref().unwrap_or_else(|| default_api_base(effective));

    Ok(Box::new(OpenAIProvider::new_with_proxy(
        &resolved.api_key,
        Some(api_base),
        model,
        config.ai.max_tokens,
        config.ai.temperature,
        &proxy,
        Duration::from_secs(config.ai.request_timeout_secs),
    )) as Box<dyn Provider>)
}

/// Provider for generation and repair calls, from the `ai` section.
pub fn create_main_provider(config: &Config) -> anyhow::Result<Box<dyn Provider>> {
    create_provider(config, &config.ai.model, config.ai.provider.as_deref())
}

use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

/// Proxy inputs collected from config for one provider.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings<'a> {
    /// `providers.<name>.proxy`: None = unset, Some("") = direct, Some(url) = dedicated proxy.
    pub provider: Option<&'a str>,
    /// `network.proxy`
    pub global: Option<&'a str>,
    /// `network.noProxy`
    pub no_proxy: &'a [String],
}

#[derive(Debug, PartialEq)]
enum Route {
    Proxy(String),
    Direct,
    /// Leave reqwest to read HTTPS_PROXY / HTTP_PROXY.
    Environment,
}

/// Host rules: exact, `*.suffix` (subdomains only), `.suffix` (suffix and subdomains).
fn host_bypasses_proxy(host: &str, rules: &[String]) -> bool {
    let host = host.to_lowercase();
    rules.iter().any(|rule| {
        let rule = rule.trim().to_lowercase();
        if rule.is_empty() {
            false
        } else if let Some(suffix) = rule.strip_prefix("*.") {
            host.ends_with(&format!(".{}", suffix))
        } else if let Some(suffix) = rule.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == rule
        }
    })
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    if let Some(v6) = host_port.strip_prefix('[') {
        return v6.split(']').next().map(|h| h.to_string());
    }
    host_port.split(':').next().map(|h| h.to_string())
}

fn route_for(settings: &ProxySettings<'_>, api_base: &str) -> Route {
    match settings.provider {
        Some("") => return Route::Direct,
        Some(url) => return Route::Proxy(url.to_string()),
        None => {}
    }

    match settings.global {
        Some(global) if !global.is_empty() => {
            let bypass = host_of(api_base)
                .map(|h| host_bypasses_proxy(&h, settings.no_proxy))
                .unwrap_or(false);
            if bypass {
                Route::Direct
            } else {
                Route::Proxy(global.to_string())
            }
        }
        _ => Route::Environment,
    }
}

/// Build the HTTP client used for chat-completion calls.
pub fn build_http_client(settings: &ProxySettings<'_>, api_base: &str, timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match route_for(settings, api_base) {
        Route::Proxy(url) => match Proxy::all(&url) {
            Ok(p) => {
                info!(proxy = %url, api_base = %api_base, "AI provider using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %url, "Invalid proxy URL, connecting directly");
            }
        },
        Route::Direct => {
            info!(api_base = %api_base, "AI provider forced to direct connect");
            builder = builder.no_proxy();
        }
        Route::Environment => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, using default");
        Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_rules() {
        let rules = vec!["localhost".to_string(), "*.lan".to_string(), ".corp.cn".to_string()];
        assert!(host_bypasses_proxy("LOCALHOST", &rules));
        assert!(host_bypasses_proxy("gpu.lan", &rules));
        assert!(!host_bypasses_proxy("lan", &rules));
        assert!(host_bypasses_proxy("corp.cn", &rules));
        assert!(host_bypasses_proxy("llm.corp.cn", &rules));
        assert!(!host_bypasses_proxy("open.bigmodel.cn", &rules));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://open.bigmodel.cn/api/paas/v4").as_deref(), Some("open.bigmodel.cn"));
        assert_eq!(host_of("http://localhost:8000/v1").as_deref(), Some("localhost"));
        assert_eq!(host_of("http://u:p@gw.lan:3128").as_deref(), Some("gw.lan"));
        assert_eq!(host_of("http://[::1]:8000/v1").as_deref(), Some("::1"));
    }

    #[test]
    fn test_route_priority() {
        let no_proxy = vec!["localhost".to_string()];
        let dedicated = ProxySettings { provider: Some("http://p:1"), global: Some("http://g:2"), no_proxy: &no_proxy };
        assert_eq!(route_for(&dedicated, "https://api.openai.com/v1"), Route::Proxy("http://p:1".into()));

        let forced = ProxySettings { provider: Some(""), global: Some("http://g:2"), no_proxy: &no_proxy };
        assert_eq!(route_for(&forced, "https://api.openai.com/v1"), Route::Direct);

        let global = ProxySettings { provider: None, global: Some("http://g:2"), no_proxy: &no_proxy };
        assert_eq!(route_for(&global, "https://api.openai.com/v1"), Route::Proxy("http://g:2".into()));
        assert_eq!(route_for(&global, "http://localhost:8000/v1"), Route::Direct);

        assert_eq!(route_for(&ProxySettings::default(), "https://x"), Route::Environment);
    }
}

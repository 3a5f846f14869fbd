use std::sync::Arc;

use crate::config::{Config, ProviderKind, Secrets};
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::provider::GenerateProvider;
use crate::providers::{gemini::Gemini, groq::Groq};

/// Build the configured upstream provider.
///
/// Returns `Ok(None)` when no API key is available; the gateway still
/// starts and answers `no_api_key` per request.
pub fn build_provider(
    cfg: &Config,
    secrets: &Secrets,
) -> CoreResult<Option<Arc<dyn GenerateProvider>>> {
    let Some(api_key) = secrets.api_key.clone() else {
        tracing::warn!(
            env = %cfg.upstream.api_key_env,
            "upstream api key not set; generation requests will fail with no_api_key"
        );
        return Ok(None);
    };
    let http = HttpClient::from_cfg(&cfg.http)?;
    let base = cfg.upstream.base_url();
    let provider: Arc<dyn GenerateProvider> = match cfg.upstream.provider {
        ProviderKind::Gemini => Arc::new(Gemini::new(http, api_key, base)),
        ProviderKind::Groq => Arc::new(Groq::new(http, api_key, base)),
    };
    tracing::info!(provider = provider.name(), model = %cfg.upstream.model, "upstream provider ready");
    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PayloadFormat;
    use secrecy::SecretString;

    fn secrets(key: Option<&str>) -> Secrets {
        Secrets {
            proxy_secret: None,
            api_key: key.map(|k| SecretString::new(k.into())),
        }
    }

    #[test]
    fn missing_key_builds_nothing() {
        let p = build_provider(&Config::default(), &secrets(None)).unwrap();
        assert!(p.is_none());
    }

    #[test]
    fn gemini_is_the_default() {
        let p = build_provider(&Config::default(), &secrets(Some("k")))
            .unwrap()
            .expect("provider");
        assert_eq!(p.name(), "gemini");
        assert_eq!(p.payload_format(), PayloadFormat::Gemini);
    }

    #[test]
    fn groq_when_configured() {
        let mut cfg = Config::default();
        cfg.upstream = crate::config::UpstreamCfg::for_provider(ProviderKind::Groq);
        let p = build_provider(&cfg, &secrets(Some("k")))
            .unwrap()
            .expect("provider");
        assert_eq!(p.name(), "groq");
        assert_eq!(p.payload_format(), PayloadFormat::ChatCompletions);
    }
}

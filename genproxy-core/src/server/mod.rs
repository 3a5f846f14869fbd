//! HTTP gateway: one generation handler mounted on the configured paths.

pub mod handler;
pub mod shaper;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::routing::any;

use crate::auth::Authenticator;
use crate::config::{Config, Secrets};
use crate::error::CoreResult;
use crate::provider::GenerateProvider;
use crate::provider_factory::build_provider;

#[derive(Clone)]
pub struct GatewayState {
    pub cfg: Arc<Config>,
    pub auth: Arc<Authenticator>,
    /// `None` when no upstream key is configured.
    pub provider: Option<Arc<dyn GenerateProvider>>,
    next_id: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(cfg: Config, secrets: &Secrets) -> CoreResult<Self> {
        let provider = build_provider(&cfg, secrets)?;
        let auth = Authenticator::new(secrets.proxy_secret.clone());
        Ok(Self::from_parts(cfg, auth, provider))
    }

    pub fn from_parts(
        cfg: Config,
        auth: Authenticator,
        provider: Option<Arc<dyn GenerateProvider>>,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            auth: Arc::new(auth),
            provider,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn next_request_id(&self) -> String {
        format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

pub fn build_router(state: GatewayState) -> Router {
    let mut router = Router::new();
    for path in &state.cfg.server.paths {
        router = router.route(path, any(handler::generate));
    }
    router.with_state(state)
}

/// Bind `cfg.server.bind` and serve until the listener fails.
pub async fn serve(cfg: Config, secrets: Secrets) -> CoreResult<()> {
    let bind = cfg.server.bind.clone();
    let state = GatewayState::new(cfg, &secrets)?;
    if !state.auth.is_configured() {
        tracing::warn!("proxy secret not set; every request will be rejected");
    }
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "genproxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}

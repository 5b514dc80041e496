//! Owned engine handle.
//!
//! A [`Service`] initializes its engine on construction. The engine is released once the
//! service and every [`RtcConnection`] created from it have been dropped, on every exit
//! path including early returns and panics.

use std::sync::Arc;

use crate::config::{ConnectionConfig, ServiceConfig};
use crate::connection::RtcConnection;
use crate::engine::{ConnectionObserver, RtcEngine};
use crate::error::Result;
use crate::token::TokenProvider;

/// Releases the engine when the last owner goes away.
pub(crate) struct EngineGuard {
    pub(crate) engine: Arc<dyn RtcEngine>,
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        self.engine.release();
    }
}

/// An initialized engine plus the identity used for every connection.
pub struct Service {
    guard: Arc<EngineGuard>,
    channel_name: String,
    user_id: String,
    token: String,
}

impl Service {
    /// Validate `config`, resolve the token and initialize `engine`.
    ///
    /// Environment fallbacks are not applied here; call
    /// [`ServiceConfig::resolve_env`] first if they are wanted.
    pub fn new(config: ServiceConfig, engine: Arc<dyn RtcEngine>) -> Result<Self> {
        Self::build(config, engine, None)
    }

    /// Like [`Service::new`], asking `provider` for a token when none is configured.
    pub fn with_token_provider(
        config: ServiceConfig,
        engine: Arc<dyn RtcEngine>,
        provider: &dyn TokenProvider,
    ) -> Result<Self> {
        Self::build(config, engine, Some(provider))
    }

    fn build(
        config: ServiceConfig,
        engine: Arc<dyn RtcEngine>,
        provider: Option<&dyn TokenProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let token = match config.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => match provider {
                Some(p) => p.build_token(
                    &config.app_id,
                    &config.app_cert,
                    &config.channel_name,
                    &config.user_id,
                )?,
                None => {
                    tracing::debug!("no token configured; connecting without one");
                    String::new()
                }
            },
        };

        engine.initialize(&config)?;
        tracing::info!(
            channel = %config.channel_name,
            user = %config.user_id,
            "service initialized"
        );

        Ok(Self {
            guard: Arc::new(EngineGuard { engine }),
            channel_name: config.channel_name,
            user_id: config.user_id,
            token,
        })
    }

    /// Create a connection and block until the engine reports it connected.
    pub fn connect(
        &self,
        config: ConnectionConfig,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Result<RtcConnection> {
        self.connect_as(&self.user_id, config, observer)
    }

    /// Connect under a different user id on the same channel and engine.
    ///
    /// The service token is reused, so this only works with engines that accept it for
    /// any user (or run without tokens).
    pub fn connect_as(
        &self,
        user_id: &str,
        config: ConnectionConfig,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Result<RtcConnection> {
        RtcConnection::open(
            self.guard.clone(),
            &self.token,
            &self.channel_name,
            user_id,
            config,
            observer,
        )
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error, TokenError};
    use crate::loopback::{LoopbackEngine, LoopbackSettings};
    use crate::token::StaticToken;

    fn config() -> ServiceConfig {
        ServiceConfig {
            app_id: "app".to_string(),
            app_cert: "cert".to_string(),
            ..ServiceConfig::default()
        }
    }

    fn engine() -> Arc<LoopbackEngine> {
        Arc::new(LoopbackEngine::new(LoopbackSettings {
            paced: false,
            ..LoopbackSettings::default()
        }))
    }

    #[test]
    fn invalid_config_never_initializes_engine() {
        let engine = engine();
        let err = Service::new(ServiceConfig::default(), engine.clone())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(ConfigError::EmptyAppId)));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn engine_released_when_service_drops() {
        let engine = engine();
        let svc = Service::new(config(), engine.clone()).unwrap();
        assert!(engine.is_initialized());
        drop(svc);
        assert!(!engine.is_initialized());
    }

    #[test]
    fn engine_outlives_service_while_connections_exist() {
        let engine = engine();
        let svc = Service::new(config(), engine.clone()).unwrap();
        let conn = svc.connect(ConnectionConfig::default(), None).unwrap();
        drop(svc);
        assert!(engine.is_initialized());
        drop(conn);
        assert!(!engine.is_initialized());
    }

    #[test]
    fn explicit_token_wins_over_provider() {
        let cfg = ServiceConfig {
            token: Some("explicit".to_string()),
            ..config()
        };
        let svc =
            Service::with_token_provider(cfg, engine(), &StaticToken("provided".into())).unwrap();
        assert_eq!(svc.token, "explicit");
    }

    #[test]
    fn provider_used_when_token_missing() {
        let svc =
            Service::with_token_provider(config(), engine(), &StaticToken("provided".into()))
                .unwrap();
        assert_eq!(svc.token, "provided");
    }

    #[test]
    fn provider_failure_is_reported() {
        let err = Service::with_token_provider(config(), engine(), &StaticToken(String::new()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Token(TokenError::Empty)));
    }
}

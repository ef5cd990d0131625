//! Client facade.
//!
//! [`Client`] bundles the gateway connection, session, dispatcher, entity
//! cache, and REST executor behind the surface most callers want:
//! `connect`, `on`/`remove`, `request`, `close`. Anything deeper (raw
//! status channel, session inspection) is exposed read-only for
//! diagnostics.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::cache::EntityCache;
use crate::config::Settings;
use crate::gateway::connection::{ConnectionStatus, GatewayConfig, GatewayConnection};
use crate::gateway::dispatch::{Dispatcher, Event, ListenerHandle};
use crate::gateway::messages::IdentifyProperties;
use crate::gateway::session::Session;
use crate::gateway::transport::{Connector, TungsteniteConnector};
use crate::http::executor::{ApiRequest, RestClient, DEFAULT_MAX_RETRIES};
use crate::http::transport::{HttpTransport, ReqwestTransport};
use crate::shared::error::{ApiError, GatewayError, TransportError};

pub struct ClientBuilder {
    gateway: GatewayConfig,
    base_url: String,
    request_timeout: Duration,
    max_retries: u32,
    connector: Option<Arc<dyn Connector>>,
    http: Option<Arc<dyn HttpTransport>>,
    cache_enabled: bool,
}

impl ClientBuilder {
    /// Builder with local-development defaults; override per call site.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            gateway: GatewayConfig::new("ws://localhost:3000/gateway", token),
            base_url: "http://localhost:3000/api/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: DEFAULT_MAX_RETRIES,
            connector: None,
            http: None,
            cache_enabled: true,
        }
    }

    /// Seeds a builder from loaded settings. The token is passed
    /// separately so callers can source it from wherever they like.
    pub fn from_settings(settings: &Settings, token: impl Into<String>) -> Self {
        let mut gateway = GatewayConfig::new(settings.gateway.url.clone(), token);
        gateway.compress = settings.gateway.compress;
        gateway.intents = settings.gateway.intents;
        gateway.connect_timeout = settings.gateway.connect_timeout();
        gateway.hello_timeout = settings.gateway.hello_timeout();
        gateway.reconnect_base = settings.gateway.reconnect_base();
        gateway.reconnect_max = settings.gateway.reconnect_max();
        gateway.properties = IdentifyProperties {
            os: settings.identify.os.clone(),
            browser: settings.identify.browser.clone(),
            device: settings.identify.device.clone(),
        };

        Self {
            gateway,
            base_url: settings.api.base_url.clone(),
            request_timeout: settings.api.request_timeout(),
            max_retries: settings.api.max_retries,
            connector: None,
            http: None,
            cache_enabled: true,
        }
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway.url = url.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn intents(mut self, intents: u64) -> Self {
        self.gateway.intents = Some(intents);
        self
    }

    pub fn shard(mut self, index: u64, total: u64) -> Self {
        self.gateway.shard = Some([index, total]);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.gateway.compress = compress;
        self
    }

    pub fn properties(mut self, properties: IdentifyProperties) -> Self {
        self.gateway.properties = properties;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Swap the websocket layer; tests use scripted connectors.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Swap the HTTP layer; tests use scripted transports.
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    /// Skip attaching the entity cache to the dispatcher.
    pub fn disable_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Assembles the client. Fails only if the default HTTP client
    /// cannot be constructed.
    pub fn build(self) -> Result<Client, TransportError> {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector),
        };
        let http: Arc<dyn HttpTransport> = match self.http {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.request_timeout)?),
        };

        let rest = RestClient::new(http, self.base_url, self.gateway.token.clone())
            .with_max_retries(self.max_retries);
        let dispatcher = Arc::new(Dispatcher::new());
        let cache = EntityCache::new();
        if self.cache_enabled {
            // Cache listeners stay registered for the client's lifetime.
            cache.attach(&dispatcher);
        }

        Ok(Client {
            config: self.gateway,
            connector,
            session: Arc::new(Session::new()),
            dispatcher,
            cache,
            rest,
            connection: None,
        })
    }
}

pub struct Client {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    cache: EntityCache,
    rest: RestClient,
    connection: Option<GatewayConnection>,
}

impl Client {
    pub fn builder(token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(token)
    }

    /// Starts the gateway connection and waits until the first ready.
    ///
    /// A previous connection, if any, is closed first. On a fatal
    /// handshake failure (for example a rejected token) the error is
    /// returned and nothing keeps running in the background.
    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        if let Some(old) = self.connection.take() {
            old.close().await;
        }

        let connection = GatewayConnection::spawn(
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.session),
            Arc::clone(&self.dispatcher),
        );
        connection.wait_until_ready().await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Stops the gateway connection. REST keeps working; listeners stay
    /// registered for a later `connect`.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// Registers an event listener; see [`Dispatcher::on`].
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> ListenerHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.on(event, handler)
    }

    pub fn remove(&self, handle: &ListenerHandle) -> bool {
        self.dispatcher.remove(handle)
    }

    /// Issues a REST request through the rate-limit tracker.
    pub async fn request(&self, request: ApiRequest) -> Result<Option<Value>, ApiError> {
        self.rest.request(request).await
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Last observed connection status; `Closed` when never connected.
    pub fn status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map(GatewayConnection::current_status)
            .unwrap_or(ConnectionStatus::Closed)
    }

    /// Live status channel of the current connection.
    pub fn watch_status(&self) -> Option<watch::Receiver<ConnectionStatus>> {
        self.connection.as_ref().map(GatewayConnection::status)
    }
}

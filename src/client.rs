use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::{CommandHandler, CommandRegistry};
use crate::config::Config;
use crate::error::{ConnectionError, RegistryError};
use crate::gateway::dispatcher::{DispatchStats, Dispatcher, EventHandler};
use crate::gateway::session::SessionWatch;
use crate::gateway::transport::Transport;
use crate::gateway::ws::WebSocketTransport;
use crate::gateway::ConnectionManager;
use crate::models::outbound::{OutboundPayload, OutboundRequest, Priority};
use crate::ratelimit::{LimiterStats, RateLimiter};
use crate::rest::RestSender;

/// Inbound events buffered between the receive loop and the dispatcher.
const EVENT_BUFFER: usize = 1024;

pub struct ClientBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    commands: CommandRegistry,
    handlers: Vec<(String, Arc<dyn EventHandler>)>,
}

impl ClientBuilder {
    /// Use a custom transport instead of the WebSocket gateway.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn command(
        mut self,
        name: &str,
        description: &str,
        handler: impl CommandHandler,
    ) -> Result<Self, RegistryError> {
        self.commands.register(name, description, handler)?;
        Ok(self)
    }

    /// Register commands through a function such as `commands::ping::register`.
    pub fn commands_from(
        mut self,
        register: impl FnOnce(&mut CommandRegistry) -> Result<(), RegistryError>,
    ) -> Result<Self, RegistryError> {
        register(&mut self.commands)?;
        Ok(self)
    }

    pub fn on_event(mut self, event_type: impl Into<String>, handler: impl EventHandler) -> Self {
        self.handlers.push((event_type.into(), Arc::new(handler)));
        self
    }

    pub fn build(self) -> Client {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let rest = RestSender::new(&self.config.api_url, &self.config.token);
                Arc::new(WebSocketTransport::new(&self.config.gateway_url, rest))
            }
        };

        let manager = Arc::new(ConnectionManager::new(transport, self.config.gateway()));
        let outbound = RateLimiter::new(self.config.rate_limit.clone(), manager.clone());
        let commands = Arc::new(self.commands);

        let mut dispatcher = Dispatcher::new(commands.clone(), outbound.clone());
        for (event_type, handler) in self.handlers {
            dispatcher.register_shared(event_type, handler);
        }

        Client {
            config: self.config,
            manager,
            dispatcher: Arc::new(dispatcher),
            outbound,
            commands,
            stop: CancellationToken::new(),
        }
    }
}

/// Stops a running [`Client`] from another task.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One gateway client: a connection manager, a dispatcher and an outbound
/// queue wired together.
pub struct Client {
    config: Config,
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    outbound: RateLimiter,
    commands: Arc<CommandRegistry>,
    stop: CancellationToken,
}

impl Client {
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            commands: CommandRegistry::new(),
            handlers: Vec::new(),
        }
    }

    pub fn session(&self) -> SessionWatch {
        self.manager.session()
    }

    /// Queue for sends that don't answer an interaction.
    pub fn outbound(&self) -> &RateLimiter {
        &self.outbound
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn outbound_stats(&self) -> LimiterStats {
        self.outbound.stats()
    }

    /// Run until stopped or the connection fails for good, then shut down:
    /// inbound first, then running handlers, then the outbound queue.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let dispatcher = self.dispatcher.clone();
        let inbound = tokio::spawn(async move { dispatcher.run(events_rx).await });
        let publisher = self.spawn_publisher();

        tracing::info!(commands = self.commands.len(), "starting gateway client");
        let result = self.manager.run(events_tx, self.stop.clone()).await;
        self.stop.cancel();

        if let Err(ref e) = result {
            tracing::error!("gateway connection failed: {e}");
        }
        if let Err(e) = inbound.await {
            tracing::error!("dispatcher task failed: {e}");
        }
        if let Some(publisher) = publisher {
            publisher.abort();
        }

        let timeout = self.config.shutdown_timeout;
        if !self.dispatcher.shutdown(timeout).await {
            tracing::warn!("abandoning {} running handlers", self.dispatcher.in_flight());
        }
        self.outbound
            .shutdown(self.config.drain_on_shutdown, timeout)
            .await;
        self.manager.close();
        tracing::info!("gateway client stopped");

        result
    }

    /// Publishes every registered command once the first session is ready.
    fn spawn_publisher(&self) -> Option<JoinHandle<()>> {
        let application_id = self.config.application_id.clone()?;
        let definitions = self.commands.definitions();
        if definitions.is_empty() {
            return None;
        }
        let mut session = self.manager.session();
        let outbound = self.outbound.clone();

        Some(tokio::spawn(async move {
            if !session.wait_ready().await {
                return;
            }
            let target = format!("application:{application_id}");
            let mut pending = Vec::with_capacity(definitions.len());
            for def in definitions {
                let payload = OutboundPayload::RegisterCommand {
                    application_id: application_id.clone(),
                    name: def.name.clone(),
                    description: def.description,
                };
                let (request, done) = OutboundRequest::new(&target, payload)
                    .with_priority(Priority::Low)
                    .with_completion();
                outbound.enqueue(request);
                pending.push((def.name, done));
            }
            for (name, done) in pending {
                match done.await {
                    Ok(Ok(_)) => tracing::info!("published command /{name}"),
                    Ok(Err(e)) => tracing::warn!("failed to publish command /{name}: {e}"),
                    Err(_) => tracing::warn!("publishing command /{name} was abandoned"),
                }
            }
        }))
    }
}

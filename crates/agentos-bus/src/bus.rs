use crate::config::BusConfig;
use crate::handler::EventHandler;
use crate::transport::{transport_for, Transport};
use agentos_core::{
    AgentosError, AgentosResult, Component, Event, ToolCallRequest, ToolCallResult, ToolProvider,
    Topic,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type TopicRegistry = RwLock<HashMap<Topic, Vec<SubscriberEntry>>>;

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<Event>,
    token: CancellationToken,
}

/// Counters exposed for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    /// Events delivered to every subscriber in time.
    pub published: u64,
    /// Publishes that returned an error.
    pub failed_publishes: u64,
    /// Live subscriptions across all topics.
    pub subscriptions: usize,
    /// Registered tool responders.
    pub tools: usize,
}

/// Process-wide message transport.
///
/// Each subscription owns a bounded queue drained by its own dispatch task,
/// so one slow handler never delays another and per-publisher order is kept.
pub struct MessageBus {
    config: BusConfig,
    transport_override: Option<Arc<dyn Transport>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    topics: Arc<TopicRegistry>,
    responders: RwLock<HashMap<String, Arc<dyn ToolProvider>>>,
    next_subscription: AtomicU64,
    published: AtomicU64,
    failed_publishes: AtomicU64,
}

impl MessageBus {
    /// Create a bus whose transport is resolved from `config.endpoint` on start.
    pub fn new(config: BusConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a bus on an explicit transport, ignoring the configured endpoint.
    pub fn with_transport(config: BusConfig, transport: Arc<dyn Transport>) -> Self {
        Self::build(config, Some(transport))
    }

    fn build(config: BusConfig, transport_override: Option<Arc<dyn Transport>>) -> Self {
        Self {
            config,
            transport_override,
            transport: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
            topics: Arc::new(RwLock::new(HashMap::new())),
            responders: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            published: AtomicU64::new(0),
            failed_publishes: AtomicU64::new(0),
        }
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Whether `start` succeeded and `stop` has not run since.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> AgentosResult<()> {
        let connected = self.is_running()
            && self
                .transport
                .lock()
                .as_ref()
                .is_some_and(|t| t.is_connected());
        if connected {
            Ok(())
        } else {
            Err(AgentosError::Connection(format!(
                "Message bus '{}' is not connected",
                self.config.endpoint
            )))
        }
    }

    async fn connect_transport(&self) -> AgentosResult<Arc<dyn Transport>> {
        let transport = match &self.transport_override {
            Some(transport) => transport.clone(),
            None => transport_for(&self.config.endpoint)?,
        };
        transport.connect().await?;
        Ok(transport)
    }

    fn shutdown_now(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.lock().cancel();
        self.topics.write().clear();
        if let Some(transport) = self.transport.lock().take() {
            transport.disconnect();
        }
        info!(endpoint = %self.config.endpoint, "Communication layer stopped");
    }

    /// Register `handler` for events on `topic`.
    pub fn subscribe<H>(&self, topic: Topic, handler: H) -> AgentosResult<Subscription>
    where
        H: EventHandler + 'static,
    {
        self.ensure_connected()?;

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.lock().child_token();
        let (tx, mut rx) = mpsc::channel::<Event>(self.config.subscriber_buffer.max(1));

        self.topics.write().entry(topic).or_default().push(SubscriberEntry {
            id,
            tx,
            token: token.clone(),
        });

        let dispatch_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = dispatch_token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(event) => handler.handle(event).await,
                        None => break,
                    },
                }
            }
            debug!(subscription = id, topic = %topic, "Subscription dispatcher exited");
        });

        debug!(subscription = id, topic = %topic, "Subscribed");
        Ok(Subscription {
            id,
            topic,
            token,
            topics: Arc::downgrade(&self.topics),
        })
    }

    /// Publish `event` on its topic to every current subscriber.
    ///
    /// Waits at most `publish_timeout_ms` in total for subscriber queues to
    /// accept the event. Subscribers that did accept it keep it, so a caller
    /// retrying after a `Publish` error produces duplicates, never gaps.
    pub async fn publish(&self, event: Event) -> AgentosResult<()> {
        if let Err(e) = self.ensure_connected() {
            self.failed_publishes.fetch_add(1, Ordering::Relaxed);
            return Err(AgentosError::Publish(e.to_string()));
        }

        let targets: Vec<(u64, mpsc::Sender<Event>)> = {
            let topics = self.topics.read();
            topics
                .get(&event.topic)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| !s.token.is_cancelled())
                        .map(|s| (s.id, s.tx.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let deadline = tokio::time::Instant::now() + self.config.publish_timeout();
        let mut stalled = 0usize;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tokio::time::timeout_at(deadline, tx.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => closed.push(id),
                Err(_) => {
                    warn!(
                        subscription = id,
                        topic = %event.topic,
                        event_id = %event.id,
                        "Subscriber queue full past the enqueue timeout"
                    );
                    stalled += 1;
                }
            }
        }

        if !closed.is_empty() {
            if let Some(subs) = self.topics.write().get_mut(&event.topic) {
                subs.retain(|s| !closed.contains(&s.id));
            }
        }

        if stalled > 0 {
            self.failed_publishes.fetch_add(1, Ordering::Relaxed);
            return Err(AgentosError::Publish(format!(
                "{stalled} subscriber(s) on '{}' did not accept event {} within {} ms",
                event.topic, event.id, self.config.publish_timeout_ms
            )));
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = %event.id,
            topic = %event.topic,
            task_id = %event.task_id,
            "Event published"
        );
        Ok(())
    }

    /// Publish with up to `attempts` tries, retrying only `Publish` failures.
    ///
    /// Used for lifecycle events that must not be lost; a retry may deliver
    /// the same event twice to subscribers that accepted the first try.
    pub async fn publish_reliably(&self, event: Event, attempts: u32) -> AgentosResult<()> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.publish(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(AgentosError::Publish(msg)) if attempt < attempts && self.is_running() => {
                    warn!(
                        event_id = %event.id,
                        topic = %event.topic,
                        attempt,
                        error = %msg,
                        "Publish failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Register the responder for a tool name, replacing any previous one.
    pub fn register_tool(&self, name: impl Into<String>, provider: Arc<dyn ToolProvider>) {
        let name = name.into();
        info!(tool = %name, "Registered tool provider");
        self.responders.write().insert(name, provider);
    }

    /// Remove a responder. Returns false if none was registered.
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.responders.write().remove(name).is_some()
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.responders.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Synchronous request/reply against the responder for `request.tool`.
    ///
    /// Fails with `Timeout` if no reply arrives within `timeout`, and with
    /// `Remote` if the responder reports failure or none is registered.
    pub async fn call(
        &self,
        request: ToolCallRequest,
        timeout: Duration,
    ) -> AgentosResult<ToolCallResult> {
        self.ensure_connected()?;

        let tool = request.tool.clone();
        let provider = self.responders.read().get(&tool).cloned().ok_or_else(|| {
            AgentosError::Remote(format!("No responder registered for tool '{tool}'"))
        })?;

        debug!(tool = %tool, task_id = %request.task_id, "Tool call");
        match tokio::time::timeout(timeout, provider.invoke(request)).await {
            Err(_) => Err(AgentosError::Timeout(format!(
                "Tool '{tool}' did not reply within {} ms",
                timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(AgentosError::Remote(format!("Tool '{tool}' failed: {e}"))),
            Ok(Ok(result)) if !result.success => Err(AgentosError::Remote(
                result
                    .error
                    .unwrap_or_else(|| format!("Tool '{tool}' reported failure")),
            )),
            Ok(Ok(result)) => Ok(result),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            failed_publishes: self.failed_publishes.load(Ordering::Relaxed),
            subscriptions: self.topics.read().values().map(Vec::len).sum(),
            tools: self.responders.read().len(),
        }
    }
}

#[async_trait]
impl Component for MessageBus {
    fn name(&self) -> &str {
        "communication"
    }

    async fn start(&self) -> AgentosResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentosError::Lifecycle(
                "Communication layer already started".to_string(),
            ));
        }

        match self.connect_transport().await {
            Ok(transport) => {
                *self.shutdown.lock() = CancellationToken::new();
                *self.transport.lock() = Some(transport);
                info!(endpoint = %self.config.endpoint, "Communication layer started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        self.shutdown_now();
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Handle to a registered subscription.
pub struct Subscription {
    id: u64,
    topic: Topic,
    token: CancellationToken,
    topics: Weak<TopicRegistry>,
}

impl Subscription {
    /// Bus-unique subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Stop delivery to this subscription. Events still queued are dropped.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(topics) = self.topics.upgrade() {
            if let Some(subs) = topics.write().get_mut(&self.topic) {
                subs.retain(|s| s.id != self.id);
            }
        }
    }

    /// Whether delivery has stopped.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

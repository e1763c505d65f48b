//! Agent loop implementation
//!
//! This module provides the core agent loop that consumes inbound messages,
//! calls the LLM provider, executes tools, and publishes replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage, StreamEvent, StreamEventKind};
use crate::config::{AgentConfig, AgentSpec};
use crate::error::{DatabotError, Result};
use crate::health::UsageMetrics;
use crate::providers::{
    ChatOptions, LLMProvider, LLMResponse, StreamEvent as ProviderEvent, ToolDefinition,
    UsageTracker,
};
use crate::session::{Message, SessionCache, ToolCall};
use crate::tools::{run_tool, unknown_tool, Tool, ToolContext, ToolRegistry};

use super::context::ContextBuilder;
use super::router::Router;

/// Reply used when the iteration bound is hit before any model text.
pub const ITERATION_LIMIT_MESSAGE: &str =
    "I could not complete this request within the allowed number of steps.";

/// The only failure text users ever see; details go to the log.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Sorry, I encountered an internal error. Please try again or contact an administrator.";

/// A finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub content: String,
    /// Specialist that handled the turn when routing is on
    pub agent: Option<String>,
}

/// Adds retrieved context in front of the user's message.
#[async_trait]
pub trait ContextEnricher: Send + Sync {
    /// Extra text for `content`, or `None` when there is nothing relevant.
    async fn enrich(&self, content: &str, chat_id: &str) -> Result<Option<String>>;
}

/// Decides whether a tool flagged `requires_approval` may run.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve(&self, tool_name: &str, args: &Value, ctx: &ToolContext) -> bool;
}

/// Where a streaming turn sends its events.
enum EventSink<'a> {
    Bus(&'a MessageBus),
    Channel(&'a mpsc::Sender<StreamEvent>),
}

impl EventSink<'_> {
    async fn emit(&self, event: StreamEvent) {
        match self {
            EventSink::Bus(bus) => {
                if let Err(e) = bus.publish_stream(event).await {
                    warn!(error = %e, "Failed to publish stream event");
                }
            }
            EventSink::Channel(tx) => {
                if tx.send(event).await.is_err() {
                    debug!("Stream receiver dropped");
                }
            }
        }
    }
}

/// The main agent loop that processes messages and coordinates with LLM providers.
///
/// Turns for the same `chat_id` are serialised; turns for different chats run
/// concurrently up to `max_concurrent_turns`.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use databot::agent::AgentLoop;
/// use databot::bus::MessageBus;
/// use databot::config::Config;
/// use databot::providers::build_provider;
/// use databot::session::{SessionCache, SessionStore};
///
/// let config = Config::default();
/// let store = Arc::new(SessionStore::open_in_memory()?);
/// let sessions = Arc::new(SessionCache::with_defaults(store));
/// let bus = Arc::new(MessageBus::new());
/// let agent = Arc::new(AgentLoop::new(config.agent, bus, build_provider(&config), sessions));
///
/// tokio::spawn(Arc::clone(&agent).start());
/// // ...
/// agent.stop();
/// ```
pub struct AgentLoop {
    config: AgentConfig,
    bus: Arc<MessageBus>,
    provider: Arc<dyn LLMProvider>,
    sessions: Arc<SessionCache>,
    tools: RwLock<ToolRegistry>,
    context_builder: ContextBuilder,
    enricher: Option<Arc<dyn ContextEnricher>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    router: Option<Arc<Router>>,
    usage: Arc<UsageTracker>,
    metrics: Arc<UsageMetrics>,
    turn_permits: Arc<Semaphore>,
    /// Per-chat locks to serialize concurrent messages for the same chat
    chat_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        bus: Arc<MessageBus>,
        provider: Arc<dyn LLMProvider>,
        sessions: Arc<SessionCache>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let context_builder = match &config.system_prompt {
            Some(prompt) if !prompt.is_empty() => ContextBuilder::new().with_system_prompt(prompt),
            _ => ContextBuilder::new(),
        };
        let permits = config.max_concurrent_turns.max(1);
        Self {
            config,
            bus,
            provider,
            sessions,
            tools: RwLock::new(ToolRegistry::new()),
            context_builder,
            enricher: None,
            approval: None,
            router: None,
            usage: Arc::new(UsageTracker::new()),
            metrics: Arc::new(UsageMetrics::new()),
            turn_permits: Arc::new(Semaphore::new(permits)),
            chat_locks: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn with_context_builder(mut self, builder: ContextBuilder) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn ContextEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    /// Share an existing usage tracker instead of the loop's own.
    /// Route every turn to a specialist: its prompt is added and the
    /// offered tools are limited to its `tool_names`.
    pub fn with_router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<UsageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn register_tool(&self, tool: Box<dyn Tool>) {
        self.tools.write().await.register(tool);
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.read().await.names()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn metrics(&self) -> &Arc<UsageMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Public entry points
    // ------------------------------------------------------------------

    /// Run one turn and return the reply text.
    ///
    /// Errors are returned raw; callers facing users should show
    /// [`INTERNAL_ERROR_MESSAGE`] instead.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<String> {
        Ok(self.process_reply(msg).await?.content)
    }

    /// Like [`process_message`](Self::process_message), also naming the
    /// specialist that answered.
    pub async fn process_reply(&self, msg: &InboundMessage) -> Result<AgentReply> {
        let _permit = self.acquire_turn().await?;
        self.turn(msg, None).await
    }

    /// Run one turn for `content` on `chat_id`, as the CLI does.
    pub async fn process_direct(&self, content: &str, chat_id: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", chat_id, content);
        self.process_message(&msg).await
    }

    /// Run one streaming turn, sending every event (ending with `Done` or
    /// `Error`) to `events`.
    pub async fn process_stream(
        &self,
        msg: &InboundMessage,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String> {
        let _permit = self.acquire_turn().await?;
        self.streamed_turn(msg, &EventSink::Channel(events)).await
    }

    /// Consume the inbound stream until [`stop`](Self::stop) is called.
    ///
    /// A message is only pulled once a turn slot is free, so a saturated agent
    /// leaves messages in the bus queue. In-flight turns finish before this
    /// returns.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DatabotError::Config("Agent loop already running".into()));
        }
        info!(
            max_concurrent_turns = self.config.max_concurrent_turns,
            "Starting agent loop"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = *shutdown_rx.borrow_and_update();
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => break,
                permit = Arc::clone(&self.turn_permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let msg = tokio::select! {
                _ = shutdown_rx.changed() => break,
                msg = self.bus.consume_inbound() => match msg {
                    Some(m) => m,
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
            };

            let this = Arc::clone(&self);
            in_flight.spawn(async move {
                let _permit = permit;
                this.handle_inbound(msg).await;
            });
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!(error = %e, "Turn task panicked");
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "Turn task panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
        Ok(())
    }

    /// Signal [`start`](Self::start) to stop pulling messages.
    pub fn stop(&self) {
        info!("Stopping agent loop");
        self.shutdown_tx.send_replace(true);
    }

    // ------------------------------------------------------------------
    // Turn handling
    // ------------------------------------------------------------------

    async fn acquire_turn(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        Arc::clone(&self.turn_permits)
            .acquire_owned()
            .await
            .map_err(|_| DatabotError::Config("turn limiter closed".into()))
    }

    async fn handle_inbound(&self, msg: InboundMessage) {
        let start = Instant::now();
        if msg.stream {
            let _ = self.streamed_turn(&msg, &EventSink::Bus(&self.bus)).await;
            return;
        }

        let outbound = match self.turn(&msg, None).await {
            Ok(AgentReply {
                content,
                agent: Some(agent),
            }) => OutboundMessage::reply_to(&msg, &content).with_agent(&agent),
            Ok(reply) => OutboundMessage::reply_to(&msg, &reply.content),
            Err(_) => OutboundMessage::error_to(&msg, INTERNAL_ERROR_MESSAGE),
        };
        debug!(
            chat_id = %msg.chat_id,
            latency_ms = start.elapsed().as_millis() as u64,
            "Publishing reply"
        );
        if let Err(e) = self.bus.publish_outbound(outbound).await {
            error!(chat_id = %msg.chat_id, error = %e, "Failed to publish outbound message");
            self.metrics.record_error();
        }
    }

    async fn streamed_turn(&self, msg: &InboundMessage, sink: &EventSink<'_>) -> Result<String> {
        match self.turn(msg, Some(sink)).await {
            Ok(reply) => {
                sink.emit(StreamEvent::done(&msg.channel, &msg.chat_id, &reply.content))
                    .await;
                Ok(reply.content)
            }
            Err(e) => {
                sink.emit(StreamEvent::error(
                    &msg.channel,
                    &msg.chat_id,
                    INTERNAL_ERROR_MESSAGE,
                ))
                .await;
                Err(e)
            }
        }
    }

    /// One turn inside a `request` span, serialised per chat.
    async fn turn(
        &self,
        msg: &InboundMessage,
        sink: Option<&EventSink<'_>>,
    ) -> Result<AgentReply> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!(
            "request",
            request_id = %request_id,
            chat_id = %msg.chat_id,
            channel = %msg.channel,
        );

        async {
            let lock = self.chat_lock(&msg.chat_id).await;
            let result = {
                let _guard = lock.lock().await;
                info!(sender = %msg.sender_id, stream = msg.stream, "Processing message");
                self.metrics.record_request();
                let start = Instant::now();
                let result = self.run_turn(msg, sink).await;
                let latency_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(reply) => info!(
                        latency_ms = latency_ms,
                        response_len = reply.content.len(),
                        agent = reply.agent.as_deref().unwrap_or("-"),
                        "Request completed"
                    ),
                    Err(e) => {
                        self.metrics.record_error();
                        error!(latency_ms = latency_ms, error = %e, "Request failed");
                    }
                }
                result
            };
            drop(lock);
            self.release_chat_lock(&msg.chat_id).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_turn(
        &self,
        msg: &InboundMessage,
        sink: Option<&EventSink<'_>>,
    ) -> Result<AgentReply> {
        let content = self.enrich(msg).await;
        let specialist = match &self.router {
            Some(router) => Some(router.route(&msg.content).await),
            None => None,
        };

        let history = self.sessions.history(&msg.chat_id).await?;
        let mut messages = self
            .context_builder
            .build_for(specialist, history, &content)
            .await?;
        self.sessions
            .append(&msg.chat_id, Message::user(&msg.content))
            .await?;

        let options = ChatOptions::new()
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);
        let model = Some(self.config.model.as_str());
        let max_iterations = self.config.max_iterations.max(1);
        let tool_ctx = ToolContext::new().with_channel(&msg.channel, &msg.chat_id);

        let mut last_text = String::new();
        let mut final_text = None;

        for iteration in 1..=max_iterations {
            debug!(iteration, max_iterations, "Calling provider");
            let definitions: Vec<ToolDefinition> = self
                .tools
                .read()
                .await
                .definitions()
                .into_iter()
                .filter(|d| in_scope(specialist, &d.name))
                .collect();
            let response = match sink {
                Some(sink) => {
                    self.infer_stream(msg, messages.clone(), definitions, model, &options, sink)
                        .await?
                }
                None => {
                    self.provider
                        .chat(messages.clone(), definitions, model, options.clone())
                        .await?
                }
            };
            self.usage.record(self.provider.name(), response.usage);
            if let Some(usage) = response.usage {
                self.metrics
                    .record_tokens(usage.prompt_tokens as u64, usage.completion_tokens as u64);
            }

            if !response.content.is_empty() {
                last_text = response.content.clone();
            }
            if !response.has_tool_calls() {
                final_text = Some(response.content);
                break;
            }

            self.metrics
                .record_tool_calls(response.tool_calls.len() as u64);
            let calls: Vec<ToolCall> = response.tool_calls.iter().map(ToolCall::from).collect();
            messages.push(Message::assistant_with_tools(&response.content, calls.clone()));

            for call in &calls {
                if let Some(sink) = sink {
                    sink.emit(StreamEvent::new(
                        &msg.channel,
                        &msg.chat_id,
                        StreamEventKind::ToolStart {
                            tool_name: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    ))
                    .await;
                }

                let result = if in_scope(specialist, &call.name) {
                    self.execute_tool(call, &tool_ctx).await
                } else {
                    unknown_tool(&call.name)
                };
                let tool_msg = Message::tool_result(&call.id, &call.name, &result);
                self.sessions.append(&msg.chat_id, tool_msg.clone()).await?;
                messages.push(tool_msg);

                if let Some(sink) = sink {
                    sink.emit(StreamEvent::new(
                        &msg.channel,
                        &msg.chat_id,
                        StreamEventKind::ToolResult {
                            tool_name: call.name.clone(),
                            result,
                        },
                    ))
                    .await;
                }
            }
        }

        let reply = match final_text {
            Some(text) if !text.is_empty() => text,
            Some(_) => last_text,
            None => {
                warn!(max_iterations, "Tool loop reached maximum iterations");
                if last_text.is_empty() {
                    ITERATION_LIMIT_MESSAGE.to_string()
                } else {
                    last_text
                }
            }
        };

        self.sessions
            .append(&msg.chat_id, Message::assistant(&reply))
            .await?;
        if let Err(e) = self.sessions.flush(&msg.chat_id).await {
            warn!(error = %e, "Failed to flush session after turn");
        }
        Ok(AgentReply {
            content: reply,
            agent: specialist.map(|s| s.name.clone()),
        })
    }

    async fn enrich(&self, msg: &InboundMessage) -> String {
        let Some(enricher) = &self.enricher else {
            return msg.content.clone();
        };
        match enricher.enrich(&msg.content, &msg.chat_id).await {
            Ok(Some(extra)) if !extra.is_empty() => format!("{}\n\n{}", extra, msg.content),
            Ok(_) => msg.content.clone(),
            Err(e) => {
                warn!(error = %e, "Context enrichment failed, continuing without it");
                msg.content.clone()
            }
        }
    }

    async fn infer_stream(
        &self,
        msg: &InboundMessage,
        messages: Vec<Message>,
        definitions: Vec<ToolDefinition>,
        model: Option<&str>,
        options: &ChatOptions,
        sink: &EventSink<'_>,
    ) -> Result<LLMResponse> {
        let mut rx = self
            .provider
            .chat_stream(messages, definitions, model, options.clone())
            .await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;
        while let Some(event) = rx.recv().await {
            match event {
                ProviderEvent::Delta(text) => {
                    content.push_str(&text);
                    sink.emit(StreamEvent::delta(&msg.channel, &msg.chat_id, &text))
                        .await;
                }
                ProviderEvent::ToolCalls(calls) => tool_calls = calls,
                ProviderEvent::Done {
                    content: full,
                    usage: u,
                } => {
                    if content.is_empty() {
                        content = full;
                    }
                    usage = u;
                }
                ProviderEvent::Error(e) => return Err(DatabotError::Provider(e)),
            }
        }
        Ok(LLMResponse {
            content,
            tool_calls,
            usage,
        })
    }

    async fn execute_tool(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let Some(tool) = self.tools.read().await.get(&call.name) else {
            return unknown_tool(&call.name);
        };

        let args: Value = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Invalid JSON in tool arguments");
                    return format!(
                        "Error executing tool '{}': invalid arguments JSON: {}",
                        call.name, e
                    );
                }
            }
        };

        if tool.requires_approval() {
            match &self.approval {
                Some(handler) => {
                    if !handler.approve(&call.name, &args, ctx).await {
                        info!(tool = %call.name, "Tool call rejected");
                        return format!("Tool '{}' was rejected by the user.", call.name);
                    }
                }
                None => warn!(
                    tool = %call.name,
                    "Tool requires approval but no handler is set; auto-approving"
                ),
            }
        }

        info!(tool = %call.name, id = %call.id, "Executing tool");
        let default_timeout = Duration::from_secs(self.config.tool_timeout_secs);
        run_tool(tool.as_ref(), args, ctx, default_timeout).await
    }

    async fn chat_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        Arc::clone(
            locks
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn release_chat_lock(&self, chat_id: &str) {
        let mut locks = self.chat_locks.lock().await;
        if locks
            .get(chat_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(chat_id);
        }
    }
}

/// Whether `tool` may be offered on a turn handled by `specialist`.
fn in_scope(specialist: Option<&AgentSpec>, tool: &str) -> bool {
    specialist.map_or(true, |s| {
        s.tool_names.is_empty() || s.tool_names.iter().any(|t| t == tool)
    })
}

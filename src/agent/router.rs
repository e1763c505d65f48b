//! Specialist routing
//!
//! Picks the [`AgentSpec`] that handles a message. Keyword mode scores the
//! message against each agent's keywords; LLM mode asks the provider and
//! falls back to keywords when the call fails. Either way the result is a
//! registered agent, never an unknown name.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{AgentSpec, RoutingConfig, RoutingMode};
use crate::error::Result;
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::Message;

/// Name of the catch-all agent.
pub const GENERAL_AGENT: &str = "general";

const ROUTER_PROMPT: &str = r#"You are a routing agent. Decide which specialist agent should handle the user's message. Respond with ONLY a JSON object:

{"agent": "<agent_name>", "reasoning": "<brief explanation>"}

Available agents:
{agents}

If the message spans several domains, choose the most relevant primary agent. If no specialist fits, use "{default}"."#;

fn spec(name: &str, description: &str, prompt: &str, tools: &[&str], keywords: &[&str]) -> AgentSpec {
    AgentSpec {
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: prompt.to_string(),
        tool_names: tools.iter().map(|s| s.to_string()).collect(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
    }
}

/// Built-in specialists for data platform work. Order breaks keyword ties.
pub fn default_specs() -> Vec<AgentSpec> {
    const SCOPED: &[&str] = &["connector", "memory"];
    vec![
        spec(
            "sql",
            "Handles SQL queries, database schema exploration, and data analysis.",
            "You are a SQL expert. Help users write and run SQL queries, explore database schemas, and analyze results. Validate query safety and suggest optimizations.",
            SCOPED,
            &["sql", "query", "select", "join", "database", "column", "columns", "rows", "group by"],
        ),
        spec(
            "pipeline",
            "Manages data pipelines, Airflow DAGs, Spark jobs, and orchestration.",
            "You are a data pipeline expert. Help users manage Airflow DAGs, monitor Spark jobs, and debug or tune data workflows.",
            SCOPED,
            &["pipeline", "pipelines", "dag", "dags", "airflow", "spark", "job", "jobs", "backfill", "etl", "task"],
        ),
        spec(
            "quality",
            "Handles data quality checks, validation rules, and monitoring.",
            "You are a data quality expert. Help users define and run quality checks, set up monitoring rules, and diagnose data issues. Use SQL to validate data when needed.",
            SCOPED,
            &["quality", "validate", "validation", "null", "nulls", "duplicate", "duplicates", "freshness", "anomaly", "stale"],
        ),
        spec(
            "catalog",
            "Browses data catalogs, discovers schemas, and manages metadata.",
            "You are a data catalog expert. Help users discover tables, explore schemas and namespaces, and understand table relationships across Iceberg and other catalogs.",
            SCOPED,
            &["catalog", "iceberg", "glue", "unity", "metadata", "namespace", "namespaces", "lineage", "discover"],
        ),
        spec(
            "streaming",
            "Manages Kafka topics, consumer groups, schemas, and streaming pipelines.",
            "You are a streaming data expert. Help users manage Kafka topics, monitor consumer lag, and reason about streaming architecture.",
            SCOPED,
            &["kafka", "topic", "topics", "consumer", "lag", "partition", "partitions", "offset", "offsets", "streaming"],
        ),
        spec(
            GENERAL_AGENT,
            "General-purpose assistant for questions that don't fit other specialists.",
            "Answer general questions about the data platform and help users find their way around. You have access to all tools.",
            &[],
            &[],
        ),
    ]
}

/// Chooses a specialist for each message.
pub struct Router {
    agents: IndexMap<String, AgentSpec>,
    default_agent: String,
    llm: Option<(Arc<dyn LLMProvider>, Option<String>)>,
}

impl Router {
    /// Keyword router over `specs`. A default agent missing from `specs`
    /// is added as an unscoped general agent.
    pub fn new(specs: Vec<AgentSpec>, default_agent: &str) -> Self {
        let mut agents: IndexMap<String, AgentSpec> = specs
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        if !agents.contains_key(default_agent) {
            let mut fallback = default_specs()
                .into_iter()
                .find(|s| s.name == GENERAL_AGENT)
                .unwrap_or_default();
            fallback.name = default_agent.to_string();
            agents.insert(default_agent.to_string(), fallback);
        }
        Self {
            agents,
            default_agent: default_agent.to_string(),
            llm: None,
        }
    }

    pub fn from_config(config: &RoutingConfig, provider: Arc<dyn LLMProvider>) -> Self {
        let specs = if config.agents.is_empty() {
            default_specs()
        } else {
            config.agents.clone()
        };
        let router = Self::new(specs, &config.default_agent);
        match config.mode {
            RoutingMode::Keyword => router,
            RoutingMode::Llm => router.with_llm(provider, config.model.clone()),
        }
    }

    /// Ask `provider` to choose, using `model` or the provider default.
    pub fn with_llm(mut self, provider: Arc<dyn LLMProvider>, model: Option<String>) -> Self {
        self.llm = Some((provider, model));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    fn default_spec(&self) -> &AgentSpec {
        &self.agents[self.default_agent.as_str()]
    }

    pub async fn route(&self, content: &str) -> &AgentSpec {
        let chosen = match &self.llm {
            Some((provider, model)) => {
                match self.ask(provider.as_ref(), model.as_deref(), content).await {
                    Ok(reply) => self.parse_choice(&reply),
                    Err(e) => {
                        warn!(error = %e, "LLM routing failed, using keywords");
                        self.route_by_keywords(content)
                    }
                }
            }
            None => self.route_by_keywords(content),
        };
        info!(agent = %chosen.name, "Routed message");
        chosen
    }

    /// Highest keyword score wins; ties go to the earlier agent and a zero
    /// score goes to the default agent.
    pub fn route_by_keywords(&self, content: &str) -> &AgentSpec {
        let text = normalize(content);
        let mut best: Option<(&AgentSpec, usize)> = None;
        for spec in self.agents.values() {
            let score = spec
                .keywords
                .iter()
                .filter(|k| {
                    let k = normalize(k);
                    !k.trim().is_empty() && text.contains(&k)
                })
                .count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((spec, score));
            }
        }
        match best {
            Some((spec, score)) => {
                debug!(agent = %spec.name, score, "Keyword match");
                spec
            }
            None => self.default_spec(),
        }
    }

    async fn ask(
        &self,
        provider: &dyn LLMProvider,
        model: Option<&str>,
        content: &str,
    ) -> Result<String> {
        let listing = self
            .agents
            .values()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = ROUTER_PROMPT
            .replace("{agents}", &listing)
            .replace("{default}", &self.default_agent);
        let options = ChatOptions::new().with_max_tokens(200).with_temperature(0.0);
        let response = provider
            .chat(
                vec![Message::system(&prompt), Message::user(content)],
                Vec::new(),
                model,
                options,
            )
            .await?;
        Ok(response.content)
    }

    /// Read the router's answer: a JSON `{"agent": ..}` object, otherwise
    /// the first agent named in the text. Unknown names fall back to the
    /// default agent.
    fn parse_choice(&self, reply: &str) -> &AgentSpec {
        let reply = reply.trim();
        let name = if reply.starts_with('{') {
            serde_json::from_str::<Value>(reply)
                .ok()
                .and_then(|v| v.get("agent").and_then(Value::as_str).map(str::to_string))
        } else {
            let lower = reply.to_lowercase();
            self.agents
                .keys()
                .find(|name| lower.contains(&name.to_lowercase()))
                .cloned()
        };

        match name.as_deref().and_then(|n| self.agents.get(n)) {
            Some(spec) => spec,
            None => {
                warn!(choice = ?name, "Router chose an unknown agent, using default");
                self.default_spec()
            }
        }
    }
}

/// Lowercase words joined by single spaces, padded so `contains` matches
/// whole words and phrases.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabotError;
    use crate::providers::{LLMResponse, ToolDefinition};
    use async_trait::async_trait;

    struct FixedRouter(std::result::Result<String, String>);

    #[async_trait]
    impl LLMProvider for FixedRouter {
        async fn chat(
            &self,
            messages: Vec<Message>,
            tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            assert!(tools.is_empty());
            assert!(messages[0].content.contains("- streaming: "));
            match &self.0 {
                Ok(text) => Ok(LLMResponse::text(text)),
                Err(e) => Err(DatabotError::Provider(e.clone())),
            }
        }

        fn default_model(&self) -> &str {
            "router"
        }

        fn name(&self) -> &str {
            "router"
        }
    }

    fn keyword_router() -> Router {
        Router::new(default_specs(), GENERAL_AGENT)
    }

    fn llm_router(reply: std::result::Result<&str, &str>) -> Router {
        let provider = FixedRouter(reply.map(str::to_string).map_err(str::to_string));
        keyword_router().with_llm(Arc::new(provider), None)
    }

    #[test]
    fn test_keyword_routing() {
        let router = keyword_router();
        let cases = [
            ("Run a SQL query to count rows in orders", "sql"),
            ("Why did the Airflow DAG fail last night?", "pipeline"),
            ("Check for duplicates and nulls in users", "quality"),
            ("Which Iceberg namespaces are in the catalog?", "catalog"),
            ("What is the consumer lag on the payments topic?", "streaming"),
            ("hello there", "general"),
        ];
        for (message, expected) in cases {
            assert_eq!(router.route_by_keywords(message).name, expected, "{message}");
        }
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let router = keyword_router();
        // "lag" inside "flag", "job" inside "jobless"
        assert_eq!(router.route_by_keywords("flag the jobless rate").name, "general");
        assert_eq!(router.route_by_keywords("GROUP  BY region").name, "sql");
    }

    #[test]
    fn test_missing_default_agent_is_added() {
        let only_sql: Vec<AgentSpec> = default_specs().into_iter().take(1).collect();
        let router = Router::new(only_sql, "fallback");
        assert_eq!(router.names(), vec!["sql", "fallback"]);
        let fallback = router.route_by_keywords("good morning");
        assert_eq!(fallback.name, "fallback");
        assert!(fallback.tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_llm_json_choice() {
        let router = llm_router(Ok(r#"{"agent": "catalog", "reasoning": "metadata"}"#));
        assert_eq!(router.route("run a sql query").await.name, "catalog");
    }

    #[tokio::test]
    async fn test_llm_free_text_choice() {
        let router = llm_router(Ok("I'd send this to the streaming agent."));
        assert_eq!(router.route("anything").await.name, "streaming");
    }

    #[tokio::test]
    async fn test_llm_unknown_agent_uses_default() {
        let router = llm_router(Ok(r#"{"agent": "finance"}"#));
        assert_eq!(router.route("run a sql query").await.name, "general");
        let router = llm_router(Ok("{not json"));
        assert_eq!(router.route("run a sql query").await.name, "general");
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_keywords() {
        let router = llm_router(Err("rate limited"));
        assert_eq!(router.route("kafka topic offsets").await.name, "streaming");
    }

    #[test]
    fn test_from_config() {
        let config = RoutingConfig {
            enabled: true,
            agents: vec![AgentSpec {
                name: "ops".into(),
                keywords: vec!["restart".into()],
                ..AgentSpec::default()
            }],
            ..RoutingConfig::default()
        };
        let router = Router::from_config(&config, Arc::new(FixedRouter(Ok(String::new()))));
        assert_eq!(router.names(), vec!["ops", "general"]);
        assert_eq!(router.route_by_keywords("please restart it").name, "ops");
        assert!(router.get("sql").is_none());
    }
}

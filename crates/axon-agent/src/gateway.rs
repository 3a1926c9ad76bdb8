//! Multi-provider LLM gateway: registry, model routing, and fallback.
//!
//! A model reference may be written `provider/model` to pin the provider;
//! bare ids resolve to the first registered provider that owns the id (or
//! a `*` wildcard), falling back to the default provider. On failure the
//! gateway retries alternative models of the same provider, then the
//! remaining providers in ascending priority, never repeating a
//! (provider, model) pair.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{info, warn};

use axon_core::types::{GenerationConfig, LlmMessage, ModelDescriptor};

use crate::provider::{LlmResponse, Provider, ToolDefinition};

/// One registered backend.
pub struct ProviderEntry {
    pub adapter: Arc<dyn Provider>,
    /// Model ids this provider owns; `"*"` claims any id.
    pub models: Vec<String>,
    /// Lower is more preferred during fallback.
    pub priority: u32,
    pub descriptors: Vec<ModelDescriptor>,
}

/// A routable (provider, descriptor) pair handed to the model router.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub provider: String,
    pub provider_priority: u32,
    pub descriptor: ModelDescriptor,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no providers registered")]
    NoProviders,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("all providers failed: {summary}")]
    AllFailed { summary: String },
}

/// Registry of LLM backends with routing and fallback.
pub struct LlmGateway {
    providers: DashMap<String, ProviderEntry>,
    default_provider: RwLock<Option<String>>,
    fallback_enabled: bool,
}

impl LlmGateway {
    pub fn new(fallback_enabled: bool) -> Self {
        Self {
            providers: DashMap::new(),
            default_provider: RwLock::new(None),
            fallback_enabled,
        }
    }

    /// Insert or replace a provider registration.
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        adapter: Arc<dyn Provider>,
        models: Vec<String>,
        priority: u32,
        descriptors: Vec<ModelDescriptor>,
    ) {
        let name = name.into();
        info!(provider = %name, priority, models = models.len(), "registering provider");
        self.providers.insert(
            name,
            ProviderEntry {
                adapter,
                models,
                priority,
                descriptors,
            },
        );
    }

    /// Provider used when a model id resolves nowhere. Unset falls back to
    /// the highest-priority registration.
    pub fn set_default_provider(&self, name: impl Into<String>) {
        *self.default_provider.write().unwrap() = Some(name.into());
    }

    /// All registered descriptors, for the model router.
    pub fn candidates(&self) -> Vec<RouteCandidate> {
        let mut out = Vec::new();
        for entry in self.providers.iter() {
            for descriptor in &entry.descriptors {
                out.push(RouteCandidate {
                    provider: entry.key().clone(),
                    provider_priority: entry.priority,
                    descriptor: descriptor.clone(),
                });
            }
        }
        out
    }

    /// Descriptor for a (provider, model), falling back to the adapter's
    /// own knowledge for unregistered ids.
    pub fn descriptor_for(&self, provider: &str, model: &str) -> Option<ModelDescriptor> {
        let entry = self.providers.get(provider)?;
        Some(
            entry
                .descriptors
                .iter()
                .find(|d| d.id == model)
                .cloned()
                .unwrap_or_else(|| entry.adapter.model_capabilities(model)),
        )
    }

    /// Provider names sorted by ascending priority, name as tie-break.
    fn providers_by_priority(&self) -> Vec<String> {
        let mut named: Vec<(String, u32)> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.priority))
            .collect();
        named.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        named.into_iter().map(|(n, _)| n).collect()
    }

    fn default_provider_name(&self) -> Result<String, GatewayError> {
        if let Some(name) = self.default_provider.read().unwrap().clone() {
            return Ok(name);
        }
        self.providers_by_priority()
            .into_iter()
            .next()
            .ok_or(GatewayError::NoProviders)
    }

    /// Resolve an optional model reference into a (provider, model) pair.
    ///
    /// A `provider/` prefix pins the provider when it names a registered
    /// one; otherwise the whole reference is treated as a bare model id
    /// (ids like `meta-llama/...` stay intact).
    pub fn resolve(&self, model: Option<&str>) -> Result<(String, String), GatewayError> {
        let reference = match model {
            Some(r) => r.to_string(),
            None => {
                let provider = self.default_provider_name()?;
                let entry = self
                    .providers
                    .get(&provider)
                    .ok_or_else(|| GatewayError::UnknownProvider(provider.clone()))?;
                let model_id = entry.adapter.default_model();
                return Ok((provider, model_id));
            }
        };

        if let Some((provider, model_id)) = reference.split_once('/') {
            if self.providers.contains_key(provider) {
                return Ok((provider.to_string(), model_id.to_string()));
            }
        }

        for name in self.providers_by_priority() {
            let Some(entry) = self.providers.get(&name) else {
                continue;
            };
            if entry.models.iter().any(|m| m == &reference || m == "*") {
                return Ok((name, reference));
            }
        }
        let provider = self.default_provider_name()?;
        Ok((provider, reference))
    }

    /// Send a chat request, falling back across models and providers.
    pub async fn chat(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        model: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<LlmResponse, GatewayError> {
        let (primary_provider, primary_model) = self.resolve(model)?;

        let mut attempted: HashSet<(String, String)> = HashSet::new();
        let mut failures: Vec<String> = Vec::new();

        match self
            .attempt(&primary_provider, &primary_model, messages, tools, config, &mut attempted)
            .await
        {
            Ok(resp) => return Ok(resp),
            Err(reason) => failures.push(reason),
        }

        if !self.fallback_enabled {
            return Err(GatewayError::AllFailed {
                summary: failures.join("; "),
            });
        }

        // Same provider, alternative models: registered list plus whatever
        // the adapter reports, minus anything already tried.
        let mut alternatives: Vec<String> = Vec::new();
        if let Some(entry) = self.providers.get(&primary_provider) {
            for m in &entry.models {
                if m != "*" && !alternatives.contains(m) {
                    alternatives.push(m.clone());
                }
            }
            let adapter = Arc::clone(&entry.adapter);
            drop(entry);
            if let Some(listed) = adapter.list_models().await {
                for m in listed {
                    if !alternatives.contains(&m) {
                        alternatives.push(m);
                    }
                }
            }
        }
        for alt in alternatives {
            if attempted.contains(&(primary_provider.clone(), alt.clone())) {
                continue;
            }
            match self
                .attempt(&primary_provider, &alt, messages, tools, config, &mut attempted)
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(reason) => failures.push(reason),
            }
        }

        // Remaining providers in ascending priority.
        for name in self.providers_by_priority() {
            if name == primary_provider {
                continue;
            }
            let model_id = {
                let Some(entry) = self.providers.get(&name) else {
                    continue;
                };
                // A provider claiming the requested model retries it;
                // otherwise it answers with its own default.
                if entry.models.iter().any(|m| m == &primary_model) {
                    primary_model.clone()
                } else {
                    entry.adapter.default_model()
                }
            };
            if attempted.contains(&(name.clone(), model_id.clone())) {
                continue;
            }
            match self
                .attempt(&name, &model_id, messages, tools, config, &mut attempted)
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(reason) => failures.push(reason),
            }
        }

        Err(GatewayError::AllFailed {
            summary: failures.join("; "),
        })
    }

    /// One (provider, model) attempt. Records the pair so fallback never
    /// repeats it; returns a short failure reason on error.
    async fn attempt(
        &self,
        provider: &str,
        model: &str,
        messages: &[LlmMessage],
        tools: &[ToolDefinition],
        config: &GenerationConfig,
        attempted: &mut HashSet<(String, String)>,
    ) -> Result<LlmResponse, String> {
        attempted.insert((provider.to_string(), model.to_string()));

        let (adapter, descriptor) = {
            let entry = match self.providers.get(provider) {
                Some(e) => e,
                None => return Err(format!("{provider}/{model}: provider not registered")),
            };
            let descriptor = entry
                .descriptors
                .iter()
                .find(|d| d.id == model)
                .cloned()
                .unwrap_or_else(|| entry.adapter.model_capabilities(model));
            (Arc::clone(&entry.adapter), descriptor)
        };

        // Model descriptor defaults override agent-level generation config.
        let effective = config.merged(&descriptor.defaults);

        match adapter.chat(messages, tools, model, &effective).await {
            Ok(mut resp) => {
                resp.used_provider = provider.to_string();
                resp.used_model = model.to_string();
                resp.level = Some(descriptor.level);
                Ok(resp)
            }
            Err(e) => {
                warn!(provider, model, error = %e, transient = e.is_transient(), "chat attempt failed");
                Err(format!("{provider}/{model}: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderErrorKind, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysOk {
        name: String,
        model: String,
        calls: AtomicUsize,
    }

    impl AlwaysOk {
        fn new(name: &str, model: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                model: model.into(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for AlwaysOk {
        fn name(&self) -> &str {
            &self.name
        }
        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _tools: &[ToolDefinition],
            model: &str,
            _config: &GenerationConfig,
        ) -> Result<LlmResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(LlmResponse {
                content: "ok".into(),
                tool_calls: Vec::new(),
                usage: Some(Usage::default()),
                used_provider: self.name.clone(),
                used_model: model.to_string(),
                level: None,
            })
        }
        fn default_model(&self) -> String {
            self.model.clone()
        }
    }

    struct AlwaysFail {
        name: String,
        model: String,
        listed: Option<Vec<String>>,
        calls: AtomicUsize,
    }

    impl AlwaysFail {
        fn new(name: &str, model: &str, listed: Option<Vec<String>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                model: model.into(),
                listed,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for AlwaysFail {
        fn name(&self) -> &str {
            &self.name
        }
        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _tools: &[ToolDefinition],
            _model: &str,
            _config: &GenerationConfig,
        ) -> Result<LlmResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(ProviderError::new(
                ProviderErrorKind::Server,
                "intentional failure",
            ))
        }
        fn default_model(&self) -> String {
            self.model.clone()
        }
        async fn list_models(&self) -> Option<Vec<String>> {
            self.listed.clone()
        }
    }

    fn messages() -> Vec<LlmMessage> {
        vec![LlmMessage::user("hello")]
    }

    #[tokio::test]
    async fn fallback_to_second_provider() {
        let gateway = LlmGateway::new(true);
        let a = AlwaysFail::new("A", "m1", None);
        let b = AlwaysOk::new("B", "m2");
        gateway.register_provider("A", a.clone(), vec!["m1".into()], 1, Vec::new());
        gateway.register_provider("B", b.clone(), vec!["m2".into()], 2, Vec::new());

        let resp = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(resp.used_provider, "B");
        assert_eq!(resp.used_model, "m2");
        assert_eq!(a.calls.load(Ordering::Relaxed), 1);
        assert_eq!(b.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn alternative_models_of_same_provider_tried_first() {
        let gateway = LlmGateway::new(true);
        let a = AlwaysFail::new("A", "m1", Some(vec!["m1".into(), "m1-mini".into()]));
        let b = AlwaysOk::new("B", "m2");
        gateway.register_provider("A", a.clone(), vec!["m1".into()], 1, Vec::new());
        gateway.register_provider("B", b.clone(), vec!["m2".into()], 2, Vec::new());

        let resp = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap();
        // m1 then m1-mini on A, then B.
        assert_eq!(a.calls.load(Ordering::Relaxed), 2);
        assert_eq!(resp.used_provider, "B");
    }

    #[tokio::test]
    async fn each_pair_attempted_at_most_once() {
        let gateway = LlmGateway::new(true);
        // The adapter lists the same id the registry already owns; the
        // duplicate must not produce a second attempt.
        let a = AlwaysFail::new("A", "m1", Some(vec!["m1".into()]));
        gateway.register_provider("A", a.clone(), vec!["m1".into()], 1, Vec::new());

        let err = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(a.calls.load(Ordering::Relaxed), 1);
        assert!(matches!(err, GatewayError::AllFailed { .. }));
    }

    #[tokio::test]
    async fn aggregated_error_lists_each_attempt() {
        let gateway = LlmGateway::new(true);
        let a = AlwaysFail::new("A", "m1", None);
        let b = AlwaysFail::new("B", "m2", None);
        gateway.register_provider("A", a, vec!["m1".into()], 1, Vec::new());
        gateway.register_provider("B", b, vec!["m2".into()], 2, Vec::new());

        let err = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap_err();
        let summary = err.to_string();
        assert!(summary.contains("A/m1"));
        assert!(summary.contains("B/m2"));
        assert!(summary.contains("intentional failure"));
    }

    #[tokio::test]
    async fn pinned_provider_reference() {
        let gateway = LlmGateway::new(true);
        let a = AlwaysOk::new("A", "m1");
        let b = AlwaysOk::new("B", "m2");
        gateway.register_provider("A", a, vec!["*".into()], 1, Vec::new());
        gateway.register_provider("B", b.clone(), vec!["m2".into()], 2, Vec::new());

        let resp = gateway
            .chat(&messages(), &[], Some("B/custom"), &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(resp.used_provider, "B");
        assert_eq!(resp.used_model, "custom");
    }

    #[tokio::test]
    async fn slashed_ids_without_a_matching_provider_stay_intact() {
        let gateway = LlmGateway::new(true);
        gateway.register_provider(
            "router",
            AlwaysOk::new("router", "default"),
            vec!["meta-llama/Llama-3.3".into()],
            1,
            Vec::new(),
        );
        let (provider, model) = gateway.resolve(Some("meta-llama/Llama-3.3")).unwrap();
        assert_eq!(provider, "router");
        assert_eq!(model, "meta-llama/Llama-3.3");
    }

    #[tokio::test]
    async fn fallback_disabled_stops_after_primary() {
        let gateway = LlmGateway::new(false);
        let a = AlwaysFail::new("A", "m1", None);
        let b = AlwaysOk::new("B", "m2");
        gateway.register_provider("A", a, vec!["m1".into()], 1, Vec::new());
        gateway.register_provider("B", b.clone(), vec!["m2".into()], 2, Vec::new());

        let err = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AllFailed { .. }));
        assert_eq!(b.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn wildcard_provider_claims_bare_ids() {
        let gateway = LlmGateway::new(true);
        gateway.register_provider(
            "local",
            AlwaysOk::new("local", "default"),
            vec!["*".into()],
            5,
            Vec::new(),
        );
        let (provider, model) = gateway.resolve(Some("anything")).unwrap();
        assert_eq!(provider, "local");
        assert_eq!(model, "anything");
    }

    #[tokio::test]
    async fn level_attached_from_descriptor() {
        use axon_core::types::{ModelCapabilities, ModelLevel};
        let gateway = LlmGateway::new(true);
        gateway.register_provider(
            "A",
            AlwaysOk::new("A", "m1"),
            vec!["m1".into()],
            1,
            vec![ModelDescriptor {
                id: "m1".into(),
                provider: "A".into(),
                capabilities: ModelCapabilities {
                    vision: false,
                    reasoning: true,
                    tools: true,
                },
                level: ModelLevel::High,
                defaults: GenerationConfig::default(),
            }],
        );

        let resp = gateway
            .chat(&messages(), &[], Some("m1"), &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(resp.level, Some(ModelLevel::High));
    }
}

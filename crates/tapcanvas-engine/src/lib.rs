//! Response-finalization engine for the canvas-authoring assistant.
//!
//! One call to [`TurnEngine::run_turn`] drives the whole turn: role
//! selection, optional knowledge-base retrieval, the tool-calling generation
//! request, and the deterministic post-generation passes (normalizer,
//! continuity linker, safety gate, sequencer, assembler). Every stage is
//! total; a turn always produces a `GenerationResult`.

pub mod assemble;
pub mod config;
pub mod continuity;
pub mod decoder;
pub mod gate;
pub mod gateway;
pub mod invoker;
pub mod normalize;
pub mod openai;
pub mod prompts;
pub mod retrieval;
pub mod sequence;
pub mod text;
pub mod tools;

use serde_json::Value;

use tapcanvas_contracts::canvas::CanvasSnapshot;
use tapcanvas_contracts::conversation::Conversation;
use tapcanvas_contracts::events::{EventPayload, EventWriter};
use tapcanvas_contracts::research::RetrievalResult;
use tapcanvas_contracts::roles::{RoleRegistry, ART_DIRECTOR_ROLE_ID, DEFAULT_ROLE_ID};
use tapcanvas_contracts::turn::GenerationResult;

use crate::config::EngineConfig;
use crate::continuity::ContinuityContext;
use crate::decoder::{RoleDecision, StructuredDecoder};
use crate::gateway::{CompletionRequest, ModelGateway};
use crate::invoker::GenerationInvoker;
use crate::openai::OpenAiGateway;
use crate::retrieval::{AutoRagGateway, NullRetrieval, RetrievalGateway};

/// Per-turn input. Both are owned by the caller and read-only here.
pub struct TurnInput<'a> {
    pub conversation: &'a Conversation,
    pub snapshot: &'a CanvasSnapshot,
}

pub struct TurnEngine {
    config: EngineConfig,
    roles: RoleRegistry,
    gateway: Box<dyn ModelGateway>,
    retrieval: Box<dyn RetrievalGateway>,
    events: EventWriter,
}

impl TurnEngine {
    pub fn new(
        config: EngineConfig,
        roles: RoleRegistry,
        gateway: Box<dyn ModelGateway>,
        retrieval: Box<dyn RetrievalGateway>,
        events: EventWriter,
    ) -> Self {
        Self {
            config,
            roles,
            gateway,
            retrieval,
            events,
        }
    }

    /// Build an engine from environment configuration. The provider name
    /// selects the gateway; everything else keeps defaults.
    pub fn from_env(events: EventWriter) -> Self {
        let config = EngineConfig::from_env();
        let gateway: Box<dyn ModelGateway> = if config.llm_provider.eq_ignore_ascii_case("dryrun")
        {
            Box::new(gateway::DryrunGateway)
        } else {
            Box::new(OpenAiGateway::new())
        };
        let retrieval: Box<dyn RetrievalGateway> = match (
            config.retrieval_enabled(),
            config.autorag_endpoint.as_deref(),
            config.autorag_id.as_deref(),
        ) {
            (true, Some(endpoint), Some(rag_id)) => {
                Box::new(AutoRagGateway::new(endpoint, rag_id))
            }
            _ => Box::new(NullRetrieval),
        };
        Self::new(config, RoleRegistry::default(), gateway, retrieval, events)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_answer_model(&mut self, model: impl Into<String>) {
        self.config.answer_model = model.into();
    }

    /// Swap the event writer, e.g. to stamp each turn of an interactive
    /// session with its own turn id.
    pub fn set_event_writer(&mut self, events: EventWriter) {
        self.events = events;
    }

    pub fn run_turn(&self, input: &TurnInput<'_>) -> GenerationResult {
        let canvas_context = input.snapshot.context_json();
        let decision = self.select_role(input.conversation, &canvas_context);
        let retrieved = self.retrieve(input.conversation);
        self.generate(input, &decision, &retrieved, &canvas_context)
    }

    fn select_role(&self, conversation: &Conversation, canvas_context: &str) -> RoleDecision {
        let prompt = prompts::role_router_prompt(
            &self.roles.prompt_block(),
            DEFAULT_ROLE_ID,
            &conversation.format_for_prompt(),
            canvas_context,
        );
        let decoder = StructuredDecoder::new(self.gateway.as_ref(), &self.roles, &self.events);
        let decision: RoleDecision =
            decoder.decode(&self.config.role_selector_model, &prompt);

        let resolved = self.roles.resolve(&decision.role_id);
        let mut payload = EventPayload::new();
        payload.insert("role".to_string(), Value::String(resolved.id.clone()));
        payload.insert(
            "allow_canvas_tools".to_string(),
            Value::Bool(decision.allow_canvas_tools),
        );
        payload.insert(
            "allow_reason".to_string(),
            Value::String(decision.allow_canvas_tools_reason.clone()),
        );
        self.events.emit_lossy("role_selected", payload);
        decision
    }

    fn retrieve(&self, conversation: &Conversation) -> RetrievalResult {
        if !self.config.retrieval_enabled() {
            return RetrievalResult::default();
        }
        let query = conversation.research_topic();
        let result = self.retrieval.search(&query);
        if !result.is_empty() {
            let mut payload = EventPayload::new();
            payload.insert(
                "snippets".to_string(),
                Value::Number(result.snippets.len().into()),
            );
            payload.insert(
                "sources".to_string(),
                Value::Number(result.sources.len().into()),
            );
            self.events.emit_lossy("kb_retrieved", payload);
        }
        result
    }

    fn generate(
        &self,
        input: &TurnInput<'_>,
        decision: &RoleDecision,
        retrieved: &RetrievalResult,
        canvas_context: &str,
    ) -> GenerationResult {
        let role = self.roles.resolve(&decision.role_id);
        let director = self.roles.resolve(ART_DIRECTOR_ROLE_ID);
        let reason = if decision.reason.trim().is_empty() {
            "基于对话意图的默认选择。"
        } else {
            decision.reason.as_str()
        };
        let directive = prompts::role_directive(role, director, reason);
        let prompt = prompts::answer_prompt(
            &prompts::current_date(),
            &input.conversation.research_topic(),
            &directive,
            &retrieved.snippets.join("\n---\n\n"),
            canvas_context,
        );
        let request = CompletionRequest {
            model: self.config.answer_model.clone(),
            prompt,
            tools: tools::canvas_tool_definitions(),
            tool_choice: "auto".to_string(),
        };

        let user_text = input.conversation.latest_user_text();
        let draft = GenerationInvoker::new(self.gateway.as_ref(), &self.events).invoke(&request);
        let normalized = normalize::normalize_draft(draft);
        // When canvas tools are disallowed the whole batch gets cleared, so
        // continuity linking (and its confirmation messaging) must not run.
        let linked = if decision.allow_canvas_tools {
            continuity::link(
                normalized,
                &ContinuityContext {
                    user_text,
                    snapshot: input.snapshot,
                },
            )
        } else {
            continuity::LinkedDraft::from(normalized)
        };
        let gated = gate::apply(linked, user_text, decision.allow_canvas_tools);
        let sequenced = sequence::sequence(gated);
        let result = assemble::assemble(sequenced, role, reason, &retrieved.sources);

        let mut payload = EventPayload::new();
        payload.insert("role".to_string(), Value::String(result.active_role.clone()));
        payload.insert(
            "tool_calls".to_string(),
            Value::Number(result.tool_calls.len().into()),
        );
        payload.insert(
            "quick_replies".to_string(),
            Value::Number(result.quick_replies.len().into()),
        );
        if let Some(error) = &result.error {
            payload.insert("error_kind".to_string(), Value::String(error.kind.clone()));
        }
        self.events.emit_lossy("turn_completed", payload);
        result
    }
}

use serde_json::{json, Value};
use thiserror::Error;

/// Failure taxonomy for model-gateway calls. `Configuration` is fatal for the
/// turn (fixed user-facing message, no retry); `Provider` is recovered locally
/// by the calling stage.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("provider: {0}")]
    Provider(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Provider(_) => "provider",
        }
    }
}

/// Schema-constrained decode request (Responses API `json_schema` format).
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: String,
    pub prompt: String,
    pub schema_name: String,
    pub schema: Value,
    pub strict: bool,
}

/// Function tool exposed to the model, in the flat Responses API shape.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn to_payload(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "strict": false,
            "parameters": self.parameters,
        })
    }
}

/// Free-form tool-calling generation request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

/// Wire-level streaming event union. A call identifier may be aliased across
/// an item id and a call id; consumers reconcile via the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallAdded {
        item_id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallArgumentsDelta {
        item_id: String,
        delta: String,
    },
    ToolCallArgumentsDone {
        item_id: String,
        arguments: String,
    },
    Completed,
}

pub type TextStream = Box<dyn Iterator<Item = Result<String, GatewayError>>>;
pub type EventStream = Box<dyn Iterator<Item = Result<StreamEvent, GatewayError>>>;

/// External model gateway. Implementations stream; the engine accumulates.
pub trait ModelGateway {
    /// Schema-constrained decode attempt; the returned text is expected (but
    /// not guaranteed) to parse as the requested schema.
    fn stream_structured(&self, request: &StructuredRequest) -> Result<TextStream, GatewayError>;

    /// Plain-mode retry without schema constraints.
    fn stream_plain(&self, model: &str, prompt: &str) -> Result<TextStream, GatewayError>;

    /// Tool-calling generation stream.
    fn stream_completion(&self, request: &CompletionRequest) -> Result<EventStream, GatewayError>;
}

/// Offline gateway producing deterministic output: structured requests get a
/// minimal schema-valid document, completions echo the prompt head. Keeps the
/// whole pipeline runnable without provider credentials.
pub struct DryrunGateway;

impl DryrunGateway {
    fn structured_document(request: &StructuredRequest) -> String {
        match request.schema_name.as_str() {
            "SearchQueryList" => json!({
                "query": [request.prompt.clone()],
                "rationale": "dryrun echo",
            })
            .to_string(),
            "Reflection" => json!({
                "is_sufficient": true,
                "knowledge_gap": "",
                "follow_up_queries": [],
            })
            .to_string(),
            "RoleDecision" => json!({
                "role_id": "creative_assistant",
                "role_name": "创意助理",
                "reason": "dryrun 默认角色。",
                "allow_canvas_tools": true,
                "allow_canvas_tools_reason": "dryrun 默认允许。",
            })
            .to_string(),
            _ => "{}".to_string(),
        }
    }
}

impl ModelGateway for DryrunGateway {
    fn stream_structured(&self, request: &StructuredRequest) -> Result<TextStream, GatewayError> {
        let document = Self::structured_document(request);
        Ok(Box::new(std::iter::once(Ok(document))))
    }

    fn stream_plain(&self, _model: &str, prompt: &str) -> Result<TextStream, GatewayError> {
        let head: String = prompt.chars().take(80).collect();
        Ok(Box::new(std::iter::once(Ok(head))))
    }

    fn stream_completion(&self, request: &CompletionRequest) -> Result<EventStream, GatewayError> {
        let head: String = request.prompt.chars().take(80).collect();
        let events = vec![
            Ok(StreamEvent::TextDelta(format!("（离线演练）已收到：{head}"))),
            Ok(StreamEvent::Completed),
        ];
        Ok(Box::new(events.into_iter()))
    }
}

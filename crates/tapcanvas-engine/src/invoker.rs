use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use tapcanvas_contracts::events::{debug_enabled, EventPayload, EventWriter};
use tapcanvas_contracts::toolcall::RawToolCall;
use tapcanvas_contracts::turn::LlmErrorInfo;

use crate::gateway::{CompletionRequest, GatewayError, ModelGateway, StreamEvent};
use crate::text::clamp_chars;

pub const CONFIGURATION_ERROR_TEXT: &str =
    "无法生成最终答案：后端未配置模型密钥（请检查 OPENAI_API_KEY）。";

/// Output of the generation call before any validation or post-processing.
#[derive(Debug, Clone, Default)]
pub struct GenerationDraft {
    pub text: String,
    pub raw_calls: Vec<RawToolCall>,
    pub error: Option<LlmErrorInfo>,
}

#[derive(Debug, Default)]
struct PendingCall {
    name: Option<String>,
    arguments: String,
}

/// Reduces the tool-calling event stream to `(text, raw calls)`.
///
/// A call may be addressed by its item id or its call id; the alias table maps
/// both onto the primary (call) id. Merge semantics: the latest non-empty name
/// wins, arguments concatenate on delta and are overwritten on done. Calls
/// that never receive a name are dropped.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    calls: IndexMap<String, PendingCall>,
    alias: HashMap<String, String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => self.text.push_str(&delta),
            StreamEvent::ToolCallAdded {
                item_id,
                call_id,
                name,
                arguments,
            } => {
                if call_id.is_empty() {
                    return;
                }
                self.alias.insert(call_id.clone(), call_id.clone());
                if !item_id.is_empty() {
                    self.alias.insert(item_id, call_id.clone());
                }
                let entry = self.calls.entry(call_id).or_default();
                if !name.is_empty() {
                    entry.name = Some(name);
                }
                if !arguments.is_empty() {
                    entry.arguments = arguments;
                }
            }
            StreamEvent::ToolCallArgumentsDelta { item_id, delta } => {
                if item_id.is_empty() {
                    return;
                }
                let primary = self.primary_id(&item_id);
                let entry = self.calls.entry(primary).or_default();
                entry.arguments.push_str(&delta);
            }
            StreamEvent::ToolCallArgumentsDone { item_id, arguments } => {
                if item_id.is_empty() {
                    return;
                }
                let primary = self.primary_id(&item_id);
                let entry = self.calls.entry(primary).or_default();
                entry.arguments = arguments;
            }
            StreamEvent::Completed => {}
        }
    }

    fn primary_id(&self, id: &str) -> String {
        self.alias.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn finish(self) -> (String, Vec<RawToolCall>) {
        let mut raw_calls = Vec::new();
        for (id, call) in self.calls {
            let Some(name) = call.name.filter(|name| !name.is_empty()) else {
                continue;
            };
            let arguments = if call.arguments.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                match serde_json::from_str(&call.arguments) {
                    Ok(parsed) => parsed,
                    // Malformed argument JSON is carried raw; validation
                    // happens in the normalizer.
                    Err(_) => Value::String(call.arguments),
                }
            };
            raw_calls.push(RawToolCall {
                id,
                name,
                arguments,
            });
        }
        (self.text, raw_calls)
    }
}

/// Drives the tool-calling generation request. Total: provider failure turns
/// into a user-facing diagnostic draft, never a propagated error.
pub struct GenerationInvoker<'a> {
    gateway: &'a dyn ModelGateway,
    events: &'a EventWriter,
}

impl<'a> GenerationInvoker<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, events: &'a EventWriter) -> Self {
        Self { gateway, events }
    }

    pub fn invoke(&self, request: &CompletionRequest) -> GenerationDraft {
        let stream = match self.gateway.stream_completion(request) {
            Ok(stream) => stream,
            Err(err) => return self.draft_from_error(err),
        };

        let mut accumulator = StreamAccumulator::new();
        let mut stream_error: Option<GatewayError> = None;
        for event in stream {
            match event {
                Ok(event) => accumulator.apply(event),
                Err(err) => {
                    stream_error = Some(err);
                    break;
                }
            }
        }

        let (text, raw_calls) = accumulator.finish();
        if debug_enabled() {
            let mut payload = EventPayload::new();
            payload.insert("text".to_string(), Value::String(clamp_chars(&text, 2000)));
            payload.insert(
                "tool_calls".to_string(),
                Value::Number(raw_calls.len().into()),
            );
            self.events.emit_lossy("generation_stream", payload);
        }

        match stream_error {
            None => GenerationDraft {
                text,
                raw_calls,
                error: None,
            },
            Some(err) => {
                let mut draft = self.draft_from_error(err);
                // Keep whatever arrived before the stream broke.
                if !text.is_empty() {
                    draft.text = text;
                }
                draft.raw_calls = raw_calls;
                draft
            }
        }
    }

    fn draft_from_error(&self, err: GatewayError) -> GenerationDraft {
        self.events.emit_lossy("generation_error", {
            let mut payload = EventPayload::new();
            payload.insert("kind".to_string(), Value::String(err.kind().to_string()));
            payload.insert("error".to_string(), Value::String(err.to_string()));
            payload
        });
        let text = match &err {
            GatewayError::Configuration(_) => CONFIGURATION_ERROR_TEXT.to_string(),
            GatewayError::Provider(message) => {
                format!("无法生成最终答案：模型接口异常（{}）。", clamp_chars(message, 200))
            }
        };
        GenerationDraft {
            text,
            raw_calls: Vec::new(),
            error: Some(LlmErrorInfo::new(err.kind(), err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::gateway::{EventStream, StructuredRequest, TextStream};

    use super::*;

    #[test]
    fn alias_table_merges_delta_and_done_onto_call_id() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: "item_1".to_string(),
            call_id: "call_1".to_string(),
            name: "createNode".to_string(),
            arguments: String::new(),
        });
        acc.apply(StreamEvent::ToolCallArgumentsDelta {
            item_id: "item_1".to_string(),
            delta: "{\"type\":\"image\",".to_string(),
        });
        acc.apply(StreamEvent::ToolCallArgumentsDelta {
            item_id: "item_1".to_string(),
            delta: "\"label\":\"Fox\"}".to_string(),
        });
        let (_, calls) = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"type": "image", "label": "Fox"}));
    }

    #[test]
    fn done_overwrites_partial_arguments() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: "item_1".to_string(),
            call_id: "call_1".to_string(),
            name: "runNode".to_string(),
            arguments: "{\"nodeId\":\"partial".to_string(),
        });
        acc.apply(StreamEvent::ToolCallArgumentsDone {
            item_id: "item_1".to_string(),
            arguments: "{\"nodeId\":\"Fox\"}".to_string(),
        });
        let (_, calls) = acc.finish();
        assert_eq!(calls[0].arguments, json!({"nodeId": "Fox"}));
    }

    #[test]
    fn nameless_calls_are_dropped_and_empty_args_become_object() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallArgumentsDelta {
            item_id: "orphan".to_string(),
            delta: "{}".to_string(),
        });
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: String::new(),
            call_id: "call_2".to_string(),
            name: "runNode".to_string(),
            arguments: String::new(),
        });
        let (_, calls) = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "runNode");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn malformed_arguments_pass_through_raw() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: "item_1".to_string(),
            call_id: "call_1".to_string(),
            name: "updateNode".to_string(),
            arguments: "{not json".to_string(),
        });
        let (_, calls) = acc.finish();
        assert_eq!(calls[0].arguments, Value::String("{not json".to_string()));
    }

    #[test]
    fn latest_non_empty_name_wins() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: "item_1".to_string(),
            call_id: "call_1".to_string(),
            name: String::new(),
            arguments: String::new(),
        });
        acc.apply(StreamEvent::ToolCallAdded {
            item_id: "item_1".to_string(),
            call_id: "call_1".to_string(),
            name: "connectNodes".to_string(),
            arguments: String::new(),
        });
        let (_, calls) = acc.finish();
        assert_eq!(calls[0].name, "connectNodes");
    }

    struct FailingGateway(GatewayError);

    impl ModelGateway for FailingGateway {
        fn stream_structured(
            &self,
            _request: &StructuredRequest,
        ) -> Result<TextStream, GatewayError> {
            Err(GatewayError::Provider("unused".to_string()))
        }

        fn stream_plain(&self, _model: &str, _prompt: &str) -> Result<TextStream, GatewayError> {
            Err(GatewayError::Provider("unused".to_string()))
        }

        fn stream_completion(
            &self,
            _request: &CompletionRequest,
        ) -> Result<EventStream, GatewayError> {
            Err(match &self.0 {
                GatewayError::Configuration(message) => {
                    GatewayError::Configuration(message.clone())
                }
                GatewayError::Provider(message) => GatewayError::Provider(message.clone()),
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            prompt: "p".to_string(),
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
        }
    }

    #[test]
    fn configuration_error_yields_fixed_message() {
        let gateway =
            FailingGateway(GatewayError::Configuration("missing OPENAI_API_KEY".to_string()));
        let events = EventWriter::disabled();
        let draft = GenerationInvoker::new(&gateway, &events).invoke(&request());
        assert_eq!(draft.text, CONFIGURATION_ERROR_TEXT);
        assert!(draft.raw_calls.is_empty());
        assert_eq!(draft.error.as_ref().map(|err| err.kind.as_str()), Some("configuration"));
    }

    #[test]
    fn provider_error_yields_diagnostic_message() {
        let gateway = FailingGateway(GatewayError::Provider("HTTP 502: bad gateway".to_string()));
        let events = EventWriter::disabled();
        let draft = GenerationInvoker::new(&gateway, &events).invoke(&request());
        assert!(draft.text.starts_with("无法生成最终答案：模型接口异常（"));
        assert!(draft.text.contains("HTTP 502"));
        assert_eq!(draft.error.as_ref().map(|err| err.kind.as_str()), Some("provider"));
    }
}

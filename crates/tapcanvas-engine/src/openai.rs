use std::env;
use std::io::{BufRead, BufReader};

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::gateway::{
    CompletionRequest, EventStream, GatewayError, ModelGateway, StreamEvent, StructuredRequest,
    TextStream,
};
use crate::text::clamp_chars;

/// OpenAI-compatible Responses API gateway, streamed over SSE with the
/// blocking client. Credentials are resolved per call so a missing key shows
/// up as a `Configuration` error instead of a construction failure.
pub struct OpenAiGateway {
    api_base: String,
    http: HttpClient,
}

impl OpenAiGateway {
    pub fn new() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Result<String, GatewayError> {
        non_empty_env("OPENAI_API_KEY").ok_or_else(|| {
            GatewayError::Configuration(
                "OPENAI_API_KEY is not set; required for model calls.".to_string(),
            )
        })
    }

    fn post_stream(&self, payload: Value) -> Result<HttpResponse, GatewayError> {
        let api_key = Self::api_key()?;
        let response = self
            .http
            .post(format!("{}/responses", self.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .map_err(|err| GatewayError::Provider(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GatewayError::Provider(format!(
                "HTTP {}: {}",
                status.as_u16(),
                clamp_chars(&body, 2000)
            )));
        }
        Ok(response)
    }

    fn input_block(prompt: &str) -> Value {
        json!([{
            "role": "user",
            "content": [{"type": "input_text", "text": prompt}],
        }])
    }

    fn structured_payload(request: &StructuredRequest) -> Value {
        json!({
            "model": request.model,
            "input": Self::input_block(&request.prompt),
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": request.strict,
                }
            },
            "stream": true,
        })
    }

    fn plain_payload(model: &str, prompt: &str) -> Value {
        json!({
            "model": model,
            "input": Self::input_block(prompt),
            "stream": true,
        })
    }

    fn completion_payload(request: &CompletionRequest) -> Value {
        let tools: Vec<Value> = request.tools.iter().map(|tool| tool.to_payload()).collect();
        json!({
            "model": request.model,
            "input": Self::input_block(&request.prompt),
            "tools": tools,
            "tool_choice": request.tool_choice,
            "stream": true,
        })
    }
}

impl Default for OpenAiGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelGateway for OpenAiGateway {
    fn stream_structured(&self, request: &StructuredRequest) -> Result<TextStream, GatewayError> {
        let response = self.post_stream(Self::structured_payload(request))?;
        Ok(Box::new(TextDeltaStream::new(response)))
    }

    fn stream_plain(&self, model: &str, prompt: &str) -> Result<TextStream, GatewayError> {
        let response = self.post_stream(Self::plain_payload(model, prompt))?;
        Ok(Box::new(TextDeltaStream::new(response)))
    }

    fn stream_completion(&self, request: &CompletionRequest) -> Result<EventStream, GatewayError> {
        let response = self.post_stream(Self::completion_payload(request))?;
        Ok(Box::new(CompletionStream::new(response)))
    }
}

/// Line reader over an SSE body yielding the parsed JSON of each `data:`
/// frame. Unparseable frames are skipped; `[DONE]` ends the stream.
struct SseReader {
    reader: BufReader<HttpResponse>,
    done: bool,
}

impl SseReader {
    fn new(response: HttpResponse) -> Self {
        Self {
            reader: BufReader::new(response),
            done: false,
        }
    }

    fn next_value(&mut self) -> Option<Result<Value, GatewayError>> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(GatewayError::Provider(format!(
                        "stream read failed: {err}"
                    ))));
                }
            }
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                self.done = true;
                return None;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => return Some(Ok(value)),
                Err(_) => continue,
            }
        }
    }
}

struct TextDeltaStream {
    inner: SseReader,
}

impl TextDeltaStream {
    fn new(response: HttpResponse) -> Self {
        Self {
            inner: SseReader::new(response),
        }
    }
}

impl Iterator for TextDeltaStream {
    type Item = Result<String, GatewayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next_value()? {
                Ok(value) => {
                    if let Some(delta) = text_delta_from_event(&value) {
                        return Some(Ok(delta));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

struct CompletionStream {
    inner: SseReader,
}

impl CompletionStream {
    fn new(response: HttpResponse) -> Self {
        Self {
            inner: SseReader::new(response),
        }
    }
}

impl Iterator for CompletionStream {
    type Item = Result<StreamEvent, GatewayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next_value()? {
                Ok(value) => {
                    if let Some(event) = stream_event_from_value(&value) {
                        return Some(Ok(event));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

fn event_type(value: &Value) -> &str {
    value.get("type").and_then(Value::as_str).unwrap_or("")
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn text_delta_from_event(value: &Value) -> Option<String> {
    let kind = event_type(value);
    if kind.contains("output_text.delta") {
        let delta = str_field(value, "delta");
        if !delta.is_empty() {
            return Some(delta);
        }
        let data = str_field(value, "data");
        if !data.is_empty() {
            return Some(data);
        }
    }
    if kind.contains("response.output_text") {
        let text = str_field(value, "output_text");
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn stream_event_from_value(value: &Value) -> Option<StreamEvent> {
    let kind = event_type(value);
    match kind {
        "response.output_item.added" | "response.output_item.done" => {
            let item = value.get("item")?;
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                return None;
            }
            let call_id = str_field(item, "call_id");
            let item_id = str_field(item, "id");
            if call_id.is_empty() && item_id.is_empty() {
                return None;
            }
            Some(StreamEvent::ToolCallAdded {
                item_id,
                call_id,
                name: str_field(item, "name"),
                arguments: str_field(item, "arguments"),
            })
        }
        "response.function_call_arguments.delta" => Some(StreamEvent::ToolCallArgumentsDelta {
            item_id: str_field(value, "item_id"),
            delta: str_field(value, "delta"),
        }),
        "response.function_call_arguments.done" => Some(StreamEvent::ToolCallArgumentsDone {
            item_id: str_field(value, "item_id"),
            arguments: str_field(value, "arguments"),
        }),
        "response.completed" => Some(StreamEvent::Completed),
        _ => {
            if let Some(delta) = text_delta_from_event(value) {
                return Some(StreamEvent::TextDelta(delta));
            }
            None
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

use std::env;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use tapcanvas_contracts::research::{RetrievalResult, Source};

use crate::text::clamp_chars;

const MAX_SOURCES: usize = 8;
const SNIPPET_FALLBACK_MAX_CHARS: usize = 4000;

/// Optional grounding backend. A retrieval problem is never an error: the
/// worst case is an empty result or a diagnostic snippet.
pub trait RetrievalGateway {
    fn search(&self, query: &str) -> RetrievalResult;
}

pub struct NullRetrieval;

impl RetrievalGateway for NullRetrieval {
    fn search(&self, _query: &str) -> RetrievalResult {
        RetrievalResult::default()
    }
}

/// Worker-side AutoRAG proxy client.
pub struct AutoRagGateway {
    endpoint: String,
    rag_id: String,
    secret: Option<String>,
    http: HttpClient,
}

impl AutoRagGateway {
    pub fn new(endpoint: impl Into<String>, rag_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            rag_id: rag_id.into(),
            secret: env::var("INTERNAL_API_SECRET")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http: HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_else(|_| HttpClient::new()),
        }
    }
}

impl RetrievalGateway for AutoRagGateway {
    fn search(&self, query: &str) -> RetrievalResult {
        let query = query.trim();
        if self.endpoint.is_empty() || self.rag_id.is_empty() || query.is_empty() {
            return RetrievalResult::default();
        }

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({"ragId": self.rag_id, "query": query}));
        if let Some(secret) = self.secret.as_deref() {
            request = request.header("x-internal-secret", secret);
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(err) => {
                return diagnostic(format!("[AutoRAG] 请求失败: {err}"));
            }
        };
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return diagnostic(format!(
                "[AutoRAG] HTTP {}: {}",
                status.as_u16(),
                clamp_chars(&body, 2000)
            ));
        }

        let decoded: Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) => {
                return diagnostic(format!("[AutoRAG] 非 JSON 响应: {}", clamp_chars(&body, 2000)));
            }
        };
        let result = decoded.get("result").unwrap_or(&decoded);
        normalize_result(result)
    }
}

fn diagnostic(snippet: String) -> RetrievalResult {
    RetrievalResult {
        snippets: vec![snippet],
        sources: Vec::new(),
    }
}

/// Best-effort normalization of the backend's loosely-shaped result object
/// into `(snippets, sources)`.
pub fn normalize_result(result: &Value) -> RetrievalResult {
    let mut snippets: Vec<String> = Vec::new();
    let mut sources: Vec<Source> = Vec::new();

    let Some(result_obj) = result.as_object() else {
        return RetrievalResult::default();
    };

    let answer = ["answer", "output", "response"]
        .iter()
        .find_map(|key| result_obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty());
    if let Some(answer) = answer {
        snippets.push(answer.to_string());
    }

    let raw_sources = ["sources", "results", "documents"]
        .iter()
        .find_map(|key| result_obj.get(*key).and_then(Value::as_array));
    if let Some(rows) = raw_sources {
        for (idx, row) in rows.iter().take(MAX_SOURCES).enumerate() {
            let Some(item) = row.as_object() else {
                continue;
            };
            let index = idx + 1;
            let title = ["title", "label", "name"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("KB#{index}"));
            let url = ["url", "source_url", "source"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|text| !text.is_empty());
            let text = ["text", "content", "snippet"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .unwrap_or("");
            let score = ["score", "similarity"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_f64));

            let mut header_bits = vec![title.clone()];
            if let Some(url) = url {
                header_bits.push(url.to_string());
            }
            if let Some(score) = score {
                header_bits.push(format!("score={score:.3}"));
            }
            let header = header_bits.join(" | ");
            if !text.is_empty() {
                snippets.push(format!("[{index}] {header}\n{text}"));
            }
            if let Some(url) = url {
                sources.push(Source {
                    label: title,
                    url: url.to_string(),
                    short_url: url.to_string(),
                });
            }
        }
    }

    if snippets.is_empty() {
        let serialized = serde_json::to_string(result).unwrap_or_default();
        if !serialized.is_empty() {
            snippets.push(clamp_chars(&serialized, SNIPPET_FALLBACK_MAX_CHARS));
        }
    }

    RetrievalResult { snippets, sources }
}

use std::env;

/// Per-process engine configuration, resolved from the environment with
/// defaults. Model ids are per pipeline step so the cheap router model can
/// differ from the answer model.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub llm_provider: String,
    pub role_selector_model: String,
    pub answer_model: String,
    pub search_provider: String,
    pub autorag_endpoint: Option<String>,
    pub autorag_id: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            llm_provider: env_or("TAPCANVAS_LLM_PROVIDER", "openai"),
            role_selector_model: env_or("TAPCANVAS_ROLE_MODEL", "gpt-4o-mini"),
            answer_model: env_or("TAPCANVAS_ANSWER_MODEL", "gpt-4o"),
            search_provider: env_or("TAPCANVAS_SEARCH_PROVIDER", "disabled"),
            autorag_endpoint: non_empty_env("AUTORAG_ENDPOINT"),
            autorag_id: non_empty_env("AUTORAG_ID"),
        }
    }

    pub fn retrieval_enabled(&self) -> bool {
        self.search_provider.eq_ignore_ascii_case("autorag")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_provider: "openai".to_string(),
            role_selector_model: "gpt-4o-mini".to_string(),
            answer_model: "gpt-4o".to_string(),
            search_provider: "disabled".to_string(),
            autorag_endpoint: None,
            autorag_id: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

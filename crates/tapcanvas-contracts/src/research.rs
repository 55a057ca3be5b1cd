use serde::{Deserialize, Serialize};

/// One retrieval citation. `short_url` is the compact form the model sees in
/// its prompt; the assembler substitutes `url` back into the final text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
    pub url: String,
    #[serde(rename = "shortUrl")]
    pub short_url: String,
}

/// Normalized retrieval output: free-form snippets for prompt grounding plus
/// the sources they came from. An unusable backend answer is an empty result,
/// never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub snippets: Vec<String>,
    pub sources: Vec<Source>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty() && self.sources.is_empty()
    }
}

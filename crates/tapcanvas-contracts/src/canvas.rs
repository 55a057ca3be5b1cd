use serde::{Deserialize, Serialize};

/// Logical node kind on the canvas. String-backed so unknown kinds coming
/// from the frontend survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Image,
    TextToImage,
    ComposeVideo,
    Video,
    Mosaic,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Image => "image",
            NodeKind::TextToImage => "textToImage",
            NodeKind::ComposeVideo => "composeVideo",
            NodeKind::Video => "video",
            NodeKind::Mosaic => "mosaic",
            NodeKind::Other(raw) => raw.as_str(),
        }
    }

    /// Kinds that render a still image and can run as soon as they exist.
    pub fn is_image_family(&self) -> bool {
        matches!(
            self,
            NodeKind::Image | NodeKind::TextToImage | NodeKind::Mosaic
        )
    }

    pub fn is_video_family(&self) -> bool {
        matches!(self, NodeKind::ComposeVideo | NodeKind::Video)
    }
}

impl From<String> for NodeKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "image" => NodeKind::Image,
            "textToImage" | "text-to-image" | "text_to_image" => NodeKind::TextToImage,
            "composeVideo" | "compose-video" | "compose_video" => NodeKind::ComposeVideo,
            "video" => NodeKind::Video,
            "mosaic" => NodeKind::Mosaic,
            _ => NodeKind::Other(raw),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    Pending,
    Success,
    Error,
    Other(String),
}

impl From<String> for NodeStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => NodeStatus::Pending,
            "success" => NodeStatus::Success,
            "error" => NodeStatus::Error,
            _ => NodeStatus::Other(raw),
        }
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Pending => "pending".to_string(),
            NodeStatus::Success => "success".to_string(),
            NodeStatus::Error => "error".to_string(),
            NodeStatus::Other(raw) => raw,
        }
    }
}

/// One node of the caller's canvas snapshot. The label is the cross-turn
/// reference key; the engine never sees generated node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub label: String,
    pub kind: NodeKind,
    #[serde(default = "default_status")]
    pub status: NodeStatus,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

fn default_status() -> NodeStatus {
    NodeStatus::Pending
}

impl CanvasNode {
    /// A finished image node with output available for reference linking.
    pub fn is_successful_image(&self) -> bool {
        self.kind.is_image_family()
            && self.status == NodeStatus::Success
            && self
                .image_url
                .as_deref()
                .map(|url| !url.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
}

impl CanvasSnapshot {
    pub fn new(nodes: Vec<CanvasNode>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| node.label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.nodes.iter().any(|node| node.label.trim() == label)
    }

    /// Compact JSON used as prompt context; empty string when no nodes.
    pub fn context_json(&self) -> String {
        if self.nodes.is_empty() {
            return String::new();
        }
        serde_json::to_string(self).unwrap_or_default()
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canvas::NodeKind;

/// One canvas mutation proposed by the generation step. Serialized as
/// `{id, name, arguments}`, the shape the canvas executor consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(flatten)]
    pub op: ToolOp,
}

/// Ordered mutation sequence for the canvas executor; order is execution
/// order.
pub type MutationBatch = Vec<ToolCall>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments")]
pub enum ToolOp {
    #[serde(rename = "createNode")]
    CreateNode(CreateNodeArgs),
    #[serde(rename = "updateNode")]
    UpdateNode(UpdateNodeArgs),
    #[serde(rename = "connectNodes")]
    ConnectNodes(ConnectNodesArgs),
    #[serde(rename = "runNode")]
    RunNode(RunNodeArgs),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeArgs {
    #[serde(rename = "type")]
    pub node_type: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(
        rename = "remixFromNodeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remix_from_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl CreateNodeArgs {
    pub fn new(node_type: NodeKind, label: impl Into<String>) -> Self {
        Self {
            node_type,
            label: Some(label.into()),
            config: Map::new(),
            remix_from_node_id: None,
            position: None,
        }
    }

    pub fn trimmed_label(&self) -> Option<&str> {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNodeArgs {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectNodesArgs {
    #[serde(rename = "sourceNodeId", alias = "sourceId")]
    pub source_node_id: String,
    #[serde(rename = "targetNodeId", alias = "targetId")]
    pub target_node_id: String,
    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
    #[serde(
        rename = "targetHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<String>,
}

impl ConnectNodesArgs {
    /// (source, target) pair used for duplicate-edge detection.
    pub fn pair(&self) -> (String, String) {
        (
            self.source_node_id.trim().to_string(),
            self.target_node_id.trim().to_string(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNodeArgs {
    #[serde(rename = "nodeId")]
    pub node_id: String,
}

impl ToolOp {
    pub fn as_create(&self) -> Option<&CreateNodeArgs> {
        match self {
            ToolOp::CreateNode(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_create_mut(&mut self) -> Option<&mut CreateNodeArgs> {
        match self {
            ToolOp::CreateNode(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_update(&self) -> Option<&UpdateNodeArgs> {
        match self {
            ToolOp::UpdateNode(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_connect(&self) -> Option<&ConnectNodesArgs> {
        match self {
            ToolOp::ConnectNodes(args) => Some(args),
            _ => None,
        }
    }

    pub fn as_run(&self) -> Option<&RunNodeArgs> {
        match self {
            ToolOp::RunNode(args) => Some(args),
            _ => None,
        }
    }
}

impl ToolCall {
    pub fn create(id: impl Into<String>, args: CreateNodeArgs) -> Self {
        Self {
            id: id.into(),
            op: ToolOp::CreateNode(args),
        }
    }

    pub fn connect(id: impl Into<String>, args: ConnectNodesArgs) -> Self {
        Self {
            id: id.into(),
            op: ToolOp::ConnectNodes(args),
        }
    }

    pub fn run(id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            op: ToolOp::RunNode(RunNodeArgs {
                node_id: node_id.into(),
            }),
        }
    }

    /// Validate and convert a raw streamed call. Unknown operation names and
    /// non-object or schema-violating arguments yield `None`; the pipeline
    /// drops such calls instead of failing the turn.
    pub fn from_raw(raw: &RawToolCall) -> Option<Self> {
        if !raw.arguments.is_object() {
            return None;
        }
        let op = match raw.name.as_str() {
            "createNode" => {
                ToolOp::CreateNode(serde_json::from_value(raw.arguments.clone()).ok()?)
            }
            "updateNode" => {
                ToolOp::UpdateNode(serde_json::from_value(raw.arguments.clone()).ok()?)
            }
            "connectNodes" => {
                ToolOp::ConnectNodes(serde_json::from_value(raw.arguments.clone()).ok()?)
            }
            "runNode" => ToolOp::RunNode(serde_json::from_value(raw.arguments.clone()).ok()?),
            _ => return None,
        };
        Some(Self {
            id: raw.id.clone(),
            op,
        })
    }
}

/// Pre-validation form assembled from the stream: the argument payload may be
/// a parsed object, `{}` for an empty string, or the raw string when the
/// model emitted malformed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_serializes_to_executor_shape() {
        let call = ToolCall::run("auto_run_Fox", "Fox");
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            json!({"id": "auto_run_Fox", "name": "runNode", "arguments": {"nodeId": "Fox"}})
        );
    }

    #[test]
    fn from_raw_parses_create_node() {
        let raw = RawToolCall {
            id: "call_1".to_string(),
            name: "createNode".to_string(),
            arguments: json!({
                "type": "textToImage",
                "label": "Fox",
                "config": {"kind": "textToImage", "prompt": "一只狐狸"}
            }),
        };
        let call = ToolCall::from_raw(&raw).expect("valid create");
        let args = call.op.as_create().expect("create args");
        assert_eq!(args.node_type, NodeKind::TextToImage);
        assert_eq!(args.trimmed_label(), Some("Fox"));
        assert_eq!(args.config_str("prompt"), Some("一只狐狸"));
    }

    #[test]
    fn from_raw_accepts_source_id_aliases() {
        let raw = RawToolCall {
            id: "call_2".to_string(),
            name: "connectNodes".to_string(),
            arguments: json!({"sourceId": "A", "targetId": "B"}),
        };
        let call = ToolCall::from_raw(&raw).expect("valid connect");
        let args = call.op.as_connect().expect("connect args");
        assert_eq!(args.pair(), ("A".to_string(), "B".to_string()));
    }

    #[test]
    fn from_raw_rejects_unknown_names_and_raw_strings() {
        let unknown = RawToolCall {
            id: "x".to_string(),
            name: "deleteEverything".to_string(),
            arguments: json!({}),
        };
        assert!(ToolCall::from_raw(&unknown).is_none());

        let malformed = RawToolCall {
            id: "y".to_string(),
            name: "runNode".to_string(),
            arguments: Value::String("{\"nodeId\": ".to_string()),
        };
        assert!(ToolCall::from_raw(&malformed).is_none());
    }

    #[test]
    fn from_raw_rejects_missing_required_fields() {
        let missing = RawToolCall {
            id: "z".to_string(),
            name: "connectNodes".to_string(),
            arguments: json!({"sourceNodeId": "A"}),
        };
        assert!(ToolCall::from_raw(&missing).is_none());
    }
}

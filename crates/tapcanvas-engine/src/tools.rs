use serde_json::{json, Value};

use crate::gateway::ToolDefinition;

fn config_schema() -> Value {
    json!({
        "type": "object",
        "description": "节点 data 配置（会写入 node.data）。常用字段：kind、prompt、negativePrompt、systemPrompt、keywords、imageModel/videoModel 等。",
        "properties": {
            "kind": {
                "type": "string",
                "description": "任务类型（通常由 type 推导），例如 image/textToImage/composeVideo/video。"
            },
            "prompt": {"type": "string", "description": "主提示词"},
            "negativePrompt": {"type": "string", "description": "负面提示词"},
            "systemPrompt": {"type": "string", "description": "系统提示词/风格基准"},
            "keywords": {
                "type": ["string", "array"],
                "items": {"type": "string"},
                "description": "关键词（可用逗号分隔字符串或数组）"
            },
            "imageModel": {"type": "string", "description": "图像模型（可选）"},
            "videoModel": {"type": "string", "description": "视频模型（可选）"}
        },
        "additionalProperties": true
    })
}

/// The four canvas operations exposed to the model. The frontend executes the
/// calls and resolves labels to node ids; results never come back to the
/// model.
pub fn canvas_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "createNode".to_string(),
            description:
                "创建画布节点（仅支持 image/textToImage/composeVideo/video）。config 会写入 node.data。"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["image", "textToImage", "composeVideo", "video"],
                        "description": "逻辑节点类型（前端会映射成 taskNode.kind）"
                    },
                    "label": {"type": "string", "description": "可选：节点标签"},
                    "config": config_schema(),
                    "remixFromNodeId": {
                        "type": "string",
                        "description": "可选：基于已有视频节点做 Remix（传入源节点 ID）"
                    },
                    "position": {
                        "type": "object",
                        "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
                        "required": ["x", "y"],
                        "additionalProperties": false,
                        "description": "可选：节点位置"
                    }
                },
                "required": ["type"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "updateNode".to_string(),
            description: "更新已存在节点的配置或标签，通常用于写入/修改 prompt。".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "nodeId": {
                        "type": "string",
                        "description": "节点 ID（也可直接传节点 label；前端会按 label 解析）"
                    },
                    "label": {"type": "string", "description": "可选：新标签"},
                    "config": config_schema()
                },
                "required": ["nodeId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "connectNodes".to_string(),
            description: "连接两个节点，source -> target。".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sourceNodeId": {
                        "type": "string",
                        "description": "源节点 ID（也可直接传节点 label；前端会按 label 解析）"
                    },
                    "targetNodeId": {
                        "type": "string",
                        "description": "目标节点 ID（也可直接传节点 label；前端会按 label 解析）"
                    },
                    "sourceHandle": {"type": "string", "description": "可选：源手柄"},
                    "targetHandle": {"type": "string", "description": "可选：目标手柄"}
                },
                "required": ["sourceNodeId", "targetNodeId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "runNode".to_string(),
            description: "执行一个节点（例如 composeVideo/image），前端自行处理执行细节。"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "nodeId": {
                        "type": "string",
                        "description": "节点 ID（也可直接传节点 label；前端会按 label 解析）"
                    }
                },
                "required": ["nodeId"],
                "additionalProperties": false
            }),
        },
    ]
}

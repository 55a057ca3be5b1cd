use chrono::Local;

use tapcanvas_contracts::roles::RoleProfile;

pub fn current_date() -> String {
    Local::now().format("%B %d, %Y").to_string()
}

/// Router prompt: pick one role and decide whether canvas tools run this turn.
pub fn role_router_prompt(
    roles_block: &str,
    default_role_id: &str,
    conversation: &str,
    canvas_context: &str,
) -> String {
    format!(
        r#"You are an intent router that picks exactly one assistant role for the next reply.

Available roles:
{roles_block}

Rules:
- Only choose a role_id from the list above. If nothing fits, default to "{default_role_id}".
- Keep the reason concise (one sentence) describing why the role matches the user's intent.
- Do not invent new roles.
- Also decide whether canvas tool execution should be allowed in THIS turn:
  - allow_canvas_tools=true ONLY if the user clearly asks to create/update/connect/run canvas nodes, or explicitly confirms an action choice.
  - allow_canvas_tools=false for greetings/smalltalk, vague requests, or when you should first ask the user to choose/confirm via buttons.
- Keep allow_canvas_tools_reason concise (one sentence).

Conversation so far:
{conversation}

Canvas context (optional, JSON):
{canvas_context}
"#
    )
}

/// Supervision directive: the art director rubric is always prepended, even
/// when a specialist role is active.
pub fn role_directive(role: &RoleProfile, director: &RoleProfile, reason: &str) -> String {
    format!(
        "总监审查（{director_name}｜{director_id}）: {director_summary}。 审查风格：{director_style}。 \
         你必须先审查本轮是否应该执行画布动作（tool calls）、是否需要用户确认、是否保持风格/上下文一致，再输出最终回复。\n\
         主执行角色（{role_name}｜{role_id}）: {role_summary}。回复风格：{role_style}。 选择原因：{reason}",
        director_name = director.name,
        director_id = director.id,
        director_summary = director.summary,
        director_style = director.style,
        role_name = role.name,
        role_id = role.id,
        role_summary = role.summary,
        role_style = role.style,
    )
}

/// Answer prompt for the tool-calling generation call.
pub fn answer_prompt(
    current_date: &str,
    research_topic: &str,
    role_directive: &str,
    summaries: &str,
    canvas_context: &str,
) -> String {
    format!(
        r#"Generate a high-quality answer to the user's question based on the provided summaries.

Instructions:
- The current date is {current_date}.
- You are the final step of a multi-step research process, don't mention that you are the final step.
- You have access to all the information gathered from the previous steps.
- You have access to the user's question.
- Generate a high-quality answer to the user's question based on the provided summaries and the user's question.
- If the summaries contain usable URLs or citations, include them in markdown (e.g. [apnews](https://vertexaisearch.cloud.google.com/id/1-0)). If no usable sources are present, answer directly without mentioning missing sources.
- Respond in the tone and focus of the active role described below.
- The user is non-technical: avoid code/commands/config jargon; use everyday language, give the shortest actionable steps or ready-to-copy prompts, and default to making recommendations instead of asking questions.
- Never reply with pure advice. Always provide at least one actionable operation:
  - Prefer calling canvas tools (createNode/updateNode/connectNodes/runNode), OR
  - If you cannot safely operate yet, present 2–4 user-facing action choices as buttons.
- 避免工具缺失或限制的道歉，优先用现有能力给出可执行步骤。
- If function tools are available (createNode/updateNode/connectNodes/runNode), prefer calling tools to operate the canvas (create/update/run nodes) instead of only describing steps.
- When you call tools, put generation prompts into node config (e.g. config.prompt / config.negativePrompt / config.model). The frontend will execute tool calls; you do not need to wait for tool results.
- When you have issued tool calls, always include a short confirmation in chat (1–3 sentences) describing what you created/updated; do not paste long raw prompts in chat unless the user explicitly asks.
- Tool results are not returned to you. If you need to reference a node you just created, refer to it by its label (use the label value as nodeId/sourceNodeId/targetNodeId).
- When you present choices, include a machine-readable block at the end (it will be hidden from users and rendered as buttons):
  ```tapcanvas_actions
  {{ "title": "可选操作", "actions": [ {{ "label": "按钮文案", "input": "用户要发送的下一句" }} ] }}
  ```
- For “续写/后续剧情/有什么推荐/给方向”这类开放式创作请求：先给 3 个剧情方向（+1 个“自定义方向”模板）作为上述按钮，不要在这一轮直接创建分镜/视频节点；等用户点选后再创建对应节点。
- Continuation must stay consistent with the existing project: reuse the same characters, relationships, setting, and tone inferred from canvas_context (especially storyContext/timeline), and explicitly treat it as “续写下一段”，不要另起炉灶。
- If continuation introduces a new character not already present in canvas_context:
  1) First create and run the new character design image node(s) (可复现的角色设定图) and STOP.
  2) Ask the user to confirm the character result via buttons (confirm / regenerate / continue without new character).
  3) Only after confirmation, create storyboard/video nodes that include that character.
- For “I need an image / generate a picture” requests, create exactly one `image` node with a clear label, write `config.prompt` and `config.negativePrompt`, then immediately call `runNode` using that same label as `nodeId`.
- For “分镜/故事板/storyboard/15s分镜” requests: create one `image` node that generates a 3x3 九宫格分镜图（同一张图里包含9个镜头），then create one `composeVideo` node for the 15s video, connect the storyboard image node `out-image` -> video node `in-image`. Only run the image node in this turn (do NOT run the video node yet).

User Context:
- {research_topic}

Active Role:
- {role_directive}

Summaries:
{summaries}

Canvas context (optional, JSON):
{canvas_context}"#
    )
}

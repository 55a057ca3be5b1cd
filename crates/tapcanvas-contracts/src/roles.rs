use indexmap::IndexMap;

pub const DEFAULT_ROLE_ID: &str = "creative_assistant";
pub const ART_DIRECTOR_ROLE_ID: &str = "art_director";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProfile {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub style: String,
}

/// Fixed persona registry, loaded once and immutable afterwards. Insertion
/// order matters: substring matching scans in registry order.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: IndexMap<String, RoleProfile>,
}

impl RoleRegistry {
    pub fn new(roles: Option<IndexMap<String, RoleProfile>>) -> Self {
        let mut roles = roles.unwrap_or_else(default_roles);
        // The default role must always be resolvable.
        if !roles.contains_key(DEFAULT_ROLE_ID) {
            if let Some(fallback) = default_roles().shift_remove(DEFAULT_ROLE_ID) {
                roles.insert(DEFAULT_ROLE_ID.to_string(), fallback);
            }
        }
        Self { roles }
    }

    pub fn get(&self, id: &str) -> Option<&RoleProfile> {
        self.roles.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &RoleProfile> {
        self.roles.values()
    }

    pub fn default_role(&self) -> &RoleProfile {
        // Guaranteed by the constructor.
        &self.roles[DEFAULT_ROLE_ID]
    }

    /// Exact id match, else id/display-name substring match, else the
    /// default role. Routers sometimes answer with the display name.
    pub fn resolve(&self, id: &str) -> &RoleProfile {
        let trimmed = id.trim();
        self.roles
            .get(trimmed)
            .or_else(|| self.match_in_text(trimmed))
            .unwrap_or_else(|| self.default_role())
    }

    /// First registry role whose id or display name occurs as a substring of
    /// `raw`. Ids are matched case-insensitively; display names verbatim.
    pub fn match_in_text(&self, raw: &str) -> Option<&RoleProfile> {
        let lowered = raw.to_lowercase();
        self.roles
            .values()
            .find(|role| lowered.contains(&role.id) || raw.contains(role.name.as_str()))
    }

    /// Bullet list of roles for the router prompt.
    pub fn prompt_block(&self) -> String {
        self.roles
            .values()
            .map(|role| {
                format!(
                    "- {}｜{}：{}（回复风格：{}）",
                    role.id, role.name, role.summary, role.style
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_roles() -> IndexMap<String, RoleProfile> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, name: &str, summary: &str, style: &str| {
        map.insert(
            id.to_string(),
            RoleProfile {
                id: id.to_string(),
                name: name.to_string(),
                summary: summary.to_string(),
                style: style.to_string(),
            },
        );
    };

    insert(
        DEFAULT_ROLE_ID,
        "创意助理",
        "通用创作助手，负责需求澄清与画布操作建议",
        "友好、简短、先给可执行选项",
    );
    insert(
        ART_DIRECTOR_ROLE_ID,
        "艺术总监",
        "审查画布动作是否该执行、风格与上下文是否一致",
        "克制、判断优先、一句话结论",
    );
    insert(
        "story_writer",
        "剧情编剧",
        "基于已有项目续写剧情与节奏设计",
        "讲故事、紧凑、给3-5句梗概",
    );
    insert(
        "character_designer",
        "角色设计师",
        "角色设定图与外观一致性",
        "具体、强调配色与造型锚点",
    );
    insert(
        "storyboard_artist",
        "分镜师",
        "九宫格分镜与镜头语言设计",
        "逐镜头、标注景别与运动",
    );
    insert(
        "video_director",
        "视频导演",
        "15秒成片的节奏、转场与整体质感",
        "画面感、直接给成片指令",
    );

    map
}

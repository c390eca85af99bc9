use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// 事件类型标签
///
/// 处理器注册表以该标签为键进行分发；未内置的类型通过 `Custom` 承载，
/// 序列化形态统一为标签字符串（如 `"TaskCreated"`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskAssigned,
    TaskCompleted,
    TaskDeleted,
    ProjectCreated,
    ProjectUpdated,
    ProjectArchived,
    ProjectDeleted,
    WorkspaceCreated,
    WorkspaceUpdated,
    WorkspaceMemberAdded,
    WorkspaceMemberRemoved,
    Custom(String),
}

const BUILTIN: &[(EventKind, &str, &str)] = &[
    (EventKind::TaskCreated, "TaskCreated", "task"),
    (EventKind::TaskUpdated, "TaskUpdated", "task"),
    (EventKind::TaskStatusChanged, "TaskStatusChanged", "task"),
    (EventKind::TaskAssigned, "TaskAssigned", "task"),
    (EventKind::TaskCompleted, "TaskCompleted", "task"),
    (EventKind::TaskDeleted, "TaskDeleted", "task"),
    (EventKind::ProjectCreated, "ProjectCreated", "project"),
    (EventKind::ProjectUpdated, "ProjectUpdated", "project"),
    (EventKind::ProjectArchived, "ProjectArchived", "project"),
    (EventKind::ProjectDeleted, "ProjectDeleted", "project"),
    (EventKind::WorkspaceCreated, "WorkspaceCreated", "workspace"),
    (EventKind::WorkspaceUpdated, "WorkspaceUpdated", "workspace"),
    (
        EventKind::WorkspaceMemberAdded,
        "WorkspaceMemberAdded",
        "workspace",
    ),
    (
        EventKind::WorkspaceMemberRemoved,
        "WorkspaceMemberRemoved",
        "workspace",
    ),
];

impl EventKind {
    /// 构造自定义事件类型；与内置标签同名时归一为内置变体
    pub fn custom(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        BUILTIN
            .iter()
            .find(|(_, name, _)| *name == tag)
            .map(|(kind, _, _)| kind.clone())
            .unwrap_or(EventKind::Custom(tag))
    }

    /// 事件标签（线上格式中的 `eventType`）
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Custom(tag) => tag,
            builtin => BUILTIN
                .iter()
                .find(|(kind, _, _)| kind == builtin)
                .map(|(_, name, _)| *name)
                .unwrap_or_default(),
        }
    }

    /// 内置类型对应的聚合类型
    pub fn aggregate_type(&self) -> Option<&'static str> {
        BUILTIN
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, aggregate)| *aggregate)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EventKind::Custom(_))
    }

    /// 派生路由键：驼峰标签转为小写点分（`TaskCreated` -> `task.created`），
    /// 已含 `.` 的自定义标签原样返回。
    pub fn routing_key(&self) -> Cow<'_, str> {
        let tag = self.as_str();
        if tag.contains('.') {
            return Cow::Borrowed(tag);
        }

        let mut key = String::with_capacity(tag.len() + 4);
        let mut prev: Option<char> = None;
        for ch in tag.chars() {
            if ch.is_uppercase() {
                if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                    key.push('.');
                }
                key.extend(ch.to_lowercase());
            } else {
                key.push(ch);
            }
            prev = Some(ch);
        }
        Cow::Owned(key)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::custom(s))
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        EventKind::custom(value)
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        EventKind::custom(value)
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EventKind::custom(tag))
    }
}

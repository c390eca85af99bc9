use super::{EventKind, EventMetadata};
use bon::bon;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 因果链接：子事件继承父事件的关联 ID，并以父事件 ID 作为因果 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalLink {
    pub correlation_id: String,
    pub causation_id: String,
}

/// 领域事件（不可变值对象）
///
/// 通过 `Event::builder()` 一次性构造，不提供任何 setter；
/// `data` 与 `metadata` 仅暴露只读视图。
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_id: Uuid,
    kind: EventKind,
    event_version: u32,
    occurred_at: DateTime<Utc>,
    aggregate_id: String,
    aggregate_type: String,
    aggregate_version: u64,
    user_id: Option<String>,
    workspace_id: Option<String>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    data: Value,
    metadata: EventMetadata,
}

#[bon]
impl Event {
    /// 构造事件：
    /// - `event_id`/`occurred_at` 缺省时自动生成；
    /// - `aggregate_type` 缺省时取自内置事件类型，自定义类型回落为 `unknown`；
    /// - `metadata` 中补齐 `source` 与 `timestamp`；
    /// - `link` 仅在未显式给出关联/因果 ID 时生效。
    #[builder]
    pub fn new(
        kind: EventKind,
        #[builder(into)] aggregate_id: String,
        aggregate_version: u64,
        aggregate_type: Option<String>,
        #[builder(default = 1)] event_version: u32,
        #[builder(default = Value::Object(Default::default()))] data: Value,
        user_id: Option<String>,
        workspace_id: Option<String>,
        correlation_id: Option<String>,
        causation_id: Option<String>,
        link: Option<CausalLink>,
        source: Option<String>,
        #[builder(default)] metadata: BTreeMap<String, Value>,
        event_id: Option<Uuid>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Self {
        let occurred_at = occurred_at.unwrap_or_else(Utc::now);
        let aggregate_type = aggregate_type
            .or_else(|| kind.aggregate_type().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        let (link_correlation, link_causation) = match link {
            Some(link) => (Some(link.correlation_id), Some(link.causation_id)),
            None => (None, None),
        };
        let metadata = EventMetadata::from_parts(
            metadata,
            source,
            occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        Self {
            event_id: event_id.unwrap_or_else(Uuid::new_v4),
            kind,
            event_version,
            occurred_at,
            aggregate_id,
            aggregate_type,
            aggregate_version,
            user_id,
            workspace_id,
            correlation_id: correlation_id.or(link_correlation),
            causation_id: causation_id.or(link_causation),
            data,
            metadata,
        }
    }
}

impl Event {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// 事件标签，等价于 `kind().as_str()`
    pub fn event_type(&self) -> &str {
        self.kind.as_str()
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> u64 {
        self.aggregate_version
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// 以当前事件为因的子事件链接
    pub fn child_link(&self) -> CausalLink {
        let id = self.event_id.to_string();
        CausalLink {
            correlation_id: self.correlation_id.clone().unwrap_or_else(|| id.clone()),
            causation_id: id,
        }
    }
}

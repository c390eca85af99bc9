use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 元数据键：事件来源
pub const SOURCE_KEY: &str = "source";
/// 元数据键：ISO-8601 时间戳
pub const TIMESTAMP_KEY: &str = "timestamp";

/// 只读事件元数据
///
/// 构造后不可修改，始终包含 `source` 与 `timestamp` 两个键。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMetadata(BTreeMap<String, Value>);

impl EventMetadata {
    pub(crate) fn from_parts(
        mut extra: BTreeMap<String, Value>,
        source: Option<String>,
        timestamp: String,
    ) -> Self {
        if let Some(source) = source {
            extra.insert(SOURCE_KEY.to_string(), Value::String(source));
        }
        extra
            .entry(SOURCE_KEY.to_string())
            .or_insert_with(|| Value::String(super::DEFAULT_SOURCE.to_string()));
        extra
            .entry(TIMESTAMP_KEY.to_string())
            .or_insert(Value::String(timestamp));
        Self(extra)
    }

    pub fn source(&self) -> &str {
        self.0
            .get(SOURCE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn timestamp(&self) -> &str {
        self.0
            .get(TIMESTAMP_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

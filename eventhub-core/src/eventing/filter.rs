//! 集成事件过滤器（EventFilter）
//!
//! 各条件均为可选，给出的条件必须全部满足；订阅时校验并编译，发布时只做判定。
//!
use super::GlobPattern;
use crate::domain_event::{EventKind, IntegrationEvent};
use crate::error::{EventError, EventResult};
use bon::Builder;
use std::fmt;
use std::sync::Arc;

/// 自定义判定函数
pub type EventPredicate = Arc<dyn Fn(&IntegrationEvent) -> bool + Send + Sync>;

#[derive(Clone, Default, Builder)]
pub struct EventFilter {
    /// 允许的事件类型
    event_types: Option<Vec<EventKind>>,
    /// 允许的 schema 版本
    versions: Option<Vec<u32>>,
    /// 允许的来源服务（`EventSource::service`）
    sources: Option<Vec<String>>,
    /// 路由键通配模式
    #[builder(into)]
    routing_pattern: Option<String>,
    predicate: Option<EventPredicate>,
}

impl EventFilter {
    /// 仅由判定函数构成的过滤器
    pub fn from_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&IntegrationEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
            ..Self::default()
        }
    }

    pub(crate) fn compile(self) -> EventResult<CompiledFilter> {
        fn non_empty<T>(name: &str, list: &Option<Vec<T>>) -> EventResult<()> {
            match list {
                Some(list) if list.is_empty() => Err(EventError::invalid_filter(format!(
                    "{name} must not be empty when given"
                ))),
                _ => Ok(()),
            }
        }

        non_empty("event_types", &self.event_types)?;
        non_empty("versions", &self.versions)?;
        non_empty("sources", &self.sources)?;

        if self.versions.as_ref().is_some_and(|v| v.contains(&0)) {
            return Err(EventError::invalid_filter("event versions start at 1"));
        }
        if self
            .sources
            .as_ref()
            .is_some_and(|s| s.iter().any(|s| s.trim().is_empty()))
        {
            return Err(EventError::invalid_filter("source names must not be blank"));
        }

        let routing_pattern = self
            .routing_pattern
            .as_deref()
            .map(GlobPattern::new)
            .transpose()
            .map_err(|e| EventError::invalid_filter(e.to_string()))?;

        Ok(CompiledFilter {
            event_types: self.event_types,
            versions: self.versions,
            sources: self.sources,
            routing_pattern,
            predicate: self.predicate,
        })
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("event_types", &self.event_types)
            .field("versions", &self.versions)
            .field("sources", &self.sources)
            .field("routing_pattern", &self.routing_pattern)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// 校验通过的过滤器
#[derive(Clone)]
pub(crate) struct CompiledFilter {
    event_types: Option<Vec<EventKind>>,
    versions: Option<Vec<u32>>,
    sources: Option<Vec<String>>,
    routing_pattern: Option<GlobPattern>,
    predicate: Option<EventPredicate>,
}

impl fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("event_types", &self.event_types)
            .field("versions", &self.versions)
            .field("sources", &self.sources)
            .field("routing_pattern", &self.routing_pattern)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl CompiledFilter {
    pub(crate) fn matches(&self, event: &IntegrationEvent) -> bool {
        self.event_types
            .as_ref()
            .is_none_or(|types| types.contains(event.kind()))
            && self
                .versions
                .as_ref()
                .is_none_or(|versions| versions.contains(&event.event_version()))
            && self
                .sources
                .as_ref()
                .is_none_or(|sources| sources.iter().any(|s| *s == event.source().service))
            && self
                .routing_pattern
                .as_ref()
                .is_none_or(|pattern| pattern.matches(event.routing_key()))
            && self.predicate.as_ref().is_none_or(|p| p(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::{Event, EventSource};

    fn ie(kind: EventKind, version: u32, service: &str) -> IntegrationEvent {
        IntegrationEvent::new(
            Event::builder()
                .kind(kind)
                .aggregate_id("t1")
                .aggregate_version(1)
                .event_version(version)
                .build(),
            EventSource::new(service, "1.0.0"),
        )
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = EventFilter::default().compile().unwrap();
        assert!(f.matches(&ie(EventKind::TaskCreated, 1, "tasks")));
    }

    #[test]
    fn all_given_criteria_must_pass() {
        let f = EventFilter::builder()
            .event_types(vec![EventKind::TaskCreated, EventKind::TaskUpdated])
            .versions(vec![2])
            .sources(vec!["tasks".to_string()])
            .routing_pattern("task.*")
            .predicate(Arc::new(|e: &IntegrationEvent| e.event().aggregate_id() == "t1"))
            .build()
            .compile()
            .unwrap();

        assert!(f.matches(&ie(EventKind::TaskCreated, 2, "tasks")));
        assert!(!f.matches(&ie(EventKind::TaskCreated, 1, "tasks")));
        assert!(!f.matches(&ie(EventKind::TaskCreated, 2, "projects")));
        assert!(!f.matches(&ie(EventKind::TaskDeleted, 2, "tasks")));
    }

    #[test]
    fn predicate_only_filter() {
        let f = EventFilter::from_predicate(|e| e.event_version() > 1)
            .compile()
            .unwrap();
        assert!(!f.matches(&ie(EventKind::ProjectCreated, 1, "projects")));
        assert!(f.matches(&ie(EventKind::ProjectCreated, 3, "projects")));
    }

    #[test]
    fn invalid_filters_are_rejected() {
        let cases = [
            EventFilter::builder().event_types(vec![]).build(),
            EventFilter::builder().versions(vec![0]).build(),
            EventFilter::builder().sources(vec![" ".to_string()]).build(),
            EventFilter::builder().routing_pattern("task. *").build(),
        ];
        for filter in cases {
            let err = filter.compile().unwrap_err();
            assert!(matches!(err, EventError::InvalidFilter { .. }));
        }
    }
}

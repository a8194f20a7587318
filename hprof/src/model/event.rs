//! Thread lifecycle events recorded alongside samples

use std::fmt;

use crate::domain::{ObjectId, ThreadId};

/// Birth or death of a sampled thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadEvent {
    Start {
        object_id: ObjectId,
        thread_id: ThreadId,
        thread_name: Option<String>,
        group_name: Option<String>,
        parent_group_name: Option<String>,
    },
    End {
        thread_id: ThreadId,
    },
}

impl ThreadEvent {
    pub fn start(
        object_id: ObjectId,
        thread_id: ThreadId,
        thread_name: Option<String>,
        group_name: Option<String>,
        parent_group_name: Option<String>,
    ) -> Self {
        ThreadEvent::Start { object_id, thread_id, thread_name, group_name, parent_group_name }
    }

    #[must_use]
    pub fn end(thread_id: ThreadId) -> Self {
        ThreadEvent::End { thread_id }
    }

    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        match self {
            ThreadEvent::Start { thread_id, .. } | ThreadEvent::End { thread_id } => *thread_id,
        }
    }

    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, ThreadEvent::Start { .. })
    }
}

struct OrNull<'a>(&'a Option<String>);

impl fmt::Display for OrNull<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("null"))
    }
}

impl fmt::Display for ThreadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadEvent::Start { object_id, thread_id, thread_name, group_name, .. } => write!(
                f,
                "THREAD START (obj={object_id}, id = {thread_id}, name=\"{}\", group=\"{}\")",
                OrNull(thread_name),
                OrNull(group_name)
            ),
            ThreadEvent::End { thread_id } => write!(f, "THREAD END (id = {thread_id})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_display() {
        let event = ThreadEvent::start(
            ObjectId(1),
            ThreadId(200_001),
            Some("main".to_string()),
            Some("main".to_string()),
            Some("system".to_string()),
        );
        assert_eq!(
            event.to_string(),
            "THREAD START (obj=1, id = 200001, name=\"main\", group=\"main\")"
        );
    }

    #[test]
    fn test_end_display_and_accessors() {
        let event = ThreadEvent::end(ThreadId(7));
        assert_eq!(event.to_string(), "THREAD END (id = 7)");
        assert_eq!(event.thread_id(), ThreadId(7));
        assert!(!event.is_start());
    }

    #[test]
    fn test_missing_names_render_as_null() {
        let event = ThreadEvent::start(ObjectId(2), ThreadId(3), None, None, None);
        assert!(event.to_string().contains("name=\"null\", group=\"null\""));
    }
}

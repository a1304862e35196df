//! # Miss tasks
//!
//! `MissTask` is `{submission_ms, key}` where `key` encodes
//! `type && uid && param?` with the two-byte separator `&&`. One upstream
//! code path was seen passing a single character to its splitter, but the
//! two-character form is the one actually used to build keys, so that's
//! what's implemented here.

use bytes::Bytes;

use crate::error::{ResolverError, ResolverResult};

pub const KEY_SEPARATOR: &str = "&&";

/// The four miss-task key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Category,
    Tag,
    CategoryStat,
    TagStat,
}

impl TaskType {
    fn from_str(s: &str) -> Option<TaskType> {
        match s {
            "category" => Some(TaskType::Category),
            "tag" => Some(TaskType::Tag),
            "category_stat" => Some(TaskType::CategoryStat),
            "tag_stat" => Some(TaskType::TagStat),
            _ => None,
        }
    }

    /// `category`/`tag` require `type&&uid&&param`; `category_stat`/
    /// `tag_stat` require `type&&uid`.
    pub fn requires_param(self) -> bool {
        matches!(self, TaskType::Category | TaskType::Tag)
    }
}

/// A miss-task key, parsed and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKey {
    pub task_type: TaskType,
    pub uid: String,
    pub param: Option<String>,
}

impl TaskKey {
    /// Splits and validates a raw miss-task key.
    pub fn parse(key: &[u8]) -> ResolverResult<TaskKey> {
        let text = std::str::from_utf8(key)
            .map_err(|_| ResolverError::InvalidKey("not valid utf-8".into()))?;
        let parts: Vec<&str> = text.split(KEY_SEPARATOR).collect();

        let (type_str, uid, param) = match parts.as_slice() {
            [t, uid] => (*t, *uid, None),
            [t, uid, param] => (*t, *uid, Some(*param)),
            _ => {
                return Err(ResolverError::InvalidKey(format!(
                    "expected 2 or 3 '&&'-separated parts, got {}",
                    parts.len()
                )))
            }
        };

        let task_type = TaskType::from_str(type_str)
            .ok_or_else(|| ResolverError::InvalidKey(format!("unknown task type '{type_str}'")))?;

        if task_type.requires_param() != param.is_some() {
            return Err(ResolverError::InvalidKey(format!(
                "wrong arity for task type '{type_str}'"
            )));
        }

        Ok(TaskKey { task_type, uid: uid.to_string(), param: param.map(str::to_string) })
    }
}

/// One enqueued backfill request.
#[derive(Debug, Clone)]
pub struct MissTask {
    pub submission_ms: i64,
    pub key: Bytes,
}

impl MissTask {
    pub fn new(submission_ms: i64, key: Bytes) -> Self {
        MissTask { submission_ms, key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_category_key() {
        let parsed = TaskKey::parse(b"category&&u1&&c1").unwrap();
        assert_eq!(parsed.task_type, TaskType::Category);
        assert_eq!(parsed.uid, "u1");
        assert_eq!(parsed.param.as_deref(), Some("c1"));
    }

    #[test]
    fn parses_stat_key_without_param() {
        let parsed = TaskKey::parse(b"category_stat&&u1").unwrap();
        assert_eq!(parsed.task_type, TaskType::CategoryStat);
        assert_eq!(parsed.param, None);
    }

    #[test]
    fn rejects_category_without_param() {
        assert!(TaskKey::parse(b"category&&u1").is_err());
    }

    #[test]
    fn rejects_stat_with_extra_param() {
        assert!(TaskKey::parse(b"category_stat&&u1&&extra").is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(TaskKey::parse(b"bogus&&u1&&p1").is_err());
    }

    #[test]
    fn single_ampersand_does_not_split() {
        // Guards the two-character-separator decision.
        let err = TaskKey::parse(b"category&u1&c1").unwrap_err();
        assert!(matches!(err, ResolverError::InvalidKey(_)));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::priority::RefreshPriority;

/// Logical refresh operations issued by the plan views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshKind {
    WorkoutPlan,
    ApprovalStatus,
    WeeklyHeader,
    MonthlyData,
}

impl RefreshKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshKind::WorkoutPlan => "WORKOUT_PLAN",
            RefreshKind::ApprovalStatus => "APPROVAL_STATUS",
            RefreshKind::WeeklyHeader => "WEEKLY_HEADER",
            RefreshKind::MonthlyData => "MONTHLY_DATA",
        }
    }
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "please refresh X" request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOperation {
    pub kind: RefreshKind,
    /// Sorted by key, so the logical key does not depend on insertion order
    pub params: BTreeMap<String, Value>,
    /// Falls back to the coordinator's default cooldown
    #[serde(default, with = "optional_millis")]
    pub cooldown: Option<Duration>,
    #[serde(default)]
    pub priority: RefreshPriority,
}

impl RefreshOperation {
    pub fn new(kind: RefreshKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
            cooldown: None,
            priority: RefreshPriority::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_priority(mut self, priority: RefreshPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Deterministic key: kind plus params serialized in sorted order
    pub fn key(&self) -> String {
        let params: BTreeMap<&String, Value> = self
            .params
            .iter()
            .map(|(name, value)| (name, canonicalize(value)))
            .collect();
        let params = serde_json::to_string(&params).unwrap_or_else(|_| "{}".to_string());
        format!("{}_{}", self.kind, params)
    }
}

/// Rebuild nested objects in sorted key order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Recent failure kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshFailure {
    pub key: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// What subscribers are told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RefreshEvent {
    Started {
        key: String,
        priority: RefreshPriority,
    },
    Deduplicated {
        key: String,
    },
    CooldownRejected {
        key: String,
        remaining_ms: u64,
    },
    Succeeded {
        key: String,
        duration_ms: u64,
    },
    Failed {
        key: String,
        message: String,
    },
    Cancelled {
        key: String,
    },
    Cleared {
        pending: usize,
    },
}

impl RefreshEvent {
    pub fn key(&self) -> Option<&str> {
        match self {
            RefreshEvent::Started { key, .. }
            | RefreshEvent::Deduplicated { key }
            | RefreshEvent::CooldownRejected { key, .. }
            | RefreshEvent::Succeeded { key, .. }
            | RefreshEvent::Failed { key, .. }
            | RefreshEvent::Cancelled { key } => Some(key),
            RefreshEvent::Cleared { .. } => None,
        }
    }
}

/// Snapshot handed to subscribers with every event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshState {
    /// True iff at least one execution is in flight
    pub is_refreshing: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub pending_operations: Vec<String>,
    pub recent_errors: Vec<RefreshFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub pending_count: usize,
    pub pending_keys: Vec<String>,
    pub history_size: usize,
    pub error_count: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority attached to a refresh request.
/// Higher values = more urgent; carried into spans and stats, never used to drop work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPriority {
    /// Background refreshes (monthly rollups)
    Low = 0,
    /// Default for status checks
    #[default]
    Normal = 1,
    /// User is waiting on the result (plan just saved)
    High = 2,
}

impl RefreshPriority {
    /// Get the numeric priority value
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for RefreshPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefreshPriority::High => "HIGH",
            RefreshPriority::Normal => "NORMAL",
            RefreshPriority::Low => "LOW",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for RefreshPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RefreshPriority::Low),
            "normal" | "" => Ok(RefreshPriority::Normal),
            "high" => Ok(RefreshPriority::High),
            other => Err(format!("unknown refresh priority: {other}")),
        }
    }
}

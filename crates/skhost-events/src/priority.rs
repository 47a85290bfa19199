use std::fmt;
use std::str::FromStr;

/// Priority tier a listener is registered at
///
/// Tiers are dispatched by the host in ascending order, `Lowest` first and
/// `Monitor` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum EventPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Monitor,
}

impl EventPriority {
    /// Every tier in dispatch order
    pub const ALL: [EventPriority; 6] = [
        EventPriority::Lowest,
        EventPriority::Low,
        EventPriority::Normal,
        EventPriority::High,
        EventPriority::Highest,
        EventPriority::Monitor,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lowest => "lowest",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Highest => "highest",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event priority '{0}'")]
pub struct ParsePriorityError(pub String);

impl FromStr for EventPriority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        EventPriority::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ParsePriorityError(s.to_string()))
    }
}

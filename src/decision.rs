//! Decision values and vote aggregation

use std::fmt;

use serde::Serialize;

/// Direction of a scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Down,
    Nothing,
    Up,
}

impl ScaleDirection {
    /// Map a clamped vote to a direction.
    pub fn from_vote(vote: i64) -> Self {
        match vote.signum() {
            1 => ScaleDirection::Up,
            -1 => ScaleDirection::Down,
            _ => ScaleDirection::Nothing,
        }
    }

    pub fn as_vote(self) -> i64 {
        match self {
            ScaleDirection::Down => -1,
            ScaleDirection::Nothing => 0,
            ScaleDirection::Up => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleDirection::Down => "down",
            ScaleDirection::Nothing => "nothing",
            ScaleDirection::Up => "up",
        }
    }
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleEvent {
    Success,
    Error,
    NoAction,
    NotMaster,
}

/// Result of the master election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Master,
    Slave,
    Unknown,
}

/// Webhook phase around a policy execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    Pre,
    Post,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookType::Pre => f.write_str("pre"),
            HookType::Post => f.write_str("post"),
        }
    }
}

/// Single vote of a value against an up/down threshold pair.
pub fn threshold_vote(value: f64, scale_up_threshold: f64, scale_down_threshold: f64) -> i64 {
    if value > scale_up_threshold {
        1
    } else if value < scale_down_threshold {
        -1
    } else {
        0
    }
}

/// Sum the plugin votes and clamp the sum to `-1..=1`.
///
/// Abstentions (`None`) are skipped. If every plugin abstained there is no
/// data and the result is `None`, which is not the same as "do nothing".
pub fn aggregate<I>(votes: I) -> Option<ScaleDirection>
where
    I: IntoIterator<Item = Option<i64>>,
{
    let mut total: Option<i64> = None;
    for vote in votes.into_iter().flatten() {
        total = Some(total.unwrap_or(0).saturating_add(vote));
    }

    total.map(|sum| ScaleDirection::from_vote(sum.clamp(-1, 1)))
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Load,
    Count,
    Explore,
    Run,
    StopRun,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Load => "load",
            ActionKind::Count => "count",
            ActionKind::Explore => "explore",
            ActionKind::Run => "run",
            ActionKind::StopRun => "stop_run",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle operation sent to a controller. Serializes to the request
/// body used by isolation hosts, e.g. `{"action":"count","filter":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Load,
    Count { filter: String },
    Explore { filter: String },
    Run { filter: String },
    StopRun { force: bool },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Load => ActionKind::Load,
            Action::Count { .. } => ActionKind::Count,
            Action::Explore { .. } => ActionKind::Explore,
            Action::Run { .. } => ActionKind::Run,
            Action::StopRun { .. } => ActionKind::StopRun,
        }
    }
}

//! Entity kind model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The closed set of entity kinds the sync engine knows how to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Plans,
    PlanDays,
    Activities,
    TrainingTypes,
    Exercises,
    Sessions,
    SessionItems,
    TimerTemplates,
    TimerIntervals,
    TimerSessions,
    TimerLaps,
    ClimbEntries,
    ClimbStyles,
    ClimbGyms,
    PlanKinds,
    DayTypes,
    Combinations,
}

impl EntityKind {
    /// Every kind, in wire-name declaration order.
    pub const ALL: [Self; 17] = [
        Self::Plans,
        Self::PlanDays,
        Self::Activities,
        Self::TrainingTypes,
        Self::Exercises,
        Self::Sessions,
        Self::SessionItems,
        Self::TimerTemplates,
        Self::TimerIntervals,
        Self::TimerSessions,
        Self::TimerLaps,
        Self::ClimbEntries,
        Self::ClimbStyles,
        Self::ClimbGyms,
        Self::PlanKinds,
        Self::DayTypes,
        Self::Combinations,
    ];

    /// Name used on the wire and in persisted rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plans => "plans",
            Self::PlanDays => "plan_days",
            Self::Activities => "activities",
            Self::TrainingTypes => "training_types",
            Self::Exercises => "exercises",
            Self::Sessions => "sessions",
            Self::SessionItems => "session_items",
            Self::TimerTemplates => "timer_templates",
            Self::TimerIntervals => "timer_intervals",
            Self::TimerSessions => "timer_sessions",
            Self::TimerLaps => "timer_laps",
            Self::ClimbEntries => "climb_entries",
            Self::ClimbStyles => "climb_styles",
            Self::ClimbGyms => "climb_gyms",
            Self::PlanKinds => "plan_kinds",
            Self::DayTypes => "day_types",
            Self::Combinations => "combinations",
        }
    }

    /// Human readable label shown next to conflicts.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plans => "Plans",
            Self::PlanDays => "Plan Days",
            Self::Activities => "Activities",
            Self::TrainingTypes => "Training Types",
            Self::Exercises => "Exercises",
            Self::Sessions => "Session Entries",
            Self::SessionItems => "Session Items",
            Self::TimerTemplates => "Timer Templates",
            Self::TimerIntervals => "Timer Intervals",
            Self::TimerSessions => "Timer Sessions",
            Self::TimerLaps => "Timer Laps",
            Self::ClimbEntries => "Climb Entries",
            Self::ClimbStyles => "Climb Styles",
            Self::ClimbGyms => "Climb Gyms",
            Self::PlanKinds => "Plan Kinds",
            Self::DayTypes => "Day Types",
            Self::Combinations => "Combinations",
        }
    }

    /// Look up a kind by wire name, ignoring surrounding whitespace and case.
    ///
    /// Returns `None` for kinds this client does not know about, which lets
    /// callers skip entities added on the server after this build shipped.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidInput(format!("unknown entity kind '{s}'")))
    }
}

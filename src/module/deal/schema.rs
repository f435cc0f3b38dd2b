use super::model::Deal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStatus {
    New,
    Executable,
    Executed,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Executable => "EXECUTABLE",
            Self::Executed => "EXECUTED",
        }
    }

    /// A pending deal holds the active-deal slot.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Executable)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DealStatusTransition {
    pub from_status: Option<DealStatus>,
    pub to_status: DealStatus,
    pub transitioned_at: i64,
}

/// What a mix trigger ended up doing.
#[derive(Debug, Clone)]
pub enum MixOutcome {
    NotDue { blocks_left: i64 },
    QuorumNotReached { quorum: usize, threshold: usize },
    Executed { deal: Deal },
}

impl MixOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDue { .. } => "NOT_DUE",
            Self::QuorumNotReached { .. } => "QUORUM_NOT_REACHED",
            Self::Executed { .. } => "EXECUTED",
        }
    }
}

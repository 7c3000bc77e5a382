use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::{GoalId, GoalStatus};
use crate::msgs::JointState;

/// Unified message wrapper for the action bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Fully qualified action endpoint or topic name, e.g.
    /// `"/arm/follow_joint_trajectory"`.
    pub endpoint: String,
    pub body: FrameBody,
}

impl Frame {
    /// Wrap `body` in a freshly stamped frame addressed to `endpoint`.
    pub fn new(endpoint: impl Into<String>, body: FrameBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            endpoint: endpoint.into(),
            body,
        }
    }
}

/// Variants of data that travel over the action bus.
///
/// Goal payloads, feedback and results are carried as JSON values so that a
/// single bus serves every command kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum FrameBody {
    /// Client → server: start a new goal.
    Goal { goal_id: GoalId, goal: Value },
    /// Client → server: cancel one goal, or every goal on the endpoint when
    /// `goal_id` is `None`.
    Cancel { goal_id: Option<GoalId> },
    /// Server → client: the goal's status changed.
    Status { goal_id: GoalId, status: GoalStatus },
    /// Server → client: progress report.
    Feedback {
        goal_id: GoalId,
        status: GoalStatus,
        feedback: Value,
    },
    /// Server → client: the goal finished.
    Result {
        goal_id: GoalId,
        status: GoalStatus,
        result: Value,
    },
    /// Joint state broadcast on a topic.
    JointState(JointState),
}

impl FrameBody {
    /// The goal this frame refers to, if any.
    pub fn goal_id(&self) -> Option<GoalId> {
        match self {
            FrameBody::Goal { goal_id, .. }
            | FrameBody::Status { goal_id, .. }
            | FrameBody::Feedback { goal_id, .. }
            | FrameBody::Result { goal_id, .. } => Some(*goal_id),
            FrameBody::Cancel { goal_id } => *goal_id,
            FrameBody::JointState(_) => None,
        }
    }
}

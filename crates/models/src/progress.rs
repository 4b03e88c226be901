use crate::run::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events streamed to per-run progress channels.
///
/// The execution worker publishes `run:started` first, then `action:*`
/// events, then exactly one terminal `run:completed` or `run:error`. Field
/// names are camelCase on the wire for the dashboard clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum RunProgressEvent {
    #[serde(rename = "run:started", rename_all = "camelCase")]
    RunStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        recording_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        recording_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_name: Option<String>,
        total_actions: u32,
        browser: String,
    },
    #[serde(rename = "action:started", rename_all = "camelCase")]
    ActionStarted {
        action_id: String,
        action_type: String,
        action_index: u32,
        total_actions: u32,
    },
    #[serde(rename = "action:success", rename_all = "camelCase")]
    ActionSuccess {
        action_id: String,
        action_type: String,
        action_index: u32,
        total_actions: u32,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        selector_used: Option<String>,
    },
    #[serde(rename = "action:failed", rename_all = "camelCase")]
    ActionFailed {
        action_id: String,
        action_type: String,
        action_index: u32,
        total_actions: u32,
        error_message: String,
        duration_ms: u64,
    },
    #[serde(rename = "action:skipped", rename_all = "camelCase")]
    ActionSkipped {
        action_id: String,
        action_type: String,
        action_index: u32,
        total_actions: u32,
        reason: String,
    },
    #[serde(rename = "run:completed", rename_all = "camelCase")]
    RunCompleted {
        status: RunStatus,
        duration_ms: u64,
        actions_executed: u32,
        actions_failed: u32,
        actions_skipped: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_path: Option<String>,
    },
    #[serde(rename = "run:error", rename_all = "camelCase")]
    RunError {
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_stack: Option<String>,
    },
}

impl RunProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RunProgressEvent::RunStarted { .. } => "run:started",
            RunProgressEvent::ActionStarted { .. } => "action:started",
            RunProgressEvent::ActionSuccess { .. } => "action:success",
            RunProgressEvent::ActionFailed { .. } => "action:failed",
            RunProgressEvent::ActionSkipped { .. } => "action:skipped",
            RunProgressEvent::RunCompleted { .. } => "run:completed",
            RunProgressEvent::RunError { .. } => "run:error",
        }
    }

    /// Terminal events close a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunProgressEvent::RunCompleted { .. } | RunProgressEvent::RunError { .. }
        )
    }
}

/// Envelope published on the wire. The timestamp is stamped at publish
/// time, never caller-supplied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunProgressMessage {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunProgressEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_and_fields_round_trip() {
        let msg = RunProgressMessage {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event: RunProgressEvent::ActionFailed {
                action_id: "a-12".to_string(),
                action_type: "click".to_string(),
                action_index: 3,
                total_actions: 9,
                error_message: "selector not found".to_string(),
                duration_ms: 1500,
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "action:failed");
        assert_eq!(json["actionIndex"], 3);
        assert_eq!(json["errorMessage"], "selector not found");

        let back: RunProgressMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let msg = RunProgressMessage {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event: RunProgressEvent::RunCompleted {
                status: RunStatus::Passed,
                duration_ms: 4200,
                actions_executed: 9,
                actions_failed: 0,
                actions_skipped: 1,
                video_path: None,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("videoPath").is_none());
        assert_eq!(json["status"], "passed");
    }
}

//! Journal entries recorded for every saga execution.

use chrono::{DateTime, Utc};
use common::ExecutionId;
use serde::{Deserialize, Serialize};

/// Things that happen during one saga execution, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    SagaStarted(SagaStartedData),
    StepStarted(StepData),
    StepCompleted(StepData),
    StepFailed(StepFailedData),

    /// A step failed; unwinding of the completed steps begins.
    CompensationStarted(CompensationData),

    CompensationStepCompleted(StepData),

    /// The step had no compensation.
    CompensationStepSkipped(StepData),

    /// One compensation attempt failed. Unwinding continues either way.
    CompensationStepFailed(CompensationFailedData),

    SagaCompleted(SagaCompletedData),
    SagaFailed(SagaFailedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepSkipped(_) => "CompensationStepSkipped",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }

    /// Step the entry refers to, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            SagaEvent::StepStarted(d)
            | SagaEvent::StepCompleted(d)
            | SagaEvent::CompensationStepCompleted(d)
            | SagaEvent::CompensationStepSkipped(d) => Some(&d.step_name),
            SagaEvent::StepFailed(d) => Some(&d.step_name),
            SagaEvent::CompensationStepFailed(d) => Some(&d.step_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub execution_id: ExecutionId,
    pub saga_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    /// The step whose failure triggered the unwind.
    pub from_step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationFailedData {
    pub step_name: String,
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub failed_step: String,
    pub compensated: bool,
    pub failed_at: DateTime<Utc>,
}

impl SagaEvent {
    pub fn saga_started(execution_id: ExecutionId, saga_name: impl Into<String>) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            execution_id,
            saga_name: saga_name.into(),
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    pub fn compensation_started(from_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_skipped(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepSkipped(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(CompensationFailedData {
            step_name: step_name.into(),
            attempt,
            error: error.into(),
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_failed(failed_step: impl Into<String>, compensated: bool) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            failed_step: failed_step.into(),
            compensated,
            failed_at: Utc::now(),
        })
    }
}

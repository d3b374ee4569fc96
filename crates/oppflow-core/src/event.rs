//! Notifications emitted by the engine.
//!
//! Delivery is out of scope: the engine hands each [`PipelineEvent`] to an
//! [`EventSink`] and moves on. Sinks must not block.

use crate::types::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Transitioned { from: StageStatus, to: StageStatus },
    CriticalRisk { days_remaining: i64 },
    UrgentPriority { days_remaining: i64 },
    PipelineCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub stage_instance_id: Uuid,
    pub opportunity_id: Uuid,
    #[serde(flatten)]
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: PipelineEvent) {
        (**self).emit(event)
    }
}

/// Default sink: one structured log line per event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        match &event.kind {
            EventKind::Transitioned { from, to } => tracing::info!(
                stage = %event.stage_instance_id,
                opportunity = %event.opportunity_id,
                %from,
                %to,
                "stage transitioned"
            ),
            EventKind::CriticalRisk { days_remaining } => tracing::warn!(
                stage = %event.stage_instance_id,
                opportunity = %event.opportunity_id,
                days_remaining,
                "stage entered critical risk"
            ),
            EventKind::UrgentPriority { days_remaining } => tracing::warn!(
                stage = %event.stage_instance_id,
                opportunity = %event.opportunity_id,
                days_remaining,
                "stage became urgent"
            ),
            EventKind::PipelineCompleted => tracing::info!(
                opportunity = %event.opportunity_id,
                "pipeline completed"
            ),
        }
    }
}

/// Keeps every event in memory; used by tests and the CLI's sweep summary.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<PipelineEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

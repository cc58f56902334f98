use super::test_helpers::*;
use super::*;
use crate::engine::{Phase, PhaseState, PhaseUpdate, TransferUpdate};
use crate::error::Error;
use crate::types::{Event, NewTask, Stage, Status, TaskId};
use std::sync::Arc;
use std::time::Duration;


/// Drain every event currently buffered for `id`
fn drain_task_events(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    id: &TaskId,
) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.task_id() == id {
            events.push(event);
        }
    }
    events
}

/// Percent values carried by update events, in order
fn percents(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::TaskUpdated { task } => Some(task.progress.percent),
            Event::TaskRemoved { .. } => None,
        })
        .collect()
}

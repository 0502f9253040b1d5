use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::instance::InstanceStatus;

pub type EventSender = mpsc::UnboundedSender<FleetEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    StateChange {
        instance: String,
        old: InstanceStatus,
        new: InstanceStatus,
    },

    Console {
        instance: String,
        chunk: String,
    },

    QueueChange {
        queue: Vec<String>,
    },

    ServerListChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetEvent {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl FleetEvent {
    fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn state_change<S: Into<String>>(
        instance: S,
        old: InstanceStatus,
        new: InstanceStatus,
    ) -> Self {
        Self::new(EventPayload::StateChange {
            instance: instance.into(),
            old,
            new,
        })
    }

    pub fn console<S: Into<String>, C: Into<String>>(instance: S, chunk: C) -> Self {
        Self::new(EventPayload::Console {
            instance: instance.into(),
            chunk: chunk.into(),
        })
    }

    pub fn queue_change(queue: Vec<String>) -> Self {
        Self::new(EventPayload::QueueChange { queue })
    }

    pub fn server_list_change() -> Self {
        Self::new(EventPayload::ServerListChange)
    }
}

impl Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ", self.timestamp, self.id)?;
        match &self.payload {
            EventPayload::StateChange { instance, old, new } => {
                write!(f, "{}: state changed: {} -> {}", instance, old, new)
            }
            EventPayload::Console { instance, chunk } => {
                write!(f, "{}: {} bytes of output", instance, chunk.len())
            }
            EventPayload::QueueChange { queue } => {
                write!(f, "queue changed: {} pending", queue.len())
            }
            EventPayload::ServerListChange => write!(f, "server list changed"),
        }
    }
}

mod event;

pub use event::{EventPayload, EventSender, FleetEvent};

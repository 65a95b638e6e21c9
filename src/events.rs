//! Events emitted by a [`RegistrationSession`](crate::session::RegistrationSession).

use crate::enums::Role;
use crate::volume_loader::DatasetSummary;

use futures::channel::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ProgressUpdated { percent: u8, message: String },
    ProcessFinished { success: bool, message: String },
    DatasetLoaded { role: Role, summary: DatasetSummary },
}

impl SessionEvent {
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        SessionEvent::ProgressUpdated {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    pub fn finished(success: bool, message: impl Into<String>) -> Self {
        SessionEvent::ProcessFinished {
            success,
            message: message.into(),
        }
    }
}

/// Receiver of session events. Delivery must not block for long: events are
/// emitted from the thread running the operation.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}

impl EventSink for UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.unbounded_send(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}

//! Events reported by the mixer

use crate::source::SourceId;
use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    /// A non-looping source ran out of queued data.
    SourceStopped { source_id: SourceId },
    /// A looping source wrapped back to the head of its queue.
    SourceLooped { source_id: SourceId },
    /// A queue entry finished playing and can be unqueued.
    BufferProcessed { source_id: SourceId },
    /// The backend lost its device; every source has been stopped.
    DeviceDisconnected,
}

impl MixerEvent {
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            Self::SourceStopped { source_id }
            | Self::SourceLooped { source_id }
            | Self::BufferProcessed { source_id } => Some(*source_id),
            Self::DeviceDisconnected => None,
        }
    }
}

/// Queues an event without blocking; events are dropped when nobody drains
/// the queue.
#[inline]
pub(crate) fn emit(events: &Sender<MixerEvent>, event: MixerEvent) {
    let _ = events.try_send(event);
}

//! Per-source buffer queue and its end-of-buffer transitions.

use crate::buffer::Buffer;
use crate::error::{Result, SpatialMixError};
use std::sync::Arc;

/// Frames of look-ahead kept past the end of the current buffer.
pub const PAD_FRAMES: usize = 2;
/// Widest buffer layout the pad has room for.
pub const MAX_BUFFER_CHANNELS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Processed,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub buffer: Option<Arc<Buffer>>,
    pub state: EntryState,
}

impl QueueEntry {
    /// Length in frames; a null entry counts as empty.
    pub fn frames(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.frames())
    }
}

/// Integer frame position plus a 14-bit fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub pos: usize,
    pub frac: u32,
}

/// Outcome of [`BufferQueue::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moved on to the next queued entry.
    NextBuffer,
    /// Wrapped back to the queue head.
    Looped,
    /// Ran off the end of a non-looping queue.
    Stopped,
    /// Nothing playable is queued; the source stays silent this pass.
    Empty,
}

#[derive(Debug, Clone)]
pub struct BufferQueue {
    entries: Vec<QueueEntry>,
    current: usize,
    pad: [f32; PAD_FRAMES * MAX_BUFFER_CHANNELS],
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current: 0,
            pad: [0.0; PAD_FRAMES * MAX_BUFFER_CHANNELS],
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_entry(&self) -> Option<&QueueEntry> {
        self.entries.get(self.current)
    }

    pub fn current_buffer(&self) -> Option<&Arc<Buffer>> {
        self.current_entry().and_then(|e| e.buffer.as_ref())
    }

    /// Frames in the entry under the cursor, zero past the end of the queue.
    pub fn current_frames(&self) -> usize {
        self.current_entry().map_or(0, QueueEntry::frames)
    }

    pub fn total_frames(&self) -> usize {
        self.entries.iter().map(QueueEntry::frames).sum()
    }

    /// First non-null buffer; it defines the format of the whole queue.
    pub fn format_buffer(&self) -> Option<&Arc<Buffer>> {
        self.entries.iter().find_map(|e| e.buffer.as_ref())
    }

    pub fn processed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Processed)
            .count()
    }

    /// Appends entries. Every buffer in a queue shares one channel count and
    /// sample rate.
    pub fn queue(&mut self, buffers: impl IntoIterator<Item = Option<Arc<Buffer>>>) -> Result<()> {
        let buffers: Vec<Option<Arc<Buffer>>> = buffers.into_iter().collect();
        let mut reference = self
            .format_buffer()
            .map(|b| (b.channels(), b.sample_rate()));

        for buffer in buffers.iter().flatten() {
            let format = (buffer.channels(), buffer.sample_rate());
            match reference {
                Some(expected) if expected != format => {
                    return Err(SpatialMixError::InvalidOperation(format!(
                        "Buffer format {:?} does not match queue format {:?}",
                        format, expected
                    )));
                }
                _ => reference = Some(format),
            }
        }

        self.entries
            .extend(buffers.into_iter().map(|buffer| QueueEntry {
                buffer,
                state: EntryState::Pending,
            }));
        Ok(())
    }

    /// Removes the leading run of processed entries and returns their buffers.
    pub fn unqueue_processed(&mut self) -> Vec<Option<Arc<Buffer>>> {
        let count = self
            .entries
            .iter()
            .take_while(|e| e.state == EntryState::Processed)
            .count();
        self.current = self.current.saturating_sub(count);
        self.entries.drain(..count).map(|e| e.buffer).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = 0;
    }

    /// Back to the head with every entry pending.
    pub fn rewind(&mut self) {
        self.current = 0;
        self.mark_all(EntryState::Pending);
    }

    pub fn mark_all(&mut self, state: EntryState) {
        for entry in &mut self.entries {
            entry.state = state;
        }
    }

    /// Called once the cursor has reached the end of the current entry.
    pub fn advance(&mut self, cursor: &mut Cursor, looping: bool) -> Transition {
        if self.entries.is_empty() || (looping && self.total_frames() == 0) {
            return Transition::Empty;
        }
        if self.current >= self.entries.len() {
            return Transition::Stopped;
        }

        let frames = self.current_frames();
        if self.current + 1 < self.entries.len() {
            if !looping {
                for entry in &mut self.entries[..=self.current] {
                    entry.state = EntryState::Processed;
                }
            }
            self.current += 1;
            cursor.pos = cursor.pos.saturating_sub(frames);
            return Transition::NextBuffer;
        }

        if !looping {
            self.mark_all(EntryState::Processed);
            self.current = self.entries.len();
            *cursor = Cursor::default();
            return Transition::Stopped;
        }

        self.rewind();
        if self.entries.len() == 1 {
            cursor.pos %= frames;
        } else {
            cursor.pos = cursor.pos.saturating_sub(frames);
        }
        Transition::Looped
    }

    /// Fills the pad with the first frames that follow the current entry:
    /// the next entry, the queue head when looping, or silence.
    pub fn refresh_pad(&mut self, looping: bool) {
        self.pad = [0.0; PAD_FRAMES * MAX_BUFFER_CHANNELS];

        let next = if self.current + 1 < self.entries.len() {
            self.entries[self.current + 1].buffer.as_ref()
        } else if looping {
            self.entries.first().and_then(|e| e.buffer.as_ref())
        } else {
            None
        };
        let Some(next) = next else {
            return;
        };

        let channels = (next.channels() as usize).min(MAX_BUFFER_CHANNELS);
        let frames = next.frames().min(PAD_FRAMES);
        for frame in 0..frames {
            for chan in 0..channels {
                self.pad[frame * channels + chan] = next.sample(frame, chan);
            }
        }
    }

    /// Reads one sample of the current entry, continuing into the pad past
    /// its end.
    #[inline]
    pub fn sample(&self, buffer: &Buffer, frame: usize, chan: usize) -> f32 {
        if frame < buffer.frames() {
            buffer.sample(frame, chan)
        } else {
            let channels = buffer.channels() as usize;
            self.pad
                .get((frame - buffer.frames()) * channels + chan)
                .copied()
                .unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(frames: usize) -> Arc<Buffer> {
        let samples: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        Buffer::from_f32(&samples, 1, 44100).unwrap()
    }

    fn queue_of(lengths: &[usize]) -> BufferQueue {
        let mut queue = BufferQueue::new();
        queue
            .queue(lengths.iter().map(|&n| Some(ramp_buffer(n))))
            .unwrap();
        queue
    }

    #[test]
    fn single_buffer_loop_wraps_modulo_length() {
        let mut queue = queue_of(&[8]);
        let mut cursor = Cursor { pos: 19, frac: 77 };
        assert_eq!(queue.advance(&mut cursor, true), Transition::Looped);
        assert_eq!(cursor, Cursor { pos: 3, frac: 77 });
        assert_eq!(queue.current_index(), 0);
        assert!(queue.entries().iter().all(|e| e.state == EntryState::Pending));
    }

    #[test]
    fn loop_seam_reads_the_head() {
        let mut queue = queue_of(&[4]);
        queue.refresh_pad(true);
        let buffer = queue.current_buffer().cloned().unwrap();
        assert_eq!(queue.sample(&buffer, 3, 0), 3.0);
        assert_eq!(queue.sample(&buffer, 4, 0), 0.0);
        assert_eq!(queue.sample(&buffer, 5, 0), 1.0);

        queue.refresh_pad(false);
        assert_eq!(queue.sample(&buffer, 5, 0), 0.0);
    }

    #[test]
    fn non_looping_queue_stops_once_with_everything_processed() {
        let mut queue = queue_of(&[4, 4]);
        let mut cursor = Cursor { pos: 5, frac: 0 };

        assert_eq!(queue.advance(&mut cursor, false), Transition::NextBuffer);
        assert_eq!(cursor.pos, 1);
        assert_eq!(queue.processed_count(), 1);

        cursor.pos = 4;
        assert_eq!(queue.advance(&mut cursor, false), Transition::Stopped);
        assert_eq!(cursor, Cursor::default());
        assert_eq!(queue.processed_count(), 2);
        assert!(queue.current_entry().is_none());
    }

    #[test]
    fn looping_queue_keeps_entries_pending() {
        let mut queue = queue_of(&[3, 5]);
        let mut cursor = Cursor { pos: 3, frac: 0 };
        assert_eq!(queue.advance(&mut cursor, true), Transition::NextBuffer);
        assert_eq!(queue.processed_count(), 0);

        cursor.pos = 6;
        assert_eq!(queue.advance(&mut cursor, true), Transition::Looped);
        assert_eq!(cursor.pos, 1);
        assert_eq!(queue.current_index(), 0);
    }

    #[test]
    fn empty_and_zero_length_queues_are_silent() {
        let mut cursor = Cursor::default();
        assert_eq!(BufferQueue::new().advance(&mut cursor, false), Transition::Empty);

        let mut queue = BufferQueue::new();
        queue.queue([None, None]).unwrap();
        assert_eq!(queue.advance(&mut cursor, true), Transition::Empty);
        assert_eq!(queue.advance(&mut cursor, false), Transition::NextBuffer);
        assert_eq!(queue.advance(&mut cursor, false), Transition::Stopped);
    }

    #[test]
    fn unqueue_returns_leading_processed_entries() {
        let mut queue = queue_of(&[2, 2, 2]);
        let mut cursor = Cursor { pos: 2, frac: 0 };
        queue.advance(&mut cursor, false);
        cursor.pos = 2;
        queue.advance(&mut cursor, false);

        let removed = queue.unqueue_processed();
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.current_index(), 0);
    }

    #[test]
    fn rejects_mismatched_formats() {
        let mut queue = queue_of(&[2]);
        let stereo = Buffer::from_f32(&[0.0; 4], 2, 44100).unwrap();
        assert!(queue.queue([Some(stereo)]).is_err());
        assert_eq!(queue.len(), 1);
    }
}

use midly::{
    MidiMessage,
    num::{u4, u7},
};

pub const DEFAULT_MIDI_EVENT_CAPACITY: usize = 256;

/// A channel message positioned at a frame offset inside the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub time: u32,
    pub channel: u4,
    pub message: MidiMessage,
}

impl MidiEvent {
    #[must_use]
    pub fn note_on(time: u32, channel: u8, key: u8, velocity: u8) -> Self {
        Self {
            time,
            channel: u4::from(channel.min(15)),
            message: MidiMessage::NoteOn {
                key: u7::from(key.min(127)),
                vel: u7::from(velocity.min(127)),
            },
        }
    }

    #[must_use]
    pub fn note_off(time: u32, channel: u8, key: u8) -> Self {
        Self {
            time,
            channel: u4::from(channel.min(15)),
            message: MidiMessage::NoteOff {
                key: u7::from(key.min(127)),
                vel: u7::from(0),
            },
        }
    }

    #[must_use]
    pub fn controller(time: u32, channel: u8, controller: u8, value: u8) -> Self {
        Self {
            time,
            channel: u4::from(channel.min(15)),
            message: MidiMessage::Controller {
                controller: u7::from(controller.min(127)),
                value: u7::from(value.min(127)),
            },
        }
    }

    /// Note-on with a zero velocity is a note-off by convention.
    #[must_use]
    pub fn is_note_on(&self) -> bool {
        matches!(self.message, MidiMessage::NoteOn { vel, .. } if vel.as_int() > 0)
    }

    #[must_use]
    pub fn velocity(&self) -> Option<u8> {
        match self.message {
            MidiMessage::NoteOn { vel, .. } | MidiMessage::NoteOff { vel, .. } => {
                Some(vel.as_int())
            }
            _ => None,
        }
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        if let MidiMessage::NoteOn { vel, .. } | MidiMessage::NoteOff { vel, .. } =
            &mut self.message
        {
            *vel = u7::from(velocity.min(127));
        }
    }
}

/// Event queue with capacity fixed at construction. Pushing never reallocates;
/// events beyond capacity are dropped.
#[derive(Debug, Clone)]
pub struct MidiEvents {
    events: Vec<MidiEvent>,
    capacity: usize,
}

impl MidiEvents {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn as_mut_slice(&mut self) -> &mut [MidiEvent] {
        &mut self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    /// Copies events whose time falls in `[start_frame, start_frame + nframes)`
    /// into `dest`. Returns how many were appended.
    pub fn append_window(&self, dest: &mut Self, start_frame: u32, nframes: u32) -> usize {
        let end_frame = start_frame.saturating_add(nframes);
        let mut appended = 0;
        for event in &self.events {
            if event.time >= start_frame && event.time < end_frame && dest.push(*event) {
                appended += 1;
            }
        }
        appended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity() {
        let mut events = MidiEvents::with_capacity(2);
        assert!(events.push(MidiEvent::note_on(0, 0, 60, 100)));
        assert!(events.push(MidiEvent::note_on(1, 0, 62, 100)));
        assert!(!events.push(MidiEvent::note_on(2, 0, 64, 100)));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn append_window_filters_by_time() {
        let mut src = MidiEvents::with_capacity(8);
        for time in [0, 10, 20, 30] {
            src.push(MidiEvent::note_on(time, 0, 60, 90));
        }
        let mut dest = MidiEvents::with_capacity(8);
        assert_eq!(src.append_window(&mut dest, 10, 20), 2);
        assert_eq!(dest.as_slice()[0].time, 10);
        assert_eq!(dest.as_slice()[1].time, 20);
    }

    #[test]
    fn zero_velocity_note_on_is_not_a_note_on() {
        assert!(!MidiEvent::note_on(0, 0, 60, 0).is_note_on());
        assert!(MidiEvent::note_on(0, 0, 60, 1).is_note_on());
        assert_eq!(MidiEvent::controller(0, 0, 7, 100).velocity(), None);
    }
}

use std::ops::Range;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{control::ControlValue, fader::FaderRole, midi::MidiEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortFlow {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Audio,
    Control,
    Event,
}

/// Back-reference to whatever owns the port. Never owning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortOwner {
    Fader { role: FaderRole, passthrough: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFlags {
    pub automatable: bool,
    pub amplitude: bool,
    pub stereo_balance: bool,
    pub toggle: bool,
    pub channel_fader: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortIdentifier {
    pub id: Uuid,
    pub label: String,
    pub flow: PortFlow,
    pub kind: PortKind,
    pub owner: PortOwner,
    pub flags: PortFlags,
}

impl PortIdentifier {
    #[must_use]
    pub fn new(label: impl Into<String>, flow: PortFlow, kind: PortKind, owner: PortOwner) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            flow,
            kind,
            owner,
            flags: PortFlags::default(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortConnection {
    pub dest: Uuid,
    pub multiplier: f32,
    pub enabled: bool,
}

/// Routing edges leaving a port. Edited on the control thread only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortConnections {
    edges: Vec<PortConnection>,
}

impl PortConnections {
    /// Returns false if the edge already existed.
    pub fn connect(&mut self, dest: Uuid) -> bool {
        if self.is_connected_to(dest) {
            return false;
        }
        self.edges.push(PortConnection {
            dest,
            multiplier: 1.0,
            enabled: true,
        });
        true
    }

    pub fn disconnect(&mut self, dest: Uuid) -> bool {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.dest != dest);
        self.edges.len() != before
    }

    pub fn disconnect_all(&mut self) -> usize {
        let count = self.edges.len();
        self.edges.clear();
        count
    }

    #[must_use]
    pub fn is_connected_to(&self, dest: Uuid) -> bool {
        self.edges.iter().any(|edge| edge.dest == dest)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[must_use]
    pub fn edges(&self) -> &[PortConnection] {
        &self.edges
    }
}

/// Fixed-capacity sample buffer. Sized once to the engine's max block size.
#[derive(Debug, Clone)]
pub struct AudioPort {
    pub id: PortIdentifier,
    pub connections: PortConnections,
    buf: Vec<f32>,
}

impl AudioPort {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        flow: PortFlow,
        owner: PortOwner,
        block_size: usize,
    ) -> Self {
        Self {
            id: PortIdentifier::new(label, flow, PortKind::Audio, owner),
            connections: PortConnections::default(),
            buf: vec![0.0; block_size],
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear_buffer(&mut self) {
        self.buf.fill(0.0);
    }
}

#[derive(Debug, Clone)]
pub struct StereoPorts {
    pub l: AudioPort,
    pub r: AudioPort,
}

impl StereoPorts {
    #[must_use]
    pub fn new(label: &str, flow: PortFlow, owner: PortOwner, block_size: usize) -> Self {
        Self {
            l: AudioPort::new(format!("{label} L"), flow, owner, block_size),
            r: AudioPort::new(format!("{label} R"), flow, owner, block_size),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.l.capacity().min(self.r.capacity())
    }

    /// Both channels restricted to `range`.
    pub fn split_mut(&mut self, range: Range<usize>) -> (&mut [f32], &mut [f32]) {
        (
            &mut self.l.buffer_mut()[range.clone()],
            &mut self.r.buffer_mut()[range],
        )
    }

    #[must_use]
    pub fn split(&self, range: Range<usize>) -> (&[f32], &[f32]) {
        (&self.l.buffer()[range.clone()], &self.r.buffer()[range])
    }

    pub fn clear_buffers(&mut self) {
        self.l.clear_buffer();
        self.r.clear_buffer();
    }

    pub fn connect(&mut self, dest: &Self) {
        self.l.connections.connect(dest.l.id.id);
        self.r.connections.connect(dest.r.id.id);
    }

    pub fn disconnect_from(&mut self, dest: &Self) {
        self.l.connections.disconnect(dest.l.id.id);
        self.r.connections.disconnect(dest.r.id.id);
    }

    pub fn disconnect_all(&mut self) -> usize {
        self.l.connections.disconnect_all() + self.r.connections.disconnect_all()
    }
}

#[derive(Debug, Clone)]
pub struct EventPort {
    pub id: PortIdentifier,
    pub connections: PortConnections,
    events: MidiEvents,
}

impl EventPort {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        flow: PortFlow,
        owner: PortOwner,
        capacity: usize,
    ) -> Self {
        Self {
            id: PortIdentifier::new(label, flow, PortKind::Event, owner),
            connections: PortConnections::default(),
            events: MidiEvents::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn events(&self) -> &MidiEvents {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut MidiEvents {
        &mut self.events
    }

    pub fn clear_buffer(&mut self) {
        self.events.clear();
    }
}

/// A [`ControlValue`] exposed as a port so it can be automated or modulated.
#[derive(Debug)]
pub struct ControlPort {
    pub id: PortIdentifier,
    value: ControlValue,
    connections: Mutex<PortConnections>,
}

impl ControlPort {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        owner: PortOwner,
        value: ControlValue,
        flags: PortFlags,
    ) -> Self {
        Self {
            id: PortIdentifier::new(label, PortFlow::Input, PortKind::Control, owner)
                .with_flags(flags),
            value,
            connections: Mutex::new(PortConnections::default()),
        }
    }

    #[must_use]
    pub fn value(&self) -> &ControlValue {
        &self.value
    }

    pub fn connect(&self, dest: Uuid) -> bool {
        self.connections.lock().connect(dest)
    }

    pub fn disconnect_all(&self) -> usize {
        self.connections.lock().disconnect_all()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

/// Window of a cycle's buffers, clipped to `capacity`.
#[must_use]
pub fn frame_range(start_frame: u32, nframes: u32, capacity: usize) -> Range<usize> {
    let start = (start_frame as usize).min(capacity);
    let end = start.saturating_add(nframes as usize).min(capacity);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> PortOwner {
        PortOwner::Fader {
            role: FaderRole::AudioChannel,
            passthrough: false,
        }
    }

    #[test]
    fn frame_range_never_exceeds_capacity() {
        assert_eq!(frame_range(0, 64, 128), 0..64);
        assert_eq!(frame_range(100, 64, 128), 100..128);
        assert_eq!(frame_range(200, 64, 128), 128..128);
    }

    #[test]
    fn clearing_keeps_capacity() {
        let mut port = AudioPort::new("in", PortFlow::Input, owner(), 32);
        port.buffer_mut().fill(0.5);
        port.clear_buffer();
        assert_eq!(port.capacity(), 32);
        assert!(port.buffer().iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn duplicate_connections_are_ignored() {
        let mut out = StereoPorts::new("out", PortFlow::Output, owner(), 8);
        let dest = StereoPorts::new("in", PortFlow::Input, owner(), 8);
        out.connect(&dest);
        out.connect(&dest);
        assert_eq!(out.l.connections.len(), 1);
        assert_eq!(out.disconnect_all(), 2);
    }
}

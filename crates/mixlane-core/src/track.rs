use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{audio_pool::PoolClipId, fader::FaderControls};

/// Stable position of a track in the external track list.
///
/// Resolved on demand; never hold a reference to the track across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackHandle(usize);

impl TrackHandle {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Audio,
    Midi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Midi,
    Instrument,
    AudioBus,
    MidiBus,
    AudioGroup,
    MidiGroup,
    Folder,
    Master,
}

impl TrackKind {
    #[must_use]
    pub const fn has_channel(self) -> bool {
        !matches!(self, Self::Folder)
    }

    #[must_use]
    pub const fn can_be_group_target(self) -> bool {
        matches!(
            self,
            Self::AudioBus | Self::MidiBus | Self::AudioGroup | Self::MidiGroup | Self::Master
        )
    }

    #[must_use]
    pub const fn out_signal(self) -> SignalKind {
        match self {
            Self::Midi | Self::MidiBus | Self::MidiGroup => SignalKind::Midi,
            _ => SignalKind::Audio,
        }
    }

    /// What the track's channel accepts from tracks routed into it.
    #[must_use]
    pub const fn in_signal(self) -> SignalKind {
        match self {
            Self::Midi | Self::Instrument | Self::MidiBus | Self::MidiGroup => SignalKind::Midi,
            _ => SignalKind::Audio,
        }
    }
}

/// Read-only view of the track hierarchy consumed during processing.
pub trait TrackGraph {
    fn track_count(&self) -> usize;
    fn kind(&self, track: TrackHandle) -> Option<TrackKind>;
    fn is_soloed(&self, track: TrackHandle) -> bool;
    fn is_listened(&self, track: TrackHandle) -> bool;
    fn is_frozen(&self, track: TrackHandle) -> bool;
    fn pool_clip(&self, track: TrackHandle) -> Option<PoolClipId>;
    fn bounce_enabled(&self, track: TrackHandle) -> bool;
    fn output_track(&self, track: TrackHandle) -> Option<TrackHandle>;
    fn children(&self, track: TrackHandle) -> &[TrackHandle];

    fn has_channel(&self, track: TrackHandle) -> bool {
        self.kind(track).is_some_and(TrackKind::has_channel)
    }

    fn can_be_group_target(&self, track: TrackHandle) -> bool {
        self.kind(track).is_some_and(TrackKind::can_be_group_target)
    }

    fn is_master(&self, track: TrackHandle) -> bool {
        self.kind(track) == Some(TrackKind::Master)
    }

    fn has_soloed(&self) -> bool {
        (0..self.track_count()).any(|index| self.is_soloed(TrackHandle::new(index)))
    }

    fn has_listened(&self) -> bool {
        (0..self.track_count()).any(|index| self.is_listened(TrackHandle::new(index)))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackGraphError {
    #[error("track not found: {0}")]
    TrackNotFound(TrackHandle),
    #[error("track {0} cannot route to itself")]
    SelfReference(TrackHandle),
    #[error("routing {from} -> {to} would create a cycle")]
    RoutingCycle { from: TrackHandle, to: TrackHandle },
    #[error("track {0} cannot have children")]
    NotGroupTarget(TrackHandle),
    #[error("track {child} already belongs to {parent}")]
    AlreadyHasParent {
        child: TrackHandle,
        parent: TrackHandle,
    },
    #[error("invalid move from {from} to {to}")]
    InvalidMove { from: usize, to: usize },
}

#[derive(Debug, Clone)]
pub struct TrackNode {
    pub name: String,
    pub kind: TrackKind,
    pub controls: Option<Arc<FaderControls>>,
    pub frozen: bool,
    pub pool_clip: Option<PoolClipId>,
    pub bounce: bool,
    pub output: Option<TrackHandle>,
    pub children: Vec<TrackHandle>,
}

impl TrackNode {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: TrackKind,
        controls: Option<Arc<FaderControls>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            controls,
            frozen: false,
            pool_clip: None,
            bounce: true,
            output: None,
            children: Vec::new(),
        }
    }
}

/// Minimal track list implementing [`TrackGraph`].
///
/// Routing and grouping edits are validated here so the resolver can assume
/// an acyclic graph.
#[derive(Debug, Clone, Default)]
pub struct TrackRegistry {
    tracks: Vec<TrackNode>,
}

impl TrackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn get(&self, track: TrackHandle) -> Option<&TrackNode> {
        self.tracks.get(track.index())
    }

    pub fn get_mut(&mut self, track: TrackHandle) -> Result<&mut TrackNode, TrackGraphError> {
        self.tracks
            .get_mut(track.index())
            .ok_or(TrackGraphError::TrackNotFound(track))
    }

    pub fn handles(&self) -> impl Iterator<Item = TrackHandle> + '_ {
        (0..self.tracks.len()).map(TrackHandle::new)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<TrackHandle> {
        self.tracks
            .iter()
            .position(|track| track.name.eq_ignore_ascii_case(name))
            .map(TrackHandle::new)
    }

    #[must_use]
    pub fn master(&self) -> Option<TrackHandle> {
        self.tracks
            .iter()
            .position(|track| track.kind == TrackKind::Master)
            .map(TrackHandle::new)
    }

    #[instrument(skip(self, node), fields(name = %node.name, kind = ?node.kind))]
    pub fn add(&mut self, node: TrackNode) -> TrackHandle {
        let handle = TrackHandle::new(self.tracks.len());
        if let Some(controls) = &node.controls {
            controls.set_track(Some(handle));
        }
        self.tracks.push(node);
        debug!(track = %handle, "track registered");
        handle
    }

    /// Removes a track and shifts every later position down by one.
    /// Edges pointing at the removed track are dropped.
    #[instrument(skip(self))]
    pub fn remove(&mut self, track: TrackHandle) -> Result<TrackNode, TrackGraphError> {
        if track.index() >= self.tracks.len() {
            return Err(TrackGraphError::TrackNotFound(track));
        }
        let removed = self.tracks.remove(track.index());
        self.remap_all(removal_remap(track));
        info!(name = %removed.name, "track removed from registry");
        Ok(removed)
    }

    /// Moves the track at `from` to position `to`, shifting the tracks between.
    #[instrument(skip(self))]
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), TrackGraphError> {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return Err(TrackGraphError::InvalidMove { from, to });
        }
        if from == to {
            return Ok(());
        }

        let node = self.tracks.remove(from);
        self.tracks.insert(to, node);
        self.remap_all(move_remap(from, to));
        Ok(())
    }

    fn remap_all(&mut self, remap: impl Fn(TrackHandle) -> Option<TrackHandle>) {
        for (index, node) in self.tracks.iter_mut().enumerate() {
            node.output = node.output.and_then(&remap);
            node.children = node.children.iter().copied().filter_map(&remap).collect();
            if let Some(controls) = &node.controls {
                controls.set_track(Some(TrackHandle::new(index)));
            }
        }
    }

    #[instrument(skip(self))]
    pub fn set_output(
        &mut self,
        track: TrackHandle,
        output: Option<TrackHandle>,
    ) -> Result<(), TrackGraphError> {
        self.get(track).ok_or(TrackGraphError::TrackNotFound(track))?;
        if let Some(dest) = output {
            self.get(dest).ok_or(TrackGraphError::TrackNotFound(dest))?;
            if dest == track {
                return Err(TrackGraphError::SelfReference(track));
            }
            let mut hop = Some(dest);
            while let Some(current) = hop {
                if current == track {
                    return Err(TrackGraphError::RoutingCycle {
                        from: track,
                        to: dest,
                    });
                }
                hop = self.tracks[current.index()].output;
            }
        }

        self.get_mut(track)?.output = output;
        debug!("track output updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn add_child(
        &mut self,
        parent: TrackHandle,
        child: TrackHandle,
    ) -> Result<(), TrackGraphError> {
        let parent_kind = self
            .get(parent)
            .ok_or(TrackGraphError::TrackNotFound(parent))?
            .kind;
        self.get(child).ok_or(TrackGraphError::TrackNotFound(child))?;
        if parent == child {
            return Err(TrackGraphError::SelfReference(parent));
        }
        if !parent_kind.can_be_group_target() && parent_kind != TrackKind::Folder {
            return Err(TrackGraphError::NotGroupTarget(parent));
        }
        if let Some(existing) = self.parent_of(child) {
            return Err(TrackGraphError::AlreadyHasParent {
                child,
                parent: existing,
            });
        }
        if self.is_descendant(child, parent) {
            return Err(TrackGraphError::RoutingCycle {
                from: parent,
                to: child,
            });
        }

        self.get_mut(parent)?.children.push(child);
        debug!("child attached");
        Ok(())
    }

    pub fn remove_child(
        &mut self,
        parent: TrackHandle,
        child: TrackHandle,
    ) -> Result<bool, TrackGraphError> {
        let node = self.get_mut(parent)?;
        let before = node.children.len();
        node.children.retain(|handle| *handle != child);
        Ok(node.children.len() != before)
    }

    #[must_use]
    pub fn parent_of(&self, child: TrackHandle) -> Option<TrackHandle> {
        self.tracks
            .iter()
            .position(|node| node.children.contains(&child))
            .map(TrackHandle::new)
    }

    /// Whether `candidate` sits anywhere under `root` in the children tree.
    fn is_descendant(&self, root: TrackHandle, candidate: TrackHandle) -> bool {
        let mut pending = vec![root];
        let mut visited = vec![false; self.tracks.len()];
        while let Some(current) = pending.pop() {
            if current == candidate {
                return true;
            }
            if std::mem::replace(&mut visited[current.index()], true) {
                continue;
            }
            pending.extend(self.tracks[current.index()].children.iter().copied());
        }
        false
    }

    /// Tracks ordered so that every track comes before the track it routes to.
    #[must_use]
    pub fn processing_order(&self) -> Vec<TrackHandle> {
        let mut depth = vec![0_usize; self.tracks.len()];
        for (index, slot) in depth.iter_mut().enumerate() {
            let mut hop = self.tracks[index].output;
            while let Some(current) = hop {
                *slot += 1;
                hop = self.tracks[current.index()].output;
            }
        }
        let mut order: Vec<TrackHandle> = self.handles().collect();
        order.sort_by(|a, b| depth[b.index()].cmp(&depth[a.index()]).then(a.cmp(b)));
        order
    }
}

impl TrackGraph for TrackRegistry {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn kind(&self, track: TrackHandle) -> Option<TrackKind> {
        self.get(track).map(|node| node.kind)
    }

    fn is_soloed(&self, track: TrackHandle) -> bool {
        self.get(track)
            .and_then(|node| node.controls.as_ref())
            .is_some_and(|controls| controls.soloed())
    }

    fn is_listened(&self, track: TrackHandle) -> bool {
        self.get(track)
            .and_then(|node| node.controls.as_ref())
            .is_some_and(|controls| controls.listened())
    }

    fn is_frozen(&self, track: TrackHandle) -> bool {
        self.get(track).is_some_and(|node| node.frozen)
    }

    fn pool_clip(&self, track: TrackHandle) -> Option<PoolClipId> {
        self.get(track).and_then(|node| node.pool_clip)
    }

    fn bounce_enabled(&self, track: TrackHandle) -> bool {
        self.get(track).is_some_and(|node| node.bounce)
    }

    fn output_track(&self, track: TrackHandle) -> Option<TrackHandle> {
        self.get(track).and_then(|node| node.output)
    }

    fn children(&self, track: TrackHandle) -> &[TrackHandle] {
        self.get(track).map_or(&[], |node| node.children.as_slice())
    }
}

/// Where each handle lands after `removed` is taken out. `None` for `removed`.
pub fn removal_remap(removed: TrackHandle) -> impl Fn(TrackHandle) -> Option<TrackHandle> {
    move |handle| match handle.index().cmp(&removed.index()) {
        std::cmp::Ordering::Less => Some(handle),
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(TrackHandle::new(handle.index() - 1)),
    }
}

/// Where each handle lands after the track at `from` moves to `to`.
pub fn move_remap(from: usize, to: usize) -> impl Fn(TrackHandle) -> Option<TrackHandle> {
    move |handle| {
        let index = handle.index();
        let moved = if index == from {
            to
        } else if from < to && index > from && index <= to {
            index - 1
        } else if to < from && index >= to && index < from {
            index + 1
        } else {
            index
        };
        Some(TrackHandle::new(moved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(kinds: &[TrackKind]) -> TrackRegistry {
        let mut registry = TrackRegistry::new();
        for (index, kind) in kinds.iter().enumerate() {
            registry.add(TrackNode::new(format!("t{index}"), *kind, None));
        }
        registry
    }

    #[test]
    fn output_cycles_are_rejected() {
        let mut tracks = registry(&[TrackKind::AudioBus, TrackKind::AudioBus, TrackKind::AudioBus]);
        let (a, b, c) = (TrackHandle::new(0), TrackHandle::new(1), TrackHandle::new(2));
        tracks.set_output(a, Some(b)).expect("a -> b");
        tracks.set_output(b, Some(c)).expect("b -> c");
        assert_eq!(
            tracks.set_output(c, Some(a)),
            Err(TrackGraphError::RoutingCycle { from: c, to: a })
        );
        assert_eq!(tracks.set_output(a, Some(a)), Err(TrackGraphError::SelfReference(a)));
    }

    #[test]
    fn child_cycles_are_rejected() {
        let mut tracks = registry(&[TrackKind::AudioGroup, TrackKind::AudioGroup]);
        let (g, h) = (TrackHandle::new(0), TrackHandle::new(1));
        tracks.add_child(g, h).expect("g owns h");
        assert!(matches!(
            tracks.add_child(h, g),
            Err(TrackGraphError::RoutingCycle { .. })
        ));
    }

    #[test]
    fn removal_shifts_later_references() {
        let mut tracks = registry(&[TrackKind::Audio, TrackKind::Audio, TrackKind::Master]);
        tracks
            .set_output(TrackHandle::new(1), Some(TrackHandle::new(2)))
            .expect("route to master");
        tracks.remove(TrackHandle::new(0)).expect("remove first");
        assert_eq!(tracks.output_track(TrackHandle::new(0)), Some(TrackHandle::new(1)));
    }

    #[test]
    fn processing_order_puts_sources_first() {
        let mut tracks = registry(&[TrackKind::Master, TrackKind::AudioBus, TrackKind::Audio]);
        let (master, bus, audio) = (TrackHandle::new(0), TrackHandle::new(1), TrackHandle::new(2));
        tracks.set_output(bus, Some(master)).expect("bus -> master");
        tracks.set_output(audio, Some(bus)).expect("audio -> bus");
        assert_eq!(tracks.processing_order(), vec![audio, bus, master]);
    }
}

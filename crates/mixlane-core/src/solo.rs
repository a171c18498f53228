use serde::Serialize;

use crate::{
    fader::FaderControls,
    track::{TrackGraph, TrackHandle},
};

/// Implied solo for a fader. Always false for non-channel, passthrough or
/// explicitly soloed faders, and for faders not attached to a track.
#[must_use]
pub fn fader_implied_soloed(controls: &FaderControls, graph: &dyn TrackGraph) -> bool {
    if !controls.role().is_channel() || controls.passthrough() || controls.soloed() {
        return false;
    }
    controls
        .track()
        .is_some_and(|track| implied_by_hierarchy(graph, track))
}

/// Same rule applied to a track's channel fader.
#[must_use]
pub fn track_implied_soloed(graph: &dyn TrackGraph, track: TrackHandle) -> bool {
    graph.has_channel(track) && !graph.is_soloed(track) && implied_by_hierarchy(graph, track)
}

fn implied_by_hierarchy(graph: &dyn TrackGraph, track: TrackHandle) -> bool {
    let mut current = track;
    for _ in 0..graph.track_count() {
        if !graph.has_channel(current) {
            break;
        }
        let Some(output) = graph.output_track(current) else {
            break;
        };
        if graph.is_soloed(output) {
            return true;
        }
        current = output;
    }

    graph.can_be_group_target(track)
        && graph
            .children(track)
            .iter()
            .any(|child| graph.is_soloed(*child) || track_implied_soloed(graph, *child))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SoloState {
    pub track: TrackHandle,
    pub soloed: bool,
    pub implied_soloed: bool,
    pub listened: bool,
}

/// Solo state of every track, in track order.
#[must_use]
pub fn solo_map(graph: &dyn TrackGraph) -> Vec<SoloState> {
    (0..graph.track_count())
        .map(TrackHandle::new)
        .map(|track| SoloState {
            track,
            soloed: graph.is_soloed(track),
            implied_soloed: track_implied_soloed(graph, track),
            listened: graph.is_listened(track),
        })
        .collect()
}

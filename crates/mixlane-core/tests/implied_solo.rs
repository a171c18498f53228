use std::sync::Arc;

use mixlane_core::{
    fader::{FaderControls, FaderRole},
    solo::{fader_implied_soloed, solo_map, track_implied_soloed},
    track::{TrackHandle, TrackKind, TrackNode, TrackRegistry},
};

fn channel() -> Arc<FaderControls> {
    Arc::new(FaderControls::new(FaderRole::AudioChannel, false, None))
}

fn add(
    tracks: &mut TrackRegistry,
    name: &str,
    kind: TrackKind,
) -> (TrackHandle, Arc<FaderControls>) {
    let controls = channel();
    let handle = tracks.add(TrackNode::new(name, kind, Some(Arc::clone(&controls))));
    (handle, controls)
}

#[test]
fn routing_into_a_soloed_bus_implies_solo() {
    let mut tracks = TrackRegistry::new();
    let (master, _) = add(&mut tracks, "Master", TrackKind::Master);
    let (bus, bus_controls) = add(&mut tracks, "Bus", TrackKind::AudioBus);
    let (source, source_controls) = add(&mut tracks, "Source", TrackKind::Audio);
    tracks.set_output(bus, Some(master)).expect("bus should route to master");
    tracks.set_output(source, Some(bus)).expect("source should route to bus");

    assert!(!fader_implied_soloed(&source_controls, &tracks));
    bus_controls.set_soloed(true, false).expect("bus solo should apply");
    assert!(fader_implied_soloed(&source_controls, &tracks));
    assert!(track_implied_soloed(&tracks, source));
    assert!(!track_implied_soloed(&tracks, master));
}

#[test]
fn group_with_soloed_descendant_is_implied() {
    let mut tracks = TrackRegistry::new();
    let (group, group_controls) = add(&mut tracks, "Group", TrackKind::AudioGroup);
    let (inner, _) = add(&mut tracks, "Inner", TrackKind::AudioGroup);
    let (leaf, leaf_controls) = add(&mut tracks, "Leaf", TrackKind::Audio);
    tracks.add_child(group, inner).expect("inner group should attach");
    tracks.add_child(inner, leaf).expect("leaf should attach");

    assert!(!fader_implied_soloed(&group_controls, &tracks));
    leaf_controls.set_soloed(true, false).expect("leaf solo should apply");
    assert!(track_implied_soloed(&tracks, inner));
    assert!(fader_implied_soloed(&group_controls, &tracks));
}

#[test]
fn excluded_faders_are_never_implied() {
    let mut tracks = TrackRegistry::new();
    let (bus, bus_controls) = add(&mut tracks, "Bus", TrackKind::AudioBus);
    let (source, source_controls) = add(&mut tracks, "Source", TrackKind::Audio);
    tracks.set_output(source, Some(bus)).expect("source should route to bus");
    bus_controls.set_soloed(true, false).expect("bus solo should apply");

    let prefader = FaderControls::new(FaderRole::AudioChannel, true, Some(source));
    assert!(!fader_implied_soloed(&prefader, &tracks));

    let monitor = FaderControls::new(FaderRole::Monitor, false, Some(source));
    assert!(!fader_implied_soloed(&monitor, &tracks));

    let detached = FaderControls::new(FaderRole::AudioChannel, false, None);
    assert!(!fader_implied_soloed(&detached, &tracks));

    source_controls.set_soloed(true, false).expect("source solo should apply");
    assert!(!fader_implied_soloed(&source_controls, &tracks));
}

#[test]
fn walk_stops_at_a_track_without_a_channel() {
    let mut tracks = TrackRegistry::new();
    let (target, target_controls) = add(&mut tracks, "Target", TrackKind::AudioBus);
    let folder = tracks.add(TrackNode::new("Folder", TrackKind::Folder, None));
    let (source, source_controls) = add(&mut tracks, "Source", TrackKind::Audio);
    tracks.set_output(folder, Some(target)).expect("folder edge should be accepted");
    tracks.set_output(source, Some(folder)).expect("source edge should be accepted");
    target_controls.set_soloed(true, false).expect("target solo should apply");

    assert!(!fader_implied_soloed(&source_controls, &tracks));
    assert!(!track_implied_soloed(&tracks, source));
}

#[test]
fn solo_map_reports_each_track_in_order() {
    let mut tracks = TrackRegistry::new();
    let (bus, bus_controls) = add(&mut tracks, "Bus", TrackKind::AudioBus);
    let (source, source_controls) = add(&mut tracks, "Source", TrackKind::Audio);
    tracks.set_output(source, Some(bus)).expect("source should route to bus");
    bus_controls.set_soloed(true, false).expect("bus solo should apply");
    source_controls.set_listened(true, false).expect("listen should apply");

    let map = solo_map(&tracks);
    assert_eq!(map.len(), 2);
    assert_eq!(map[0].track, bus);
    assert!(map[0].soloed && !map[0].implied_soloed);
    assert_eq!(map[1].track, source);
    assert!(!map[1].soloed && map[1].implied_soloed && map[1].listened);
}

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    fader::{FaderControls, MidiFaderMode},
    track::{TrackGraphError, TrackHandle, TrackRegistry},
};

const DEFAULT_UNDO_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTrackActionKind {
    Volume,
    Balance,
    MidiFaderMode,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Rejected(String),
    #[error("{kind:?} does not take a {expected} value")]
    ValueKind {
        kind: EditTrackActionKind,
        expected: &'static str,
    },
    #[error("track {0} has no fader")]
    NoFader(TrackHandle),
    #[error("invalid midi fader mode: {0}")]
    InvalidMidiMode(i32),
    #[error(transparent)]
    Track(#[from] TrackGraphError),
}

/// Undoable track edits as seen by the fader.
pub trait ActionSystem {
    /// `already_edited` means the caller applied `value_after` itself and the
    /// action only records it.
    fn perform_edit_single_float(
        &mut self,
        kind: EditTrackActionKind,
        track: TrackHandle,
        value_before: f32,
        value_after: f32,
        already_edited: bool,
    ) -> Result<(), ActionError>;

    fn perform_edit_single_int(
        &mut self,
        kind: EditTrackActionKind,
        track: TrackHandle,
        value_after: i32,
        already_edited: bool,
    ) -> Result<(), ActionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EditValue {
    Float(f32),
    Int(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackEdit {
    pub kind: EditTrackActionKind,
    pub track: TrackHandle,
    pub before: EditValue,
    pub after: EditValue,
}

/// Linear undo/redo stack of track edits. Performing a new edit clears redo.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    undo: Vec<TrackEdit>,
    redo: Vec<TrackEdit>,
    max_depth: usize,
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::with_depth(DEFAULT_UNDO_DEPTH)
    }
}

impl UndoHistory {
    #[must_use]
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn last(&self) -> Option<&TrackEdit> {
        self.undo.last()
    }

    /// Follows tracks through a structural edit. Edits whose track maps to
    /// `None` are dropped from both stacks.
    pub fn remap_tracks(&mut self, remap: impl Fn(TrackHandle) -> Option<TrackHandle>) {
        let follow = |edits: &mut Vec<TrackEdit>| {
            edits.retain_mut(|edit| match remap(edit.track) {
                Some(track) => {
                    edit.track = track;
                    true
                }
                None => false,
            });
        };
        follow(&mut self.undo);
        follow(&mut self.redo);
    }

    fn record(&mut self, edit: TrackEdit) {
        self.redo.clear();
        self.undo.push(edit);
        if self.undo.len() > self.max_depth {
            self.undo.remove(0);
        }
    }

    #[instrument(skip(self, tracks))]
    pub fn undo(&mut self, tracks: &TrackRegistry) -> Result<Option<TrackEdit>, ActionError> {
        let Some(edit) = self.undo.pop() else {
            return Ok(None);
        };
        if let Err(error) = apply(tracks, edit.kind, edit.track, edit.before) {
            self.undo.push(edit);
            return Err(error);
        }
        debug!(kind = ?edit.kind, track = %edit.track, "edit undone");
        self.redo.push(edit);
        Ok(Some(edit))
    }

    #[instrument(skip(self, tracks))]
    pub fn redo(&mut self, tracks: &TrackRegistry) -> Result<Option<TrackEdit>, ActionError> {
        let Some(edit) = self.redo.pop() else {
            return Ok(None);
        };
        if let Err(error) = apply(tracks, edit.kind, edit.track, edit.after) {
            self.redo.push(edit);
            return Err(error);
        }
        debug!(kind = ?edit.kind, track = %edit.track, "edit redone");
        self.undo.push(edit);
        Ok(Some(edit))
    }
}

/// [`ActionSystem`] over a registry and its history.
pub struct Actions<'a> {
    pub history: &'a mut UndoHistory,
    pub tracks: &'a TrackRegistry,
}

impl<'a> Actions<'a> {
    pub fn new(history: &'a mut UndoHistory, tracks: &'a TrackRegistry) -> Self {
        Self { history, tracks }
    }
}

impl ActionSystem for Actions<'_> {
    fn perform_edit_single_float(
        &mut self,
        kind: EditTrackActionKind,
        track: TrackHandle,
        value_before: f32,
        value_after: f32,
        already_edited: bool,
    ) -> Result<(), ActionError> {
        if kind == EditTrackActionKind::MidiFaderMode {
            return Err(ActionError::ValueKind {
                kind,
                expected: "float",
            });
        }
        controls_for(self.tracks, track)?;
        if !already_edited {
            apply(self.tracks, kind, track, EditValue::Float(value_after))?;
        }
        self.history.record(TrackEdit {
            kind,
            track,
            before: EditValue::Float(value_before),
            after: EditValue::Float(value_after),
        });
        Ok(())
    }

    fn perform_edit_single_int(
        &mut self,
        kind: EditTrackActionKind,
        track: TrackHandle,
        value_after: i32,
        already_edited: bool,
    ) -> Result<(), ActionError> {
        if kind != EditTrackActionKind::MidiFaderMode {
            return Err(ActionError::ValueKind {
                kind,
                expected: "int",
            });
        }
        let controls = controls_for(self.tracks, track)?;
        let before = controls.midi_mode().as_index();
        if !already_edited {
            apply(self.tracks, kind, track, EditValue::Int(value_after))?;
        }
        self.history.record(TrackEdit {
            kind,
            track,
            before: EditValue::Int(before),
            after: EditValue::Int(value_after),
        });
        Ok(())
    }
}

fn controls_for(tracks: &TrackRegistry, track: TrackHandle) -> Result<&FaderControls, ActionError> {
    let node = tracks.get(track).ok_or(TrackGraphError::TrackNotFound(track))?;
    node.controls.as_deref().ok_or(ActionError::NoFader(track))
}

fn apply(
    tracks: &TrackRegistry,
    kind: EditTrackActionKind,
    track: TrackHandle,
    value: EditValue,
) -> Result<(), ActionError> {
    let controls = controls_for(tracks, track)?;
    match (kind, value) {
        (EditTrackActionKind::Volume, EditValue::Float(amp)) => {
            controls.set_amp(amp);
        }
        (EditTrackActionKind::Balance, EditValue::Float(balance)) => {
            controls.set_balance(balance);
        }
        (EditTrackActionKind::MidiFaderMode, EditValue::Int(index)) => {
            let mode =
                MidiFaderMode::from_index(index).ok_or(ActionError::InvalidMidiMode(index))?;
            controls.set_midi_mode(mode, None, false).map_err(|error| {
                warn!(?error, "midi mode could not be applied");
                ActionError::Rejected(error.to_string())
            })?;
        }
        (kind, EditValue::Float(_)) => {
            return Err(ActionError::ValueKind {
                kind,
                expected: "float",
            });
        }
        (kind, EditValue::Int(_)) => {
            return Err(ActionError::ValueKind {
                kind,
                expected: "int",
            });
        }
    }
    Ok(())
}

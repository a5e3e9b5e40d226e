//! Selection state machine: at most one selected and at most one hovered
//! track, with mutual exclusion and highlight-rectangle lifecycle.
//!
//! The machine itself is pure: every transition returns the highlight
//! effects to apply to the [`LayerRegistry`](crate::LayerRegistry), which
//! keeps the transition table testable without a rendering surface.

use std::sync::Arc;

use log::debug;

use crate::TrackId;

/// Which highlight rectangle a transition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightKind {
    Selected,
    Hover,
}

/// Highlight mutation requested by a transition, to be applied to the
/// layer registry by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEffect {
    SetHighlight(TrackId, HighlightKind),
    ClearHighlight(TrackId, HighlightKind),
}

/// Published whenever the selected id changes, e.g. so a list view can
/// highlight the matching row.
pub type SelectionCallback = Arc<dyn Fn(Option<&TrackId>) + Send + Sync>;

/// Tracks the selected and hovered ids.
///
/// Invariant A: the hovered id is never equal to the selected id
/// (hovering the selected item is suppressed).
#[derive(Default)]
pub struct SelectionStateMachine {
    selected: Option<TrackId>,
    hovered: Option<TrackId>,
    on_selection_changed: Option<SelectionCallback>,
}

impl SelectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the selected-id publication callback.
    pub fn with_callback(mut self, callback: SelectionCallback) -> Self {
        self.on_selection_changed = Some(callback);
        self
    }

    pub fn selected(&self) -> Option<&TrackId> {
        self.selected.as_ref()
    }

    pub fn hovered(&self) -> Option<&TrackId> {
        self.hovered.as_ref()
    }

    /// Click transition: select, toggle off, or switch selection.
    pub fn click(&mut self, id: &TrackId) -> Vec<SelectionEffect> {
        let mut effects = Vec::new();

        if self.selected.as_ref() == Some(id) {
            // Clicking the selected track deselects it.
            effects.push(SelectionEffect::ClearHighlight(
                id.clone(),
                HighlightKind::Selected,
            ));
            self.selected = None;
            debug!("[Selection] deselected {}", id);
            self.publish();
            return effects;
        }

        if let Some(old) = self.selected.take() {
            effects.push(SelectionEffect::ClearHighlight(old, HighlightKind::Selected));
        }
        // Selecting removes any hover rectangle, including one on another
        // track.
        if let Some(hovered) = self.hovered.take() {
            effects.push(SelectionEffect::ClearHighlight(hovered, HighlightKind::Hover));
        }

        effects.push(SelectionEffect::SetHighlight(
            id.clone(),
            HighlightKind::Selected,
        ));
        self.selected = Some(id.clone());
        debug!("[Selection] selected {}", id);
        self.publish();
        effects
    }

    /// Hover transition. Hovering the selected track is suppressed.
    pub fn hover(&mut self, id: &TrackId) -> Vec<SelectionEffect> {
        if self.selected.as_ref() == Some(id) || self.hovered.as_ref() == Some(id) {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if let Some(old) = self.hovered.take() {
            effects.push(SelectionEffect::ClearHighlight(old, HighlightKind::Hover));
        }
        effects.push(SelectionEffect::SetHighlight(id.clone(), HighlightKind::Hover));
        self.hovered = Some(id.clone());
        effects
    }

    /// Pointer left the hovered track.
    pub fn leave(&mut self) -> Vec<SelectionEffect> {
        match self.hovered.take() {
            Some(id) => vec![SelectionEffect::ClearHighlight(id, HighlightKind::Hover)],
            None => Vec::new(),
        }
    }

    /// A track left the rendered set. Its rectangles were already disposed
    /// together with its LayerSet; only the slots need clearing here.
    pub fn on_removed(&mut self, id: &TrackId) {
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
            debug!("[Selection] selected track {} removed from result set", id);
            self.publish();
        }
        if self.hovered.as_ref() == Some(id) {
            self.hovered = None;
        }
    }

    /// Teardown: forget both slots without publishing.
    pub fn reset(&mut self) {
        self.selected = None;
        self.hovered = None;
    }

    fn publish(&self) {
        if let Some(callback) = &self.on_selection_changed {
            callback(self.selected.as_ref());
        }
    }
}

/// Apply transition effects to the layer registry.
pub fn apply_effects(registry: &mut crate::LayerRegistry, effects: &[SelectionEffect]) {
    for effect in effects {
        match effect {
            SelectionEffect::SetHighlight(id, kind) => registry.set_highlight(id, *kind),
            SelectionEffect::ClearHighlight(id, kind) => registry.clear_highlight(id, *kind),
        }
    }
}

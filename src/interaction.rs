//! Pointer gestures: dragging layers and panning the viewport.

use serde::{Deserialize, Serialize};

use crate::layer::{LayerId, LayerPatch, LayerStore};
use crate::overlap::{OverlapDetector, OverlapTransition};
use crate::transform::{screen_to_content, Point, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        ctrl: false,
        meta: false,
        shift: false,
        alt: false,
    };

    pub const CTRL: Self = Self {
        ctrl: true,
        ..Self::NONE
    };

    /// Ctrl or meta turns the wheel into zoom.
    pub fn precision(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Content-space anchor of an active layer drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragState {
    pub layer: LayerId,
    /// Pointer position when the drag began.
    pub start: Point,
    /// Layer position when the drag began.
    pub offset: Point,
}

impl DragState {
    pub fn position_for(&self, content: Point) -> Point {
        Point::new(
            self.offset.x + (content.x - self.start.x),
            self.offset.y + (content.y - self.start.y),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Panning {
        last: Point,
    },
    Dragging(DragState),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionOutcome {
    Idle,
    Panned,
    Moved {
        layer: LayerId,
        overlap: OverlapTransition,
    },
    Selected(LayerId),
    Cleared,
}

impl InteractionOutcome {
    pub fn changed_view(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct InteractionController {
    gesture: Gesture,
    pan_button: PointerButton,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new(PointerButton::Middle)
    }
}

impl InteractionController {
    pub fn new(pan_button: PointerButton) -> Self {
        Self {
            gesture: Gesture::Idle,
            pan_button,
        }
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn pan_button(&self) -> PointerButton {
        self.pan_button
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, Gesture::Dragging(_))
    }

    pub fn is_panning(&self) -> bool {
        matches!(self.gesture, Gesture::Panning { .. })
    }

    pub fn pointer_down(
        &mut self,
        screen: Point,
        button: PointerButton,
        transform: &Transform,
        store: &mut LayerStore,
    ) -> InteractionOutcome {
        if self.gesture != Gesture::Idle {
            return InteractionOutcome::Idle;
        }

        if button == self.pan_button {
            tracing::debug!(x = screen.x, y = screen.y, "pan started");
            self.gesture = Gesture::Panning { last: screen };
            return InteractionOutcome::Idle;
        }

        if button != PointerButton::Primary {
            return InteractionOutcome::Idle;
        }

        let content = screen_to_content(screen, transform);
        let Some((id, origin)) = store
            .hit_test(content)
            .map(|layer| (layer.id, Point::new(layer.x, layer.y)))
        else {
            store.clear_selection();
            return InteractionOutcome::Cleared;
        };

        store.select_layer(id);
        self.gesture = Gesture::Dragging(DragState {
            layer: id,
            start: content,
            offset: origin,
        });
        tracing::debug!(layer = %id, "drag started");
        InteractionOutcome::Selected(id)
    }

    pub fn pointer_move(
        &mut self,
        screen: Point,
        transform: &mut Transform,
        store: &mut LayerStore,
        overlap: &mut OverlapDetector,
    ) -> InteractionOutcome {
        match self.gesture {
            Gesture::Idle => InteractionOutcome::Idle,
            Gesture::Panning { last } => {
                transform.pan_by(screen.x - last.x, screen.y - last.y);
                self.gesture = Gesture::Panning { last: screen };
                InteractionOutcome::Panned
            }
            Gesture::Dragging(drag) => {
                let Some(current) = store.get(drag.layer) else {
                    tracing::debug!(layer = %drag.layer, "dragged layer vanished");
                    self.gesture = Gesture::Idle;
                    overlap.reset();
                    return InteractionOutcome::Idle;
                };

                let position = drag.position_for(screen_to_content(screen, transform));
                let mut candidate = current.clone();
                candidate.x = position.x;
                candidate.y = position.y;

                let update = overlap.evaluate(&candidate, store);
                let patch = update
                    .patch
                    .unwrap_or_default()
                    .merged(LayerPatch::position(position.x, position.y));
                store.update_layer(drag.layer, &patch);

                InteractionOutcome::Moved {
                    layer: drag.layer,
                    overlap: update.transition,
                }
            }
        }
    }

    /// End the current gesture. Overlap state is dropped without a leave
    /// notification, so a layer released over a target keeps whatever the
    /// enter handler applied.
    pub fn pointer_up(&mut self, overlap: &mut OverlapDetector) -> InteractionOutcome {
        let previous = std::mem::replace(&mut self.gesture, Gesture::Idle);
        match previous {
            Gesture::Idle => InteractionOutcome::Idle,
            Gesture::Panning { .. } => {
                tracing::debug!("pan ended");
                InteractionOutcome::Idle
            }
            Gesture::Dragging(drag) => {
                tracing::debug!(layer = %drag.layer, "drag ended");
                overlap.reset();
                InteractionOutcome::Idle
            }
        }
    }

    pub fn pointer_leave(&mut self, overlap: &mut OverlapDetector) -> InteractionOutcome {
        self.pointer_up(overlap)
    }

    /// Abandon any gesture, e.g. when the layers underneath were cleared.
    pub fn reset(&mut self) {
        self.gesture = Gesture::Idle;
    }
}

//! Drop-target detection while a layer is dragged.
//!
//! A dragged layer "overlaps" a target when its center lies inside the
//! target's bounds and it is small enough relative to the target to read as
//! an intent to drop into it. [`OverlapDetector`] turns the per-move predicate
//! into enter / drag-in / leave notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::layer::{Layer, LayerId, LayerPatch, LayerStore};

pub const DEFAULT_SCALED_AREA_RATIO: f64 = 0.7;
pub const DEFAULT_UNSCALED_AREA_BOUND: f64 = 1.5;

/// Size condition for a drop target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case", deny_unknown_fields)]
pub enum SizeRule {
    /// `area(top) / area(bottom) < ratio`, areas including `scale²`.
    ScaledAreaBelow { ratio: f64 },
    /// `area(top) / area(bottom) <= ratio`, raw pixel areas.
    UnscaledAreaAtMost { ratio: f64 },
}

impl Default for SizeRule {
    fn default() -> Self {
        Self::ScaledAreaBelow {
            ratio: DEFAULT_SCALED_AREA_RATIO,
        }
    }
}

impl SizeRule {
    pub fn ratio(&self) -> f64 {
        match self {
            Self::ScaledAreaBelow { ratio } | Self::UnscaledAreaAtMost { ratio } => *ratio,
        }
    }
}

/// Center of `top` inside the bounds of `bottom`, edges included.
pub fn is_geometric_overlap(top: &Layer, bottom: &Layer) -> bool {
    bottom.bounds().contains(top.center())
}

pub fn is_size_eligible(top: &Layer, bottom: &Layer, rule: SizeRule) -> bool {
    match rule {
        SizeRule::ScaledAreaBelow { ratio } => {
            let bottom_area = bottom.scaled_area();
            bottom_area > 0.0 && top.scaled_area() / bottom_area < ratio
        }
        SizeRule::UnscaledAreaAtMost { ratio } => {
            let bottom_area = bottom.unscaled_area();
            bottom_area > 0.0 && top.unscaled_area() / bottom_area <= ratio
        }
    }
}

pub fn is_overlap(top: &Layer, bottom: &Layer, rule: SizeRule) -> bool {
    is_geometric_overlap(top, bottom) && is_size_eligible(top, bottom, rule)
}

/// Topmost layer other than `dragging` that it overlaps.
pub fn find_overlap_target<'a>(
    dragging: &Layer,
    store: &'a LayerStore,
    rule: SizeRule,
) -> Option<&'a Layer> {
    store
        .iter()
        .rev()
        .filter(|candidate| candidate.id != dragging.id)
        .find(|candidate| is_overlap(dragging, candidate, rule))
}

/// Reactions to overlap transitions.
///
/// Each callback may return a patch for the dragged layer; it is committed
/// together with the move that triggered it.
pub trait OverlapHandlers {
    fn on_enter_overlap(&mut self, _dragging: &Layer, _target: &Layer) -> Option<LayerPatch> {
        None
    }

    fn on_drag_in_overlap(&mut self, _dragging: &Layer, _target: &Layer) -> Option<LayerPatch> {
        None
    }

    fn on_leave_overlap(&mut self, _dragging: &Layer) -> Option<LayerPatch> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOverlapHandlers;

impl OverlapHandlers for NoopOverlapHandlers {}

/// Previews a drop by multiplying the dragged layer into its target, and
/// goes back to source-over on leave.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplyWhileOverlapping;

impl OverlapHandlers for MultiplyWhileOverlapping {
    fn on_enter_overlap(&mut self, _dragging: &Layer, _target: &Layer) -> Option<LayerPatch> {
        Some(LayerPatch::blend_mode(BlendMode::Multiply))
    }

    fn on_leave_overlap(&mut self, _dragging: &Layer) -> Option<LayerPatch> {
        Some(LayerPatch::blend_mode(BlendMode::SourceOver))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapTransition {
    Unchanged,
    Entered { target: LayerId },
    DraggedIn { target: LayerId },
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlapUpdate {
    pub transition: OverlapTransition,
    pub patch: Option<LayerPatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlapState {
    None,
    Overlapping { target: LayerId },
}

pub struct OverlapDetector {
    state: OverlapState,
    rule: SizeRule,
    handlers: Box<dyn OverlapHandlers>,
}

impl fmt::Debug for OverlapDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlapDetector")
            .field("state", &self.state)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

impl Default for OverlapDetector {
    fn default() -> Self {
        Self::new(SizeRule::default())
    }
}

impl OverlapDetector {
    pub fn new(rule: SizeRule) -> Self {
        Self {
            state: OverlapState::None,
            rule,
            handlers: Box::new(NoopOverlapHandlers),
        }
    }

    pub fn set_handlers(&mut self, handlers: Box<dyn OverlapHandlers>) {
        self.handlers = handlers;
    }

    pub fn rule(&self) -> SizeRule {
        self.rule
    }

    pub fn set_rule(&mut self, rule: SizeRule) {
        self.rule = rule;
    }

    pub fn is_overlapping(&self) -> bool {
        matches!(self.state, OverlapState::Overlapping { .. })
    }

    pub fn current_target(&self) -> Option<LayerId> {
        match self.state {
            OverlapState::None => None,
            OverlapState::Overlapping { target } => Some(target),
        }
    }

    /// Evaluate one drag-move with `dragging` at its candidate position.
    pub fn evaluate(&mut self, dragging: &Layer, store: &LayerStore) -> OverlapUpdate {
        let target = find_overlap_target(dragging, store, self.rule);

        let (next, transition, patch) = match (self.state, target) {
            (OverlapState::None, None) => (OverlapState::None, OverlapTransition::Unchanged, None),
            (OverlapState::None, Some(target)) => {
                tracing::debug!(layer = %dragging.id, target = %target.id, "overlap entered");
                let patch = self.handlers.on_enter_overlap(dragging, target);
                (
                    OverlapState::Overlapping { target: target.id },
                    OverlapTransition::Entered { target: target.id },
                    patch,
                )
            }
            (OverlapState::Overlapping { .. }, Some(target)) => {
                let patch = self.handlers.on_drag_in_overlap(dragging, target);
                (
                    OverlapState::Overlapping { target: target.id },
                    OverlapTransition::DraggedIn { target: target.id },
                    patch,
                )
            }
            (OverlapState::Overlapping { .. }, None) => {
                tracing::debug!(layer = %dragging.id, "overlap left");
                let patch = self.handlers.on_leave_overlap(dragging);
                (OverlapState::None, OverlapTransition::Left, patch)
            }
        };

        self.state = next;
        OverlapUpdate { transition, patch }
    }

    /// Forget the current overlap without notifying `on_leave_overlap`.
    pub fn reset(&mut self) {
        self.state = OverlapState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ImageHandle;

    fn store_with(sizes: &[(u32, u32)]) -> (LayerStore, Vec<LayerId>) {
        let mut store = LayerStore::new();
        let ids = sizes
            .iter()
            .enumerate()
            .map(|(index, (w, h))| {
                store
                    .add_layer(ImageHandle::from_raw(index as u64 + 1), *w, *h, format!("l{index}"))
                    .id
            })
            .collect();
        (store, ids)
    }

    fn moved(store: &LayerStore, id: LayerId, x: f64, y: f64) -> Layer {
        let mut layer = store.get(id).cloned().expect("layer exists");
        layer.x = x;
        layer.y = y;
        layer
    }

    #[test]
    fn small_layer_centered_on_large_layer_overlaps() {
        let (store, ids) = store_with(&[(100, 100), (200, 200)]);
        let a = moved(&store, ids[0], 50.0, 50.0);
        let b = store.get(ids[1]).expect("b");
        assert!(is_geometric_overlap(&a, b));
        assert!(is_size_eligible(&a, b, SizeRule::default()));
        assert!(is_overlap(&a, b, SizeRule::default()));
    }

    #[test]
    fn geometric_overlap_is_inclusive_on_edges() {
        let (store, ids) = store_with(&[(10, 10), (100, 100)]);
        let on_edge = moved(&store, ids[0], 95.0, -5.0);
        assert!(is_geometric_overlap(&on_edge, store.get(ids[1]).expect("b")));
        let outside = moved(&store, ids[0], 95.1, -5.0);
        assert!(!is_geometric_overlap(&outside, store.get(ids[1]).expect("b")));
    }

    #[test]
    fn scaled_rule_is_strict_and_counts_scale() {
        let (mut store, ids) = store_with(&[(70, 100), (100, 100)]);
        let rule = SizeRule::ScaledAreaBelow { ratio: 0.7 };
        let a = store.get(ids[0]).cloned().expect("a");
        let b = store.get(ids[1]).cloned().expect("b");
        assert!(!is_size_eligible(&a, &b, rule), "0.7 is not below 0.7");

        store.update_layer(
            ids[0],
            &LayerPatch {
                scale: Some(0.5),
                ..LayerPatch::default()
            },
        );
        let shrunk = store.get(ids[0]).cloned().expect("a");
        assert!(is_size_eligible(&shrunk, &b, rule));
    }

    #[test]
    fn unscaled_rule_ignores_scale_and_accepts_bound() {
        let (mut store, ids) = store_with(&[(150, 100), (100, 100)]);
        let rule = SizeRule::UnscaledAreaAtMost { ratio: 1.5 };
        store.update_layer(
            ids[0],
            &LayerPatch {
                scale: Some(4.0),
                ..LayerPatch::default()
            },
        );
        let a = store.get(ids[0]).cloned().expect("a");
        let b = store.get(ids[1]).cloned().expect("b");
        assert!(is_size_eligible(&a, &b, rule));
        assert!(!is_size_eligible(&a, &b, SizeRule::default()));
    }

    #[test]
    fn topmost_candidate_wins() {
        let (store, ids) = store_with(&[(10, 10), (200, 200), (200, 200)]);
        let dragging = moved(&store, ids[0], 50.0, 50.0);
        let target = find_overlap_target(&dragging, &store, SizeRule::default()).expect("target");
        assert_eq!(target.id, ids[2]);
    }

    #[test]
    fn dragged_layer_never_targets_itself() {
        let (store, ids) = store_with(&[(10, 10)]);
        let dragging = moved(&store, ids[0], 0.0, 0.0);
        assert!(find_overlap_target(&dragging, &store, SizeRule::default()).is_none());
    }

    #[test]
    fn detector_walks_enter_drag_in_leave() {
        let (store, ids) = store_with(&[(100, 100), (200, 200)]);
        let mut detector = OverlapDetector::default();

        let update = detector.evaluate(&moved(&store, ids[0], 500.0, 500.0), &store);
        assert_eq!(update.transition, OverlapTransition::Unchanged);

        let update = detector.evaluate(&moved(&store, ids[0], 50.0, 50.0), &store);
        assert_eq!(update.transition, OverlapTransition::Entered { target: ids[1] });
        assert!(detector.is_overlapping());

        let update = detector.evaluate(&moved(&store, ids[0], 60.0, 40.0), &store);
        assert_eq!(update.transition, OverlapTransition::DraggedIn { target: ids[1] });

        let update = detector.evaluate(&moved(&store, ids[0], 500.0, 500.0), &store);
        assert_eq!(update.transition, OverlapTransition::Left);
        assert!(!detector.is_overlapping());
    }

    #[test]
    fn multiply_handler_patches_blend_mode() {
        let (store, ids) = store_with(&[(100, 100), (200, 200)]);
        let mut detector = OverlapDetector::default();
        detector.set_handlers(Box::new(MultiplyWhileOverlapping));

        let enter = detector.evaluate(&moved(&store, ids[0], 50.0, 50.0), &store);
        assert_eq!(enter.patch, Some(LayerPatch::blend_mode(BlendMode::Multiply)));
        let leave = detector.evaluate(&moved(&store, ids[0], 900.0, 0.0), &store);
        assert_eq!(leave.patch, Some(LayerPatch::blend_mode(BlendMode::SourceOver)));
    }

    #[test]
    fn reset_does_not_emit_leave() {
        let (store, ids) = store_with(&[(100, 100), (200, 200)]);
        let mut detector = OverlapDetector::default();
        detector.evaluate(&moved(&store, ids[0], 50.0, 50.0), &store);
        detector.reset();
        assert!(!detector.is_overlapping());

        let update = detector.evaluate(&moved(&store, ids[0], 50.0, 50.0), &store);
        assert_eq!(update.transition, OverlapTransition::Entered { target: ids[1] });
    }

    #[test]
    fn size_rule_reads_from_yaml() {
        let rule: SizeRule =
            serde_yaml::from_str("rule: unscaled_area_at_most\nratio: 1.5\n").expect("rule parses");
        assert_eq!(rule, SizeRule::UnscaledAreaAtMost { ratio: 1.5 });
        assert_eq!(rule.ratio(), 1.5);
    }
}

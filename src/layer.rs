use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::engine::ImageHandle;
use crate::transform::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(u64);

impl LayerId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// Axis-aligned rectangle in content space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Bounds {
    /// Inclusive on every edge.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left
            && point.x <= self.right
            && point.y >= self.top
            && point.y <= self.bottom
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// One positioned, scaled, blended bitmap.
///
/// `image` is a reference into the rendering engine; the layer does not own
/// the pixels. Geometry is axis-aligned: `rotation` only affects drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub image: ImageHandle,
    pub width: u32,
    pub height: u32,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
    pub opacity: f64,
    pub blend_mode: BlendMode,
    /// Byte-store key of the bytes this layer was decoded from.
    pub source_key: Option<String>,
}

impl Layer {
    pub fn scaled_width(&self) -> f64 {
        f64::from(self.width) * self.scale
    }

    pub fn scaled_height(&self) -> f64 {
        f64::from(self.height) * self.scale
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.x,
            top: self.y,
            right: self.x + self.scaled_width(),
            bottom: self.y + self.scaled_height(),
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x + self.scaled_width() / 2.0,
            self.y + self.scaled_height() / 2.0,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        self.bounds().contains(point)
    }

    /// `width * height * scale²`.
    pub fn scaled_area(&self) -> f64 {
        self.scaled_width() * self.scaled_height()
    }

    pub fn unscaled_area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// Partial attribute update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
    pub opacity: Option<f64>,
    pub blend_mode: Option<BlendMode>,
}

impl LayerPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn blend_mode(mode: BlendMode) -> Self {
        Self {
            blend_mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merged(self, other: LayerPatch) -> Self {
        Self {
            name: other.name.or(self.name),
            x: other.x.or(self.x),
            y: other.y.or(self.y),
            scale: other.scale.or(self.scale),
            rotation: other.rotation.or(self.rotation),
            opacity: other.opacity.or(self.opacity),
            blend_mode: other.blend_mode.or(self.blend_mode),
        }
    }

    /// Build the updated record. Non-finite numbers and non-positive scales
    /// are ignored; opacity is clamped into `[0, 1]`.
    pub fn apply(&self, layer: &Layer) -> Layer {
        let finite = |value: Option<f64>| value.filter(|value| value.is_finite());
        let mut next = layer.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(x) = finite(self.x) {
            next.x = x;
        }
        if let Some(y) = finite(self.y) {
            next.y = y;
        }
        match finite(self.scale) {
            Some(scale) if scale > 0.0 => next.scale = scale,
            Some(scale) => {
                tracing::warn!(layer = %layer.id, scale, "ignoring non-positive layer scale");
            }
            None => {}
        }
        if let Some(rotation) = finite(self.rotation) {
            next.rotation = rotation;
        }
        if let Some(opacity) = finite(self.opacity) {
            next.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(mode) = self.blend_mode {
            next.blend_mode = mode;
        }
        next
    }
}

/// Ordered layer collection, bottom first, plus the single selection.
#[derive(Debug, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
    selected: Option<LayerId>,
    next_id: u64,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> LayerId {
        self.next_id += 1;
        LayerId(self.next_id)
    }

    /// Append a layer with default attributes on top and select it.
    pub fn add_layer(
        &mut self,
        image: ImageHandle,
        width: u32,
        height: u32,
        name: impl Into<String>,
    ) -> &Layer {
        let id = self.allocate_id();
        self.layers.push(Layer {
            id,
            image,
            width,
            height,
            name: name.into(),
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            rotation: 0.0,
            opacity: 1.0,
            blend_mode: BlendMode::SourceOver,
            source_key: None,
        });
        self.selected = Some(id);
        tracing::debug!(layer = %id, "layer added");
        &self.layers[self.layers.len() - 1]
    }

    /// Append a previously persisted layer on top, keeping its id when free.
    /// Does not change the selection.
    pub fn restore_layer(&mut self, mut layer: Layer) -> LayerId {
        if self.index_of(layer.id).is_some() || layer.id.0 == 0 {
            let fresh = self.allocate_id();
            tracing::warn!(requested = %layer.id, assigned = %fresh, "layer id already in use");
            layer.id = fresh;
        } else {
            self.next_id = self.next_id.max(layer.id.0);
        }
        let id = layer.id;
        self.layers.push(layer);
        id
    }

    /// Remove a layer and hand it back so the caller can release its image.
    pub fn delete_layer(&mut self, id: LayerId) -> Option<Layer> {
        let index = self.index_of(id)?;
        let removed = self.layers.remove(index);
        if self.selected == Some(id) {
            self.selected = None;
        }
        tracing::debug!(layer = %id, "layer deleted");
        Some(removed)
    }

    /// Replace the layer record with `patch` applied. Unknown ids are a no-op.
    pub fn update_layer(&mut self, id: LayerId, patch: &LayerPatch) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let next = patch.apply(&self.layers[index]);
        self.layers[index] = next;
        true
    }

    /// Record the byte-store key the layer's pixels were decoded from.
    pub fn set_source_key(&mut self, id: LayerId, key: impl Into<String>) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.layers[index].source_key = Some(key.into());
        true
    }

    pub fn move_by(&mut self, id: LayerId, dx: f64, dy: f64) -> bool {
        let Some(layer) = self.get(id) else {
            return false;
        };
        let patch = LayerPatch::position(layer.x + dx, layer.y + dy);
        self.update_layer(id, &patch)
    }

    pub fn select_layer(&mut self, id: LayerId) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        self.selected = Some(id);
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_id(&self) -> Option<LayerId> {
        self.selected
    }

    pub fn selected(&self) -> Option<&Layer> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn bring_to_front(&mut self, id: LayerId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let layer = self.layers.remove(index);
        self.layers.push(layer);
        true
    }

    pub fn send_to_back(&mut self, id: LayerId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let layer = self.layers.remove(index);
        self.layers.insert(0, layer);
        true
    }

    /// Topmost layer whose bounds contain `point` (content space).
    pub fn hit_test(&self, point: Point) -> Option<&Layer> {
        self.layers.iter().rev().find(|layer| layer.contains(point))
    }

    /// Remove every layer and the selection; returns the removed layers.
    pub fn clear_all(&mut self) -> Vec<Layer> {
        self.selected = None;
        std::mem::take(&mut self.layers)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    /// Layers bottom to top.
    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

//! One canvas: engine, viewport, layers and the gesture in progress.
//!
//! Every mutating operation redraws synchronously before it returns, so the
//! surface always reflects the store. A redraw failure is logged, never
//! propagated, because the mutation itself already happened.

use crate::config::CompositorConfig;
use crate::displacement::{composite_displacement, DisplacementJob, DisplacementParams};
use crate::engine::{with_scope, ImageHandle, RenderEngine, SurfaceHandle};
use crate::error::CompositorError;
use crate::interaction::{
    Gesture, InteractionController, InteractionOutcome, Modifiers, PointerButton,
};
use crate::layer::{Layer, LayerId, LayerPatch, LayerStore};
use crate::overlap::{OverlapDetector, OverlapHandlers};
use crate::project::ProjectDocument;
use crate::store::{content_key, validate_key, ByteStore};
use crate::transform::{Point, Transform};

/// An in-progress displacement: the map is previewed as a layer over the
/// source until the run is committed or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplacementState {
    pub source: LayerId,
    pub map: ImageHandle,
    pub mask: Option<ImageHandle>,
    pub preview: LayerId,
}

#[derive(Debug)]
pub struct ImportReport {
    pub layer: LayerId,
    pub key: String,
    /// Set when the bytes could not be stored; the layer is kept regardless.
    pub persist_error: Option<CompositorError>,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Names of layers whose bytes were missing or undecodable.
    pub skipped: Vec<String>,
}

pub struct Session<E: RenderEngine> {
    engine: E,
    surface: SurfaceHandle,
    width: u32,
    height: u32,
    transform: Transform,
    store: LayerStore,
    controller: InteractionController,
    overlap: OverlapDetector,
    displacement: Option<DisplacementState>,
    config: CompositorConfig,
    frames: u64,
}

impl<E: RenderEngine> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("surface", &self.surface)
            .field("size", &(self.width, self.height))
            .field("transform", &self.transform)
            .field("layers", &self.store.len())
            .field("gesture", &self.controller.gesture())
            .field("overlap", &self.overlap)
            .field("displacement", &self.displacement)
            .finish()
    }
}

impl<E: RenderEngine> Session<E> {
    pub fn new(
        mut engine: E,
        width: u32,
        height: u32,
        config: CompositorConfig,
    ) -> Result<Self, CompositorError> {
        config
            .validate()
            .map_err(|error| CompositorError::init(format!("invalid config: {error:#}")))?;
        let surface = engine.create_surface(width, height).map_err(|error| {
            CompositorError::init(format!(
                "failed to create {width}x{height} canvas surface: {}",
                error.message()
            ))
        })?;

        let mut session = Self {
            engine,
            surface,
            width,
            height,
            transform: Transform::IDENTITY,
            store: LayerStore::new(),
            controller: InteractionController::new(config.input.pan_button),
            overlap: OverlapDetector::new(config.overlap.size_rule),
            displacement: None,
            config,
            frames: 0,
        };
        session.redraw();
        Ok(session)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn layers(&self) -> &LayerStore {
        &self.store
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.store.get(id)
    }

    pub fn selected(&self) -> Option<&Layer> {
        self.store.selected()
    }

    pub fn gesture(&self) -> Gesture {
        self.controller.gesture()
    }

    pub fn is_overlapping(&self) -> bool {
        self.overlap.is_overlapping()
    }

    pub fn displacement(&self) -> Option<&DisplacementState> {
        self.displacement.as_ref()
    }

    /// Completed render passes since the session was created.
    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn set_overlap_handlers(&mut self, handlers: Box<dyn OverlapHandlers>) {
        self.overlap.set_handlers(handlers);
    }

    // Layers

    /// Decode `bytes` and add the image as a new top layer.
    pub fn add_image(&mut self, bytes: &[u8], name: &str) -> Result<LayerId, CompositorError> {
        let id = self.insert_decoded(bytes, name)?;
        self.redraw();
        Ok(id)
    }

    /// Like [`Session::add_image`], and also stores the bytes under their
    /// content key so the layer survives a project save.
    pub fn import_image<S>(
        &mut self,
        bytes: &[u8],
        name: &str,
        store: &mut S,
    ) -> Result<ImportReport, CompositorError>
    where
        S: ByteStore + ?Sized,
    {
        let layer = self.insert_decoded(bytes, name)?;
        let key = content_key(bytes);
        let persist_error = match store.put(&key, bytes) {
            Ok(()) => {
                self.store.set_source_key(layer, key.clone());
                tracing::info!(layer = %layer, key = %key, "image bytes stored");
                None
            }
            Err(error) => {
                tracing::warn!(layer = %layer, key = %key, %error, "failed to store image bytes");
                Some(error)
            }
        };
        self.redraw();
        Ok(ImportReport {
            layer,
            key,
            persist_error,
        })
    }

    fn insert_decoded(&mut self, bytes: &[u8], name: &str) -> Result<LayerId, CompositorError> {
        let image = self.decode(bytes, name)?;
        let (width, height) = self.image_size(image)?;
        let id = self.store.add_layer(image, width, height, name).id;
        tracing::info!(layer = %id, name, width, height, "layer added");
        Ok(id)
    }

    fn decode(&mut self, bytes: &[u8], name: &str) -> Result<ImageHandle, CompositorError> {
        self.engine.decode(bytes).map_err(|error| {
            tracing::warn!(name, %error, "image failed to decode");
            match error {
                CompositorError::Decode { message } => {
                    CompositorError::decode(format!("'{name}': {message}"))
                }
                other => other,
            }
        })
    }

    fn image_size(&mut self, image: ImageHandle) -> Result<(u32, u32), CompositorError> {
        match self.engine.image_size(image) {
            Some(size) => Ok(size),
            None => {
                self.engine.release(image.into());
                Err(CompositorError::engine("decoded image has no size"))
            }
        }
    }

    /// Remove a layer and release its image. Deleting the source or preview
    /// of an active displacement cancels it first.
    pub fn delete_layer(&mut self, id: LayerId) -> bool {
        if let Some(state) = self.displacement {
            if id == state.preview || id == state.source {
                self.cancel_displacement_inner();
                if id == state.preview {
                    self.redraw();
                    return true;
                }
            }
        }

        let Some(layer) = self.store.delete_layer(id) else {
            return false;
        };
        self.engine.release(layer.image.into());
        tracing::info!(layer = %id, name = %layer.name, "layer deleted");
        self.redraw();
        true
    }

    pub fn update_layer(&mut self, id: LayerId, patch: &LayerPatch) -> bool {
        let updated = self.store.update_layer(id, patch);
        if updated {
            self.redraw();
        }
        updated
    }

    pub fn select_layer(&mut self, id: LayerId) -> bool {
        let selected = self.store.select_layer(id);
        if selected {
            self.redraw();
        }
        selected
    }

    pub fn clear_selection(&mut self) {
        self.store.clear_selection();
        self.redraw();
    }

    pub fn bring_to_front(&mut self, id: LayerId) -> bool {
        let moved = self.store.bring_to_front(id);
        if moved {
            self.redraw();
        }
        moved
    }

    pub fn send_to_back(&mut self, id: LayerId) -> bool {
        let moved = self.store.send_to_back(id);
        if moved {
            self.redraw();
        }
        moved
    }

    /// Drop every layer, the selection, overlap state, any gesture and any
    /// in-progress displacement.
    pub fn clear_all(&mut self) {
        self.clear_all_inner();
        self.redraw();
    }

    fn clear_all_inner(&mut self) {
        self.cancel_displacement_inner();
        let removed = self.store.clear_all();
        for layer in &removed {
            self.engine.release(layer.image.into());
        }
        self.overlap.reset();
        self.controller.reset();
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "cleared all layers");
        }
    }

    // Pointer input

    pub fn pointer_down(&mut self, screen: Point, button: PointerButton) -> InteractionOutcome {
        let outcome = self
            .controller
            .pointer_down(screen, button, &self.transform, &mut self.store);
        self.redraw_if(outcome)
    }

    pub fn pointer_move(&mut self, screen: Point) -> InteractionOutcome {
        let outcome = self.controller.pointer_move(
            screen,
            &mut self.transform,
            &mut self.store,
            &mut self.overlap,
        );
        self.redraw_if(outcome)
    }

    pub fn pointer_up(&mut self) -> InteractionOutcome {
        let outcome = self.controller.pointer_up(&mut self.overlap);
        self.redraw_if(outcome)
    }

    pub fn pointer_leave(&mut self) -> InteractionOutcome {
        let outcome = self.controller.pointer_leave(&mut self.overlap);
        self.redraw_if(outcome)
    }

    /// Wheel at `screen`: zoom about the cursor with ctrl/meta, otherwise
    /// scroll vertically.
    pub fn wheel(&mut self, screen: Point, delta_y: f64, modifiers: Modifiers) {
        if !delta_y.is_finite() {
            return;
        }
        let limits = self.config.zoom_limits();
        self.transform
            .zoom_about(screen, delta_y, modifiers.precision(), &limits);
        self.redraw();
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform.clamped(&self.config.zoom_limits());
        self.redraw();
    }

    fn redraw_if(&mut self, outcome: InteractionOutcome) -> InteractionOutcome {
        if outcome.changed_view() {
            self.redraw();
        }
        outcome
    }

    // Displacement

    /// Start a displacement of `source` using `map_bytes` as the vector
    /// field. The map is shown as a preview layer over the source. Returns
    /// the preview id, or `None` when `source` does not exist.
    pub fn begin_displacement(
        &mut self,
        source: LayerId,
        map_bytes: &[u8],
    ) -> Result<Option<LayerId>, CompositorError> {
        let Some(source_layer) = self.store.get(source) else {
            return Ok(None);
        };
        let name = format!("{} · displacement", source_layer.name);
        let placement = LayerPatch {
            x: Some(source_layer.x),
            y: Some(source_layer.y),
            ..LayerPatch::default()
        };

        let map = self.decode(map_bytes, &name)?;
        let (width, height) = self.image_size(map)?;
        if self.displacement.is_some() {
            self.cancel_displacement_inner();
            if self.store.get(source).is_none() {
                self.engine.release(map.into());
                self.redraw();
                return Ok(None);
            }
        }

        let preview = self.store.add_layer(map, width, height, name).id;
        let scale = self
            .store
            .get(source)
            .map(|layer| layer.scaled_width() / f64::from(width.max(1)));
        let placement = LayerPatch { scale, ..placement };
        self.store.update_layer(preview, &placement);

        self.displacement = Some(DisplacementState {
            source,
            map,
            mask: None,
            preview,
        });
        tracing::info!(source = %source, preview = %preview, "displacement started");
        self.redraw();
        Ok(Some(preview))
    }

    /// Attach (or replace) the mask of the active displacement. Returns
    /// `false` without decoding when no displacement is active.
    pub fn set_displacement_mask(&mut self, mask_bytes: &[u8]) -> Result<bool, CompositorError> {
        if self.displacement.is_none() {
            return Ok(false);
        }
        let mask = self.decode(mask_bytes, "displacement mask")?;
        let Some(state) = self.displacement.as_mut() else {
            self.engine.release(mask.into());
            return Ok(false);
        };
        if let Some(previous) = state.mask.replace(mask) {
            self.engine.release(previous.into());
        }
        Ok(true)
    }

    /// Run the displacement and append the result above the layers.
    ///
    /// The preview, map and mask are released whatever the outcome. On
    /// failure the layers are exactly as before `begin_displacement`.
    pub fn commit_displacement(
        &mut self,
        params: &DisplacementParams,
    ) -> Result<Option<LayerId>, CompositorError> {
        let Some(state) = self.displacement else {
            return Ok(None);
        };
        let Some(source) = self.store.get(state.source).cloned() else {
            self.cancel_displacement_inner();
            self.redraw();
            return Ok(None);
        };

        let job = DisplacementJob {
            source: source.image,
            map: state.map,
            mask: state.mask,
        };
        let result = composite_displacement(&mut self.engine, &job, params);
        self.cancel_displacement_inner();

        let outcome = match result {
            Ok(image) => {
                let (width, height) = match self.engine.image_size(image) {
                    Some(size) => size,
                    None => (source.width, source.height),
                };
                let name = format!("{} (displaced)", source.name);
                let id = self.store.add_layer(image, width, height, name).id;
                self.store.update_layer(
                    id,
                    &LayerPatch {
                        x: Some(source.x),
                        y: Some(source.y),
                        scale: Some(source.scale),
                        ..LayerPatch::default()
                    },
                );
                tracing::info!(source = %source.id, layer = %id, "displacement committed");
                Ok(Some(id))
            }
            Err(error) => {
                tracing::warn!(source = %source.id, %error, "displacement failed");
                Err(error)
            }
        };
        self.redraw();
        outcome
    }

    /// Abandon the active displacement. Returns `false` if none was active.
    pub fn cancel_displacement(&mut self) -> bool {
        let cancelled = self.cancel_displacement_inner();
        if cancelled {
            self.redraw();
        }
        cancelled
    }

    fn cancel_displacement_inner(&mut self) -> bool {
        let Some(state) = self.displacement.take() else {
            return false;
        };
        // The preview layer borrows the map handle; the map is released once below.
        self.store.delete_layer(state.preview);
        self.engine.release(state.map.into());
        if let Some(mask) = state.mask {
            self.engine.release(mask.into());
        }
        tracing::debug!(source = %state.source, "displacement state cleared");
        true
    }

    // Rendering

    /// Draw every layer, bottom to top, through the viewport transform.
    pub fn render(&mut self) -> Result<(), CompositorError> {
        let surface = self.surface;
        let background = self.config.canvas.background;
        let transform = self.transform;
        let store = &self.store;

        with_scope(&mut self.engine, |engine, scope| {
            let paint = scope.track(engine.create_paint()?);

            engine.clear(surface, background);
            engine.save(surface);
            engine.translate(surface, transform.x as f32, transform.y as f32);
            engine.scale(surface, transform.scale as f32, transform.scale as f32);
            for layer in store.iter() {
                engine.set_alpha(paint, layer.opacity as f32);
                engine.set_blend_mode(paint, layer.blend_mode);
                engine.save(surface);
                engine.translate(surface, layer.x as f32, layer.y as f32);
                if layer.rotation != 0.0 {
                    engine.rotate(surface, layer.rotation as f32);
                }
                engine.scale(surface, layer.scale as f32, layer.scale as f32);
                engine.draw_image(surface, layer.image, 0.0, 0.0, Some(paint));
                engine.restore(surface);
            }
            engine.restore(surface);
            engine.flush(surface);
            Ok::<(), CompositorError>(())
        })?;

        self.frames += 1;
        Ok(())
    }

    fn redraw(&mut self) {
        if let Err(error) = self.render() {
            tracing::warn!(%error, "redraw failed");
        }
    }

    /// Encode the current canvas as PNG.
    pub fn snapshot_png(&mut self) -> Result<Vec<u8>, CompositorError> {
        let surface = self.surface;
        with_scope(&mut self.engine, |engine, scope| {
            let image = scope.track(engine.snapshot(surface)?);
            engine.encode_png(image)
        })
    }

    // Persistence

    /// Write the viewport and layer records under `key`. The displacement
    /// preview is not saved.
    ///
    /// Layers without stored bytes, such as displacement results, are
    /// encoded as PNG and stored under their content key first.
    pub fn save_project<S>(&mut self, store: &mut S, key: &str) -> Result<(), CompositorError>
    where
        S: ByteStore + ?Sized,
    {
        validate_key(key)?;
        let preview = self.displacement.map(|state| state.preview);
        let unstored: Vec<(LayerId, ImageHandle)> = self
            .store
            .iter()
            .filter(|layer| Some(layer.id) != preview && layer.source_key.is_none())
            .map(|layer| (layer.id, layer.image))
            .collect();
        for (id, image) in unstored {
            let bytes = self.engine.encode_png(image)?;
            let source_key = content_key(&bytes);
            store.put(&source_key, &bytes)?;
            self.store.set_source_key(id, source_key.clone());
            tracing::info!(layer = %id, key = %source_key, "layer pixels stored");
        }

        let document = ProjectDocument::capture(
            self.transform,
            self.store.iter().filter(|layer| Some(layer.id) != preview),
        );
        store.put(key, &document.to_json()?)?;
        tracing::info!(key, layers = document.layers.len(), "project saved");
        Ok(())
    }

    /// Replace the session contents with the project stored under `key`.
    ///
    /// The document is parsed before anything is cleared, so a missing or
    /// malformed project leaves the session untouched. Layers whose bytes
    /// are gone or undecodable are skipped.
    pub fn load_project<S>(&mut self, store: &S, key: &str) -> Result<LoadReport, CompositorError>
    where
        S: ByteStore + ?Sized,
    {
        let bytes = store
            .get(key)?
            .ok_or_else(|| CompositorError::persistence(key, "project not found"))?;
        let document = ProjectDocument::from_json(&bytes)?;

        self.clear_all_inner();
        let mut report = LoadReport::default();
        for persisted in &document.layers {
            let Some(source_key) = persisted.source_key.as_deref() else {
                tracing::warn!(name = %persisted.name, "skipping layer without stored bytes");
                report.skipped.push(persisted.name.clone());
                continue;
            };
            let bytes = match store.get(source_key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    tracing::warn!(name = %persisted.name, key = source_key, "layer bytes missing");
                    report.skipped.push(persisted.name.clone());
                    continue;
                }
                Err(error) => {
                    tracing::warn!(name = %persisted.name, %error, "layer bytes unreadable");
                    report.skipped.push(persisted.name.clone());
                    continue;
                }
            };
            let Ok(image) = self.decode(&bytes, &persisted.name) else {
                report.skipped.push(persisted.name.clone());
                continue;
            };
            let Ok((width, height)) = self.image_size(image) else {
                report.skipped.push(persisted.name.clone());
                continue;
            };

            let base = Layer {
                id: persisted.id,
                image,
                width,
                height,
                name: persisted.name.clone(),
                x: 0.0,
                y: 0.0,
                scale: 1.0,
                rotation: 0.0,
                opacity: 1.0,
                blend_mode: persisted.blend_mode,
                source_key: Some(source_key.to_owned()),
            };
            let layer = LayerPatch {
                x: Some(persisted.x),
                y: Some(persisted.y),
                scale: Some(persisted.scale),
                rotation: Some(persisted.rotation),
                opacity: Some(persisted.opacity),
                ..LayerPatch::default()
            }
            .apply(&base);
            self.store.restore_layer(layer);
            report.loaded += 1;
        }

        self.transform = document.transform.clamped(&self.config.zoom_limits());
        tracing::info!(
            key,
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "project loaded"
        );
        self.redraw();
        Ok(report)
    }

    /// Release every layer, pending displacement input and the canvas
    /// surface, then hand the engine back.
    pub fn close(mut self) -> E {
        self.clear_all_inner();
        self.engine.release(self.surface.into());
        self.engine
    }
}

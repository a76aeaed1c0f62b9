//! Bookkeeping render engine for integration tests.
//!
//! Images are fake: `image_bytes(w, h)` produces bytes the engine "decodes"
//! into a `w`x`h` image. Every handle is tracked so tests can assert that
//! nothing leaks and nothing is released twice.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use strata::blend::BlendMode;
use strata::displacement::DisplacementParams;
use strata::engine::{
    DisplacementInputs, ImageHandle, PaintHandle, ProgramHandle, RenderEngine, Resource, Rgba,
    ShaderHandle, SurfaceHandle,
};
use strata::error::CompositorError;

pub fn image_bytes(width: u32, height: u32) -> Vec<u8> {
    format!("mock-image:{width}x{height}").into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub image: ImageHandle,
    pub alpha: f32,
    pub blend_mode: BlendMode,
}

#[derive(Debug, Clone, Copy)]
struct PaintState {
    alpha: f32,
    blend_mode: BlendMode,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    pub next_id: u64,
    pub live: HashSet<Resource>,
    pub images: HashMap<ImageHandle, (u32, u32)>,
    pub surfaces: HashMap<SurfaceHandle, (u32, u32)>,
    pub paints: HashMap<PaintHandle, PaintState>,
    pub draws: HashMap<SurfaceHandle, Vec<DrawCall>>,
    pub fail_surfaces: bool,
    pub fail_program_build: bool,
    /// Fail the call with this 1-based number, counted per kind below.
    pub fail_surface_call: Option<usize>,
    pub fail_snapshot_call: Option<usize>,
    pub fail_image_shader_call: Option<usize>,
    pub fail_displacement_shader: bool,
    pub surface_calls: usize,
    pub snapshot_calls: usize,
    pub image_shader_calls: usize,
    pub created: usize,
    pub double_releases: usize,
    pub stale_draws: usize,
    pub programs_built: usize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_programs() -> Self {
        Self {
            fail_program_build: true,
            ..Self::default()
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_images(&self) -> usize {
        self.live
            .iter()
            .filter(|resource| matches!(resource, Resource::Image(_)))
            .count()
    }

    pub fn is_live(&self, resource: impl Into<Resource>) -> bool {
        self.live.contains(&resource.into())
    }

    /// Draw calls since the last `clear` of `surface`.
    pub fn frame(&self, surface: SurfaceHandle) -> &[DrawCall] {
        self.draws.get(&surface).map(Vec::as_slice).unwrap_or(&[])
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.created += 1;
        self.next_id
    }

    fn new_image(&mut self, width: u32, height: u32) -> ImageHandle {
        let handle = ImageHandle::from_raw(self.next());
        self.images.insert(handle, (width, height));
        self.live.insert(handle.into());
        handle
    }
}

fn parse_image_bytes(bytes: &[u8]) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (width, height) = text.strip_prefix("mock-image:")?.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

impl RenderEngine for MockEngine {
    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle, CompositorError> {
        self.surface_calls += 1;
        if self.fail_surfaces
            || self.fail_surface_call == Some(self.surface_calls)
            || width == 0
            || height == 0
        {
            return Err(CompositorError::engine("mock surface allocation failed"));
        }
        let handle = SurfaceHandle::from_raw(self.next());
        self.surfaces.insert(handle, (width, height));
        self.live.insert(handle.into());
        Ok(handle)
    }

    fn surface_size(&self, surface: SurfaceHandle) -> Option<(u32, u32)> {
        self.is_live(surface).then(|| self.surfaces.get(&surface).copied()).flatten()
    }

    fn save(&mut self, _surface: SurfaceHandle) {}

    fn restore(&mut self, _surface: SurfaceHandle) {}

    fn translate(&mut self, _surface: SurfaceHandle, _dx: f32, _dy: f32) {}

    fn scale(&mut self, _surface: SurfaceHandle, _sx: f32, _sy: f32) {}

    fn rotate(&mut self, _surface: SurfaceHandle, _degrees: f32) {}

    fn clear(&mut self, surface: SurfaceHandle, _color: Rgba) {
        self.draws.insert(surface, Vec::new());
    }

    fn draw_image(
        &mut self,
        surface: SurfaceHandle,
        image: ImageHandle,
        _x: f32,
        _y: f32,
        paint: Option<PaintHandle>,
    ) {
        if !self.is_live(image) || !self.is_live(surface) {
            self.stale_draws += 1;
            return;
        }
        let state = paint
            .and_then(|paint| self.paints.get(&paint).copied())
            .unwrap_or(PaintState {
                alpha: 1.0,
                blend_mode: BlendMode::SourceOver,
            });
        self.draws.entry(surface).or_default().push(DrawCall {
            image,
            alpha: state.alpha,
            blend_mode: state.blend_mode,
        });
    }

    fn draw_paint(&mut self, surface: SurfaceHandle, paint: PaintHandle) {
        if !self.is_live(surface) || !self.is_live(paint) {
            self.stale_draws += 1;
        }
    }

    fn flush(&mut self, _surface: SurfaceHandle) {}

    fn snapshot(&mut self, surface: SurfaceHandle) -> Result<ImageHandle, CompositorError> {
        self.snapshot_calls += 1;
        if self.fail_snapshot_call == Some(self.snapshot_calls) {
            return Err(CompositorError::engine("mock snapshot failed"));
        }
        let (width, height) = self
            .surface_size(surface)
            .ok_or_else(|| CompositorError::engine("snapshot of unknown surface"))?;
        Ok(self.new_image(width, height))
    }

    fn create_paint(&mut self) -> Result<PaintHandle, CompositorError> {
        let handle = PaintHandle::from_raw(self.next());
        self.paints.insert(
            handle,
            PaintState {
                alpha: 1.0,
                blend_mode: BlendMode::SourceOver,
            },
        );
        self.live.insert(handle.into());
        Ok(handle)
    }

    fn set_alpha(&mut self, paint: PaintHandle, alpha: f32) {
        if let Some(state) = self.paints.get_mut(&paint) {
            state.alpha = alpha;
        }
    }

    fn set_blend_mode(&mut self, paint: PaintHandle, mode: BlendMode) {
        if let Some(state) = self.paints.get_mut(&paint) {
            state.blend_mode = mode;
        }
    }

    fn set_shader(&mut self, _paint: PaintHandle, _shader: ShaderHandle) {}

    fn decode(&mut self, bytes: &[u8]) -> Result<ImageHandle, CompositorError> {
        let (width, height) = parse_image_bytes(bytes)
            .ok_or_else(|| CompositorError::decode("not a mock image"))?;
        Ok(self.new_image(width, height))
    }

    fn image_size(&self, image: ImageHandle) -> Option<(u32, u32)> {
        self.is_live(image).then(|| self.images.get(&image).copied()).flatten()
    }

    fn encode_png(&self, image: ImageHandle) -> Result<Vec<u8>, CompositorError> {
        let (width, height) = self
            .image_size(image)
            .ok_or_else(|| CompositorError::engine("encode of unknown image"))?;
        Ok(image_bytes(width, height))
    }

    fn make_image_shader(&mut self, image: ImageHandle) -> Result<ShaderHandle, CompositorError> {
        self.image_shader_calls += 1;
        if self.fail_image_shader_call == Some(self.image_shader_calls) {
            return Err(CompositorError::engine("mock image shader failed"));
        }
        if !self.is_live(image) {
            return Err(CompositorError::engine("shader over unknown image"));
        }
        let handle = ShaderHandle::from_raw(self.next());
        self.live.insert(handle.into());
        Ok(handle)
    }

    fn build_displacement_program(
        &mut self,
        _params: &DisplacementParams,
    ) -> Result<ProgramHandle, CompositorError> {
        if self.fail_program_build {
            return Err(CompositorError::compositor("mock program failed to build"));
        }
        self.programs_built += 1;
        let handle = ProgramHandle::from_raw(self.next());
        self.live.insert(handle.into());
        Ok(handle)
    }

    fn make_displacement_shader(
        &mut self,
        program: ProgramHandle,
        inputs: &DisplacementInputs,
    ) -> Result<ShaderHandle, CompositorError> {
        if self.fail_displacement_shader {
            return Err(CompositorError::compositor("mock displacement shader failed"));
        }
        let mut all = vec![inputs.source, inputs.map];
        all.extend(inputs.mask);
        if !self.is_live(program) || all.iter().any(|shader| !self.is_live(*shader)) {
            return Err(CompositorError::compositor("displacement inputs are not live"));
        }
        let handle = ShaderHandle::from_raw(self.next());
        self.live.insert(handle.into());
        Ok(handle)
    }

    fn release(&mut self, resource: Resource) {
        if !self.live.remove(&resource) {
            self.double_releases += 1;
        }
    }
}

//! Rendering engine boundary.
//!
//! The compositor core never touches pixels directly. It talks to a
//! [`RenderEngine`] through opaque handles and asks the engine to release
//! every handle it created, exactly once. [`skia::TinySkiaEngine`] is the
//! bundled CPU implementation.

pub mod skia;

use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::displacement::DisplacementParams;
use crate::error::CompositorError;

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

engine_handle!(
    /// A decoded or snapshotted bitmap.
    ImageHandle
);
engine_handle!(
    /// An offscreen drawing surface together with its canvas state.
    SurfaceHandle
);
engine_handle!(
    /// A sampleable input (image shader) or a composed effect shader.
    ShaderHandle
);
engine_handle!(
    /// A built displacement program.
    ProgramHandle
);
engine_handle!(PaintHandle);

/// Any engine-owned resource, for release bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Image(ImageHandle),
    Surface(SurfaceHandle),
    Shader(ShaderHandle),
    Program(ProgramHandle),
    Paint(PaintHandle),
}

impl From<ImageHandle> for Resource {
    fn from(handle: ImageHandle) -> Self {
        Self::Image(handle)
    }
}

impl From<SurfaceHandle> for Resource {
    fn from(handle: SurfaceHandle) -> Self {
        Self::Surface(handle)
    }
}

impl From<ShaderHandle> for Resource {
    fn from(handle: ShaderHandle) -> Self {
        Self::Shader(handle)
    }
}

impl From<ProgramHandle> for Resource {
    fn from(handle: ProgramHandle) -> Self {
        Self::Program(handle)
    }
}

impl From<PaintHandle> for Resource {
    fn from(handle: PaintHandle) -> Self {
        Self::Paint(handle)
    }
}

/// Straight (or premultiplied, where noted) color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    pub fn premultiply(self) -> Self {
        Self::new(self.r * self.a, self.g * self.a, self.b * self.a, self.a)
    }

    pub fn unpremultiply(self) -> Self {
        if self.a <= 0.0 {
            return Self::TRANSPARENT;
        }
        Self::new(
            (self.r / self.a).min(1.0),
            (self.g / self.a).min(1.0),
            (self.b / self.a).min(1.0),
            self.a,
        )
    }

    pub fn mean_rgb(self) -> f32 {
        (self.r + self.g + self.b) / 3.0
    }

    pub fn clamped(self) -> Self {
        Self::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
    }

    pub fn validate(&self, label: &str) -> Result<(), String> {
        for (channel, value) in [("r", self.r), ("g", self.g), ("b", self.b), ("a", self.a)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!(
                    "{label}.{channel} must be within [0, 1], got {value}"
                ));
            }
        }
        Ok(())
    }
}

/// Shader inputs wired into a displacement program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplacementInputs {
    pub source: ShaderHandle,
    pub map: ShaderHandle,
    pub mask: Option<ShaderHandle>,
}

/// Capabilities the compositor needs from a 2D rendering engine.
///
/// Canvas calls on an unknown surface or image are ignored; calls that
/// create resources report failure through [`CompositorError`]. Drawing is
/// painter's-algorithm compositing with premultiplied alpha.
pub trait RenderEngine {
    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, CompositorError>;
    fn surface_size(&self, surface: SurfaceHandle) -> Option<(u32, u32)>;

    fn save(&mut self, surface: SurfaceHandle);
    fn restore(&mut self, surface: SurfaceHandle);
    fn translate(&mut self, surface: SurfaceHandle, dx: f32, dy: f32);
    fn scale(&mut self, surface: SurfaceHandle, sx: f32, sy: f32);
    fn rotate(&mut self, surface: SurfaceHandle, degrees: f32);
    fn clear(&mut self, surface: SurfaceHandle, color: Rgba);
    fn draw_image(
        &mut self,
        surface: SurfaceHandle,
        image: ImageHandle,
        x: f32,
        y: f32,
        paint: Option<PaintHandle>,
    );
    /// Fill the whole surface with the paint's shader.
    fn draw_paint(&mut self, surface: SurfaceHandle, paint: PaintHandle);
    fn flush(&mut self, surface: SurfaceHandle);
    fn snapshot(&mut self, surface: SurfaceHandle) -> Result<ImageHandle, CompositorError>;

    fn create_paint(&mut self) -> Result<PaintHandle, CompositorError>;
    fn set_alpha(&mut self, paint: PaintHandle, alpha: f32);
    fn set_blend_mode(&mut self, paint: PaintHandle, mode: BlendMode);
    fn set_shader(&mut self, paint: PaintHandle, shader: ShaderHandle);

    fn decode(&mut self, bytes: &[u8]) -> Result<ImageHandle, CompositorError>;
    fn image_size(&self, image: ImageHandle) -> Option<(u32, u32)>;
    fn encode_png(&self, image: ImageHandle) -> Result<Vec<u8>, CompositorError>;

    fn make_image_shader(&mut self, image: ImageHandle) -> Result<ShaderHandle, CompositorError>;
    fn build_displacement_program(
        &mut self,
        params: &DisplacementParams,
    ) -> Result<ProgramHandle, CompositorError>;
    fn make_displacement_shader(
        &mut self,
        program: ProgramHandle,
        inputs: &DisplacementInputs,
    ) -> Result<ShaderHandle, CompositorError>;

    fn release(&mut self, resource: Resource);
}

/// Resources created during one operation, released together when it ends.
#[derive(Debug, Default)]
pub struct ResourceScope {
    held: Vec<Resource>,
}

impl ResourceScope {
    /// Register `handle` for release and hand it back.
    pub fn track<H>(&mut self, handle: H) -> H
    where
        H: Into<Resource> + Copy,
    {
        self.held.push(handle.into());
        handle
    }

    /// Stop tracking `handle` so it outlives the scope.
    pub fn keep(&mut self, handle: impl Into<Resource>) -> bool {
        let resource = handle.into();
        match self.held.iter().rposition(|held| *held == resource) {
            Some(index) => {
                self.held.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    fn release_all<E>(self, engine: &mut E)
    where
        E: RenderEngine + ?Sized,
    {
        for resource in self.held.into_iter().rev() {
            engine.release(resource);
        }
    }
}

/// Run `body` with a fresh [`ResourceScope`] and release everything it
/// tracked afterwards, whether `body` succeeded or not.
pub fn with_scope<E, T, F>(engine: &mut E, body: F) -> T
where
    E: RenderEngine + ?Sized,
    F: FnOnce(&mut E, &mut ResourceScope) -> T,
{
    let mut scope = ResourceScope::default();
    let out = body(engine, &mut scope);
    scope.release_all(engine);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_removes_only_the_latest_matching_entry() {
        let mut scope = ResourceScope::default();
        let image = scope.track(ImageHandle::from_raw(4));
        scope.track(SurfaceHandle::from_raw(4));
        assert_eq!(scope.len(), 2);

        assert!(scope.keep(image));
        assert!(!scope.keep(image));
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.held, vec![Resource::Surface(SurfaceHandle::from_raw(4))]);
    }

    #[test]
    fn premultiply_round_trip_preserves_opaque_colors() {
        let color = Rgba::new(0.25, 0.5, 0.75, 1.0);
        assert_eq!(color.premultiply().unpremultiply(), color);
        assert_eq!(Rgba::new(0.3, 0.3, 0.3, 0.0).unpremultiply(), Rgba::TRANSPARENT);
    }

    #[test]
    fn rgba_validation_rejects_out_of_range_channels() {
        assert!(Rgba::WHITE.validate("background").is_ok());
        let error = Rgba::new(1.5, 0.0, 0.0, 1.0)
            .validate("background")
            .expect_err("r out of range");
        assert!(error.contains("background.r"));
    }
}

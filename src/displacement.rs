//! Displacement-map compositing.
//!
//! A displacement map is an image whose red and green channels encode a 2D
//! offset per pixel: `0.5` is "no offset", `0.0` and `1.0` are full negative
//! and positive offsets. The source image is resampled at the displaced
//! coordinate. An optional mask scales the effect and the output alpha.
//!
//! [`DisplacementKernel`] is the per-pixel program; engines run it over a
//! surface. [`composite_displacement`] drives a [`RenderEngine`] through the
//! whole job and releases every intermediate resource on every path.

use serde::{Deserialize, Serialize};

use crate::engine::{
    with_scope, DisplacementInputs, ImageHandle, RenderEngine, ResourceScope, Rgba, ShaderHandle,
};
use crate::error::CompositorError;
use crate::transform::Point;

pub const DEFAULT_STRENGTH: f64 = 20.0;

/// How the mask participates in the warp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// Mask strength scales the displacement vector and the output alpha.
    #[default]
    ScaleDisplacement,
    /// Full-strength displacement everywhere; the mask only feeds alpha.
    AlphaOnly,
}

/// How mask strength becomes the output alpha factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    #[default]
    Linear,
    /// `smoothstep(0, 1, mask)` for feathered edges.
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementParams {
    /// Displacement magnitude in pixels for a fully saturated map channel.
    pub strength: f64,
    pub source_offset: Point,
    pub mask_mode: MaskMode,
    pub edge_mode: EdgeMode,
}

impl Default for DisplacementParams {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            source_offset: Point::default(),
            mask_mode: MaskMode::default(),
            edge_mode: EdgeMode::default(),
        }
    }
}

/// Read access to an image in normalized premultiplied RGBA.
pub trait Sampler {
    fn dimensions(&self) -> (u32, u32);

    /// Texel at integer coordinates; transparent outside the image.
    fn texel(&self, x: i64, y: i64) -> Rgba;

    fn sample_nearest(&self, x: f32, y: f32) -> Rgba {
        self.texel(x.floor() as i64, y.floor() as i64)
    }

    /// Bilinear sample with texel centers at `+0.5`.
    fn sample_bilinear(&self, x: f32, y: f32) -> Rgba {
        let fx = x - 0.5;
        let fy = y - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let c00 = self.texel(x0, y0);
        let c10 = self.texel(x0 + 1, y0);
        let c01 = self.texel(x0, y0 + 1);
        let c11 = self.texel(x0 + 1, y0 + 1);

        let top = lerp_rgba(c00, c10, tx);
        let bottom = lerp_rgba(c01, c11, tx);
        lerp_rgba(top, bottom, ty)
    }
}

fn lerp_rgba(a: Rgba, b: Rgba, t: f32) -> Rgba {
    Rgba::new(
        a.r + (b.r - a.r) * t,
        a.g + (b.g - a.g) * t,
        a.b + (b.b - a.b) * t,
        a.a + (b.a - a.a) * t,
    )
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Validated per-pixel displacement program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementKernel {
    strength: f32,
    offset_x: f32,
    offset_y: f32,
    mask_mode: MaskMode,
    edge_mode: EdgeMode,
}

impl DisplacementKernel {
    pub fn new(params: &DisplacementParams) -> Result<Self, CompositorError> {
        if !params.strength.is_finite() {
            return Err(CompositorError::compositor(format!(
                "displacement program rejected: strength must be finite, got {}",
                params.strength
            )));
        }
        if !params.source_offset.x.is_finite() || !params.source_offset.y.is_finite() {
            return Err(CompositorError::compositor(
                "displacement program rejected: source offset must be finite",
            ));
        }

        Ok(Self {
            strength: params.strength as f32,
            offset_x: params.source_offset.x as f32,
            offset_y: params.source_offset.y as f32,
            mask_mode: params.mask_mode,
            edge_mode: params.edge_mode,
        })
    }

    /// Shade the output pixel at integer coordinate `(x, y)`.
    ///
    /// Returns straight (unpremultiplied) color.
    pub fn shade<S, M, K>(&self, x: u32, y: u32, source: &S, map: &M, mask: Option<&K>) -> Rgba
    where
        S: Sampler + ?Sized,
        M: Sampler + ?Sized,
        K: Sampler + ?Sized,
    {
        let cx = x as f32 + 0.5;
        let cy = y as f32 + 0.5;

        let displacement = map.sample_nearest(cx, cy).unpremultiply();
        let vx = (displacement.r - 0.5) * 2.0;
        let vy = (displacement.g - 0.5) * 2.0;

        let mask_strength = mask
            .map(|mask| mask.sample_nearest(cx, cy).unpremultiply().mean_rgb())
            .unwrap_or(1.0);

        let magnitude = match self.mask_mode {
            MaskMode::ScaleDisplacement => self.strength * mask_strength,
            MaskMode::AlphaOnly => self.strength,
        };
        let sx = cx - self.offset_x + vx * magnitude;
        let sy = cy - self.offset_y + vy * magnitude;

        let color = source.sample_bilinear(sx, sy).unpremultiply();
        let edge = match self.edge_mode {
            EdgeMode::Linear => mask_strength,
            EdgeMode::Smooth => smoothstep(0.0, 1.0, mask_strength),
        };

        Rgba::new(color.r, color.g, color.b, color.a * edge).clamped()
    }

    /// Run the program over a `width × height` output, row-major.
    pub fn render<S, M, K>(
        &self,
        width: u32,
        height: u32,
        source: &S,
        map: &M,
        mask: Option<&K>,
    ) -> Vec<Rgba>
    where
        S: Sampler + ?Sized,
        M: Sampler + ?Sized,
        K: Sampler + ?Sized,
    {
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                out.push(self.shade(x, y, source, map, mask));
            }
        }
        out
    }
}

/// Images feeding one displacement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplacementJob {
    pub source: ImageHandle,
    pub map: ImageHandle,
    pub mask: Option<ImageHandle>,
}

/// Warp `job.source` by `job.map` and return the snapshot of the result.
///
/// The output is sized to the source image. The map and mask are stretched
/// to that size. Only the returned image survives; every surface, snapshot,
/// shader, program and paint created on the way is released before this
/// returns, on success and on failure alike. Nothing is allocated when an
/// input image is unknown to the engine.
pub fn composite_displacement<E>(
    engine: &mut E,
    job: &DisplacementJob,
    params: &DisplacementParams,
) -> Result<ImageHandle, CompositorError>
where
    E: RenderEngine + ?Sized,
{
    let (width, height) = engine
        .image_size(job.source)
        .ok_or_else(|| CompositorError::engine("displacement source image is not loaded"))?;
    if engine.image_size(job.map).is_none() {
        return Err(CompositorError::engine(
            "displacement map image is not loaded",
        ));
    }
    if let Some(mask) = job.mask {
        if engine.image_size(mask).is_none() {
            return Err(CompositorError::engine("displacement mask image is not loaded"));
        }
    }

    with_scope(engine, |engine, scope| {
        let source = stage_input(engine, scope, job.source, width, height, false)?;
        let map = stage_input(engine, scope, job.map, width, height, true)?;
        let mask = job
            .mask
            .map(|mask| stage_input(engine, scope, mask, width, height, true))
            .transpose()?;

        let program = scope.track(engine.build_displacement_program(params)?);
        let shader = scope.track(engine.make_displacement_shader(
            program,
            &DisplacementInputs { source, map, mask },
        )?);
        let paint = scope.track(engine.create_paint()?);
        engine.set_shader(paint, shader);

        let target = scope.track(engine.create_surface(width, height)?);
        engine.clear(target, Rgba::TRANSPARENT);
        engine.draw_paint(target, paint);
        engine.flush(target);
        engine.snapshot(target)
    })
}

/// Render `image` into its own surface of the output size and expose it as a
/// sampleable shader.
fn stage_input<E>(
    engine: &mut E,
    scope: &mut ResourceScope,
    image: ImageHandle,
    width: u32,
    height: u32,
    stretch: bool,
) -> Result<ShaderHandle, CompositorError>
where
    E: RenderEngine + ?Sized,
{
    let surface = scope.track(engine.create_surface(width, height)?);
    engine.clear(surface, Rgba::TRANSPARENT);
    engine.save(surface);
    if stretch {
        if let Some((image_width, image_height)) = engine.image_size(image) {
            if image_width > 0 && image_height > 0 {
                engine.scale(
                    surface,
                    width as f32 / image_width as f32,
                    height as f32 / image_height as f32,
                );
            }
        }
    }
    engine.draw_image(surface, image, 0.0, 0.0, None);
    engine.restore(surface);
    engine.flush(surface);

    let snapshot = scope.track(engine.snapshot(surface)?);
    Ok(scope.track(engine.make_image_shader(snapshot)?))
}

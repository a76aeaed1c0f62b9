//! CPU rendering engine on `tiny-skia` pixmaps.
//!
//! Images are stored premultiplied. Every resource lives in a per-kind table
//! keyed by a monotonically increasing id, so a released handle is never
//! reused and a stale handle simply misses.

use std::collections::HashMap;
use std::io::Cursor;

use tiny_skia::{ColorU8, FilterQuality, Pixmap, PixmapPaint, PremultipliedColorU8};

use super::{
    DisplacementInputs, ImageHandle, PaintHandle, ProgramHandle, RenderEngine, Resource, Rgba,
    ShaderHandle, SurfaceHandle,
};
use crate::blend::BlendMode;
use crate::displacement::{DisplacementKernel, DisplacementParams, Sampler};
use crate::error::CompositorError;

/// Largest edge accepted for a surface or decoded image.
pub const MAX_DIMENSION: u32 = 16_384;

struct SkiaSurface {
    pixmap: Pixmap,
    matrix: tiny_skia::Transform,
    stack: Vec<tiny_skia::Transform>,
}

enum SkiaShader {
    Image(Pixmap),
    Displacement {
        kernel: DisplacementKernel,
        source: Pixmap,
        map: Pixmap,
        mask: Option<Pixmap>,
    },
}

#[derive(Debug, Clone, Copy)]
struct SkiaPaint {
    alpha: f32,
    blend_mode: BlendMode,
    shader: Option<ShaderHandle>,
}

impl Default for SkiaPaint {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            blend_mode: BlendMode::SourceOver,
            shader: None,
        }
    }
}

impl SkiaPaint {
    fn pixmap_paint(&self) -> PixmapPaint {
        PixmapPaint {
            opacity: self.alpha.clamp(0.0, 1.0),
            blend_mode: self.blend_mode.to_skia(),
            quality: FilterQuality::Bilinear,
        }
    }
}

/// Samples a premultiplied pixmap as normalized [`Rgba`].
pub struct PixmapSampler<'a>(pub &'a Pixmap);

impl Sampler for PixmapSampler<'_> {
    fn dimensions(&self) -> (u32, u32) {
        (self.0.width(), self.0.height())
    }

    fn texel(&self, x: i64, y: i64) -> Rgba {
        if x < 0 || y < 0 || x >= i64::from(self.0.width()) || y >= i64::from(self.0.height()) {
            return Rgba::TRANSPARENT;
        }
        match self.0.pixel(x as u32, y as u32) {
            Some(pixel) => Rgba::from_u8(pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()),
            None => Rgba::TRANSPARENT,
        }
    }
}

#[derive(Default)]
pub struct TinySkiaEngine {
    next_id: u64,
    images: HashMap<u64, Pixmap>,
    surfaces: HashMap<u64, SkiaSurface>,
    shaders: HashMap<u64, SkiaShader>,
    programs: HashMap<u64, DisplacementKernel>,
    paints: HashMap<u64, SkiaPaint>,
    stale_releases: usize,
}

impl TinySkiaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources currently alive across every kind.
    pub fn live_resources(&self) -> usize {
        self.images.len()
            + self.surfaces.len()
            + self.shaders.len()
            + self.programs.len()
            + self.paints.len()
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Releases of handles that were already gone.
    pub fn stale_releases(&self) -> usize {
        self.stale_releases
    }

    /// Copy an image out as straight RGBA8 bytes.
    pub fn read_rgba8(&self, image: ImageHandle) -> Option<Vec<u8>> {
        self.images.get(&image.raw()).map(pixmap_to_rgba8)
    }

    /// Register raw straight-alpha RGBA8 pixels as an image.
    pub fn import_rgba8(
        &mut self,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<ImageHandle, CompositorError> {
        let pixmap = pixmap_from_rgba8(width, height, rgba)?;
        Ok(ImageHandle::from_raw(self.insert_image(pixmap)))
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_image(&mut self, pixmap: Pixmap) -> u64 {
        let id = self.next_id();
        self.images.insert(id, pixmap);
        id
    }

    fn shader_pixmap(&self, shader: ShaderHandle) -> Result<Pixmap, CompositorError> {
        match self.shaders.get(&shader.raw()) {
            Some(SkiaShader::Image(pixmap)) => Ok(pixmap.clone()),
            Some(SkiaShader::Displacement { .. }) => Err(CompositorError::compositor(
                "displacement inputs must be image shaders",
            )),
            None => Err(CompositorError::engine(format!(
                "unknown shader handle {}",
                shader.raw()
            ))),
        }
    }

    fn shade_into(shader: &SkiaShader, width: u32, height: u32) -> Option<Pixmap> {
        match shader {
            SkiaShader::Image(pixmap) => Some(pixmap.clone()),
            SkiaShader::Displacement {
                kernel,
                source,
                map,
                mask,
            } => {
                let source = PixmapSampler(source);
                let map = PixmapSampler(map);
                let mask = mask.as_ref().map(PixmapSampler);
                let shaded = kernel.render(width, height, &source, &map, mask.as_ref());

                let mut out = Pixmap::new(width, height)?;
                for (dst, color) in out.pixels_mut().iter_mut().zip(shaded) {
                    *dst = premultiplied_u8(color);
                }
                Some(out)
            }
        }
    }
}

fn premultiplied_u8(color: Rgba) -> PremultipliedColorU8 {
    let to_u8 = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    ColorU8::from_rgba(to_u8(color.r), to_u8(color.g), to_u8(color.b), to_u8(color.a))
        .premultiply()
}

fn check_dimensions(width: u32, height: u32) -> Result<(), CompositorError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(CompositorError::engine(format!(
            "surface size {width}x{height} is outside 1..={MAX_DIMENSION}"
        )));
    }
    Ok(())
}

fn pixmap_from_rgba8(width: u32, height: u32, rgba: &[u8]) -> Result<Pixmap, CompositorError> {
    check_dimensions(width, height).map_err(|error| CompositorError::decode(error.message()))?;
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(CompositorError::decode(format!(
            "RGBA buffer length mismatch: expected {expected} bytes, got {} bytes",
            rgba.len()
        )));
    }

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| CompositorError::decode(format!("cannot allocate {width}x{height} image")))?;
    let texels: &[[u8; 4]] = bytemuck::cast_slice(rgba);
    for (dst, [r, g, b, a]) in pixmap.pixels_mut().iter_mut().zip(texels.iter().copied()) {
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

fn pixmap_to_rgba8(pixmap: &Pixmap) -> Vec<u8> {
    let texels: Vec<[u8; 4]> = pixmap
        .pixels()
        .iter()
        .map(|pixel| {
            let straight = pixel.demultiply();
            [straight.red(), straight.green(), straight.blue(), straight.alpha()]
        })
        .collect();
    bytemuck::cast_slice(texels.as_slice()).to_vec()
}

impl RenderEngine for TinySkiaEngine {
    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle, CompositorError> {
        check_dimensions(width, height)?;
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            CompositorError::engine(format!("cannot allocate {width}x{height} surface"))
        })?;
        let id = self.next_id();
        self.surfaces.insert(
            id,
            SkiaSurface {
                pixmap,
                matrix: tiny_skia::Transform::identity(),
                stack: Vec::new(),
            },
        );
        Ok(SurfaceHandle::from_raw(id))
    }

    fn surface_size(&self, surface: SurfaceHandle) -> Option<(u32, u32)> {
        self.surfaces
            .get(&surface.raw())
            .map(|surface| (surface.pixmap.width(), surface.pixmap.height()))
    }

    fn save(&mut self, surface: SurfaceHandle) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            surface.stack.push(surface.matrix);
        }
    }

    fn restore(&mut self, surface: SurfaceHandle) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            if let Some(matrix) = surface.stack.pop() {
                surface.matrix = matrix;
            }
        }
    }

    fn translate(&mut self, surface: SurfaceHandle, dx: f32, dy: f32) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            surface.matrix = surface.matrix.pre_translate(dx, dy);
        }
    }

    fn scale(&mut self, surface: SurfaceHandle, sx: f32, sy: f32) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            surface.matrix = surface.matrix.pre_scale(sx, sy);
        }
    }

    fn rotate(&mut self, surface: SurfaceHandle, degrees: f32) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            surface.matrix = surface
                .matrix
                .pre_concat(tiny_skia::Transform::from_rotate(degrees));
        }
    }

    fn clear(&mut self, surface: SurfaceHandle, color: Rgba) {
        if let Some(surface) = self.surfaces.get_mut(&surface.raw()) {
            let color = color.clamped();
            match tiny_skia::Color::from_rgba(color.r, color.g, color.b, color.a) {
                Some(color) => surface.pixmap.fill(color),
                None => surface.pixmap.fill(tiny_skia::Color::TRANSPARENT),
            }
        }
    }

    fn draw_image(
        &mut self,
        surface: SurfaceHandle,
        image: ImageHandle,
        x: f32,
        y: f32,
        paint: Option<PaintHandle>,
    ) {
        let Some(source) = self.images.get(&image.raw()) else {
            tracing::debug!(image = image.raw(), "draw_image skipped unknown image");
            return;
        };
        let Some(target) = self.surfaces.get_mut(&surface.raw()) else {
            return;
        };
        let paint = paint
            .and_then(|paint| self.paints.get(&paint.raw()).copied())
            .unwrap_or_default();

        let matrix = target.matrix.pre_translate(x, y);
        target
            .pixmap
            .draw_pixmap(0, 0, source.as_ref(), &paint.pixmap_paint(), matrix, None);
    }

    fn draw_paint(&mut self, surface: SurfaceHandle, paint: PaintHandle) {
        let Some(paint) = self.paints.get(&paint.raw()).copied() else {
            return;
        };
        let Some(shader) = paint.shader.and_then(|shader| self.shaders.get(&shader.raw())) else {
            return;
        };
        let Some((width, height)) = self.surface_size(surface) else {
            return;
        };
        let Some(shaded) = Self::shade_into(shader, width, height) else {
            return;
        };
        if let Some(target) = self.surfaces.get_mut(&surface.raw()) {
            target.pixmap.draw_pixmap(
                0,
                0,
                shaded.as_ref(),
                &paint.pixmap_paint(),
                tiny_skia::Transform::identity(),
                None,
            );
        }
    }

    fn flush(&mut self, _surface: SurfaceHandle) {
        // Drawing is immediate on the CPU; nothing is queued.
    }

    fn snapshot(&mut self, surface: SurfaceHandle) -> Result<ImageHandle, CompositorError> {
        let pixmap = self
            .surfaces
            .get(&surface.raw())
            .map(|surface| surface.pixmap.clone())
            .ok_or_else(|| {
                CompositorError::engine(format!("unknown surface handle {}", surface.raw()))
            })?;
        Ok(ImageHandle::from_raw(self.insert_image(pixmap)))
    }

    fn create_paint(&mut self) -> Result<PaintHandle, CompositorError> {
        let id = self.next_id();
        self.paints.insert(id, SkiaPaint::default());
        Ok(PaintHandle::from_raw(id))
    }

    fn set_alpha(&mut self, paint: PaintHandle, alpha: f32) {
        if let Some(paint) = self.paints.get_mut(&paint.raw()) {
            paint.alpha = alpha;
        }
    }

    fn set_blend_mode(&mut self, paint: PaintHandle, mode: BlendMode) {
        if let Some(paint) = self.paints.get_mut(&paint.raw()) {
            paint.blend_mode = mode;
        }
    }

    fn set_shader(&mut self, paint: PaintHandle, shader: ShaderHandle) {
        if let Some(paint) = self.paints.get_mut(&paint.raw()) {
            paint.shader = Some(shader);
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<ImageHandle, CompositorError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|error| CompositorError::decode(format!("failed to decode image: {error}")))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let pixmap = pixmap_from_rgba8(width, height, decoded.as_raw())?;
        Ok(ImageHandle::from_raw(self.insert_image(pixmap)))
    }

    fn image_size(&self, image: ImageHandle) -> Option<(u32, u32)> {
        self.images
            .get(&image.raw())
            .map(|pixmap| (pixmap.width(), pixmap.height()))
    }

    fn encode_png(&self, image: ImageHandle) -> Result<Vec<u8>, CompositorError> {
        let pixmap = self.images.get(&image.raw()).ok_or_else(|| {
            CompositorError::engine(format!("unknown image handle {}", image.raw()))
        })?;
        let buffer = image::RgbaImage::from_raw(
            pixmap.width(),
            pixmap.height(),
            pixmap_to_rgba8(pixmap),
        )
        .ok_or_else(|| CompositorError::engine("pixel buffer does not match image size"))?;

        let mut out = Cursor::new(Vec::new());
        buffer
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|error| CompositorError::engine(format!("failed to encode png: {error}")))?;
        Ok(out.into_inner())
    }

    fn make_image_shader(&mut self, image: ImageHandle) -> Result<ShaderHandle, CompositorError> {
        let pixmap = self.images.get(&image.raw()).cloned().ok_or_else(|| {
            CompositorError::engine(format!("unknown image handle {}", image.raw()))
        })?;
        let id = self.next_id();
        self.shaders.insert(id, SkiaShader::Image(pixmap));
        Ok(ShaderHandle::from_raw(id))
    }

    fn build_displacement_program(
        &mut self,
        params: &DisplacementParams,
    ) -> Result<ProgramHandle, CompositorError> {
        let kernel = DisplacementKernel::new(params)?;
        let id = self.next_id();
        self.programs.insert(id, kernel);
        Ok(ProgramHandle::from_raw(id))
    }

    fn make_displacement_shader(
        &mut self,
        program: ProgramHandle,
        inputs: &DisplacementInputs,
    ) -> Result<ShaderHandle, CompositorError> {
        let kernel = *self.programs.get(&program.raw()).ok_or_else(|| {
            CompositorError::compositor(format!("unknown program handle {}", program.raw()))
        })?;
        let source = self.shader_pixmap(inputs.source)?;
        let map = self.shader_pixmap(inputs.map)?;
        let mask = inputs
            .mask
            .map(|mask| self.shader_pixmap(mask))
            .transpose()?;

        let id = self.next_id();
        self.shaders.insert(
            id,
            SkiaShader::Displacement {
                kernel,
                source,
                map,
                mask,
            },
        );
        Ok(ShaderHandle::from_raw(id))
    }

    fn release(&mut self, resource: Resource) {
        let released = match resource {
            Resource::Image(handle) => self.images.remove(&handle.raw()).is_some(),
            Resource::Surface(handle) => self.surfaces.remove(&handle.raw()).is_some(),
            Resource::Shader(handle) => self.shaders.remove(&handle.raw()).is_some(),
            Resource::Program(handle) => self.programs.remove(&handle.raw()).is_some(),
            Resource::Paint(handle) => self.paints.remove(&handle.raw()).is_some(),
        };
        if !released {
            self.stale_releases += 1;
            tracing::warn!(?resource, "release of unknown or already released resource");
        }
    }
}

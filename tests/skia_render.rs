use std::io::Cursor;

use strata::config::CompositorConfig;
use strata::displacement::DisplacementParams;
use strata::engine::skia::TinySkiaEngine;
use strata::interaction::Modifiers;
use strata::layer::LayerPatch;
use strata::transform::Point;
use strata::Session;

fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png should encode");
    out.into_inner()
}

fn canvas_pixels(session: &mut Session<TinySkiaEngine>) -> image::RgbaImage {
    let png = session.snapshot_png().expect("snapshot should encode");
    image::load_from_memory(&png)
        .expect("snapshot should decode")
        .to_rgba8()
}

fn session(width: u32, height: u32) -> Session<TinySkiaEngine> {
    Session::new(TinySkiaEngine::new(), width, height, CompositorConfig::default())
        .expect("session should start")
}

#[test]
fn layer_is_drawn_at_its_position() {
    let mut session = session(8, 8);
    let id = session
        .add_image(&solid_png(4, 4, [255, 0, 0, 255]), "red")
        .expect("png decodes");
    session.update_layer(id, &LayerPatch::position(2.0, 2.0));

    let pixels = canvas_pixels(&mut session);
    assert_eq!(pixels.get_pixel(3, 3).0, [255, 0, 0, 255]);
    assert_eq!(pixels.get_pixel(0, 0).0[3], 0);
    assert_eq!(pixels.get_pixel(7, 7).0[3], 0);
}

#[test]
fn opacity_scales_coverage() {
    let mut session = session(4, 4);
    let id = session
        .add_image(&solid_png(4, 4, [0, 0, 255, 255]), "blue")
        .expect("png decodes");
    session.update_layer(
        id,
        &LayerPatch {
            opacity: Some(0.5),
            ..LayerPatch::default()
        },
    );

    let alpha = canvas_pixels(&mut session).get_pixel(1, 1).0[3];
    assert!((120..=135).contains(&alpha), "alpha was {alpha}");
}

#[test]
fn viewport_zoom_magnifies_layers() {
    let mut session = session(8, 8);
    session
        .add_image(&solid_png(4, 4, [0, 255, 0, 255]), "green")
        .expect("png decodes");
    session.wheel(Point::new(0.0, 0.0), -1000.0, Modifiers::CTRL);

    let pixels = canvas_pixels(&mut session);
    assert_eq!(pixels.get_pixel(5, 5).0, [0, 255, 0, 255]);
}

#[test]
fn neutral_map_leaves_uniform_source_unchanged() {
    let mut session = session(16, 16);
    let source = session
        .add_image(&solid_png(6, 6, [0, 200, 0, 255]), "field")
        .expect("png decodes");
    session
        .begin_displacement(source, &solid_png(3, 3, [128, 128, 0, 255]))
        .expect("map decodes")
        .expect("source exists");

    let output = session
        .commit_displacement(&DisplacementParams::default())
        .expect("compositing succeeds")
        .expect("output layer");
    let layer = session.layer(output).expect("output layer");
    assert_eq!((layer.width, layer.height), (6, 6));

    let pixels = session
        .engine()
        .read_rgba8(layer.image)
        .expect("output image is live");
    let center = ((3 * 6 + 3) * 4) as usize;
    assert_eq!(&pixels[center..center + 4], &[0, 200, 0, 255]);

    // Canvas surface plus the source and output images.
    assert_eq!(session.engine().live_resources(), 3);
}

use image::{Rgba, RgbaImage};

use paintcore::brush::{BrushPreset, PenPreset, StrokeInterpolator, WatercolorPreset, Waypoint};
use paintcore::geometry::Vec2;
use paintcore::gpu::RedrawScheduler;
use paintcore::Picture;

fn half_red_half_blue(w: u32, h: u32) -> Picture {
    let img = RgbaImage::from_fn(w, h, |x, _| {
        if x < w / 2 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 255, 255]) }
    });
    Picture::from_rgba_image(&img)
}

fn paint(picture: &mut Picture, preset: &BrushPreset, color: [f32; 4], from: Vec2, to: Vec2) {
    let mut renderer = preset.renderer(color);
    let mut scheduler = RedrawScheduler::new();
    let mut interpolator = StrokeInterpolator::with_stabilizing(renderer.stabilizing_level());

    renderer.start(picture).unwrap();
    let first = interpolator.begin(Waypoint::new(from, 1.0), |w| renderer.spacing(w));
    renderer.next_waypoints(picture, &first, &mut scheduler).unwrap();
    let rest = interpolator.add(Waypoint::new(to, 1.0), |w| renderer.spacing(w));
    assert!(rest.len() > 10);
    renderer.next_waypoints(picture, &rest, &mut scheduler).unwrap();
    let tail = interpolator.finish(|w| renderer.spacing(w));
    renderer.next_waypoints(picture, &tail, &mut scheduler).unwrap();
    assert!(renderer.end(picture).unwrap().is_some());
}

#[test]
fn pen_stroke_undo_redo_is_pixel_exact() {
    let mut picture = half_red_half_blue(300, 80);
    let before = picture.flatten_to_image();

    let pen = BrushPreset::Pen(PenPreset { width: 12.0, ..PenPreset::default() });
    paint(&mut picture, &pen, [0.0, 1.0, 0.0, 1.0], Vec2::new(20.0, 40.0), Vec2::new(280.0, 40.0));
    let after = picture.flatten_to_image();
    assert_ne!(before, after);
    // The stroke crosses a tile boundary at x = 256.
    assert!(after.get_pixel(270, 40).0[1] > 200);

    assert_eq!(picture.undo().as_deref(), Some("Pen"));
    assert_eq!(picture.flatten_to_image(), before);
    assert_eq!(picture.redo().as_deref(), Some("Pen"));
    assert_eq!(picture.flatten_to_image(), after);
}

#[test]
fn watercolor_stroke_stays_opaque_and_undoes() {
    let mut picture = half_red_half_blue(120, 40);
    let before = picture.flatten_to_image();

    let watercolor = BrushPreset::Watercolor(WatercolorPreset { width: 16.0, ..WatercolorPreset::default() });
    paint(&mut picture, &watercolor, [1.0, 1.0, 1.0, 1.0], Vec2::new(30.0, 20.0), Vec2::new(90.0, 20.0));

    let px = picture.flatten_to_image().get_pixel(70, 20).0;
    assert!(px[0] > 0, "{:?}", px);
    assert_eq!(px[3], 255);

    picture.undo();
    assert_eq!(picture.flatten_to_image(), before);
}

#[test]
fn eraser_clears_and_undo_restores() {
    let mut picture = half_red_half_blue(64, 64);
    let before = picture.flatten_to_image();

    let eraser = BrushPreset::Pen(PenPreset { width: 16.0, eraser: true, ..PenPreset::default() });
    paint(&mut picture, &eraser, [0.0, 0.0, 0.0, 1.0], Vec2::new(10.0, 32.0), Vec2::new(54.0, 32.0));
    assert!(picture.flatten_to_image().get_pixel(32, 32).0[3] < 20);

    picture.undo();
    assert_eq!(picture.flatten_to_image(), before);
}

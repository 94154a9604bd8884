use image::{Rgba, RgbaImage};

use paintcore::blend::BlendMode;
use paintcore::canvas::TiledTexture;
use paintcore::cli::describe;
use paintcore::io::{load_document, load_picture, save_document};
use paintcore::layer::Layer;
use paintcore::Picture;

fn filled(w: u32, h: u32, x1: u32, y1: u32, color: [u8; 4]) -> TiledTexture {
    let img = RgbaImage::from_fn(w, h, |x, y| if x < x1 && y < y1 { Rgba(color) } else { Rgba([0, 0, 0, 0]) });
    TiledTexture::from_rgba_image(&img)
}

/// Children are listed top-most first.
fn sample_picture() -> Picture {
    let (w, h) = (300, 40);
    let mut clipped = Layer::with_texture("Shading", filled(w, h, 300, 40, [0, 0, 255, 255]));
    clipped.clipping_group = true;
    let base = Layer::with_texture("Shape", filled(w, h, 20, 20, [255, 0, 0, 255]));

    let mut multiply = Layer::with_texture("Tint", filled(w, h, 280, 40, [128, 255, 255, 255]));
    multiply.blend_mode = BlendMode::Multiply;
    multiply.set_opacity(0.5);
    let mut hidden = Layer::with_texture("Hidden", filled(w, h, 300, 40, [0, 255, 0, 255]));
    hidden.visible = false;
    let group = Layer::new_group("Effects", vec![hidden]);

    let background = Layer::with_texture("Paper", filled(w, h, 300, 40, [255, 255, 255, 255]));
    let root = Layer::new_group("Root", vec![group, multiply, clipped, base, background]);
    Picture::from_root(w, h, root)
}

#[test]
fn clipping_run_is_masked_by_its_base() {
    let img = sample_picture().flatten_to_image();
    // Inside the base the clipped layer wins; outside it only paper and tint show.
    let inside = img.get_pixel(10, 10).0;
    assert_eq!((inside[0] < 5, inside[2] > 250), (true, true), "{:?}", inside);
    let outside = img.get_pixel(100, 30).0;
    assert!(outside[0] > 180 && outside[1] > 250 && outside[2] > 250, "{:?}", outside);
    assert_eq!(img.get_pixel(290, 30).0, [255, 255, 255, 255]);
}

#[test]
fn document_round_trip_preserves_tree_and_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    let picture = sample_picture();
    save_document(&picture, &path).unwrap();

    let loaded = load_document(&path).unwrap();
    assert_eq!((loaded.width(), loaded.height()), (300, 40));
    assert_eq!(describe(&loaded), describe(&picture));
    assert_eq!(loaded.flatten_to_image(), picture.flatten_to_image());

    let tint = loaded.layer_at(&[1]).unwrap();
    assert_eq!(tint.blend_mode, BlendMode::Multiply);
    assert!((tint.opacity() - 0.5).abs() < 1e-6);
    assert!(!loaded.layer_at(&[0, 0]).unwrap().visible);
    assert!(loaded.layer_at(&[2]).unwrap().clipping_group);

    // Same loader entry point as the CLI.
    assert_eq!(load_picture(&path).unwrap().flatten_to_image(), picture.flatten_to_image());
}

#[test]
fn corrupt_documents_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{\"format\": \"paintcore\", \"version\": 99}").unwrap();
    assert!(load_document(&path).is_err());
    std::fs::write(&path, "not json").unwrap();
    assert!(load_document(&path).is_err());
}

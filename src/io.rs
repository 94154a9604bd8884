use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageOutputFormat, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{Tile, TileKey, TiledTexture, TILE_SIZE};
use crate::error::{PaintError, Result};
use crate::gpu::composite::{premultiply, unpremultiply};
use crate::gpu::Texture;
use crate::layer::{Layer, LayerContent, LayerProps};
use crate::picture::Picture;

// ============================================================================
// DOCUMENT FORMAT
// ============================================================================

pub const FORMAT_NAME: &str = "paintcore";
pub const FORMAT_VERSION: u32 = 1;

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted documents.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a document, groups included.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct DocumentFile {
    format: String,
    version: u32,
    width: u32,
    height: u32,
    root: LayerData,
}

#[derive(Serialize, Deserialize)]
struct LayerData {
    #[serde(flatten)]
    props: LayerProps,
    content: ContentData,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentData {
    Image { image: TiledData },
    Group { children: Vec<LayerData> },
}

#[derive(Serialize, Deserialize)]
struct TiledData {
    tiles: Vec<TileData>,
}

/// One tile: grid coordinate plus a base64 16-bit RGBA PNG.
#[derive(Serialize, Deserialize)]
struct TileData {
    x: i32,
    y: i32,
    png: String,
}

fn invalid(msg: impl Into<String>) -> PaintError {
    PaintError::InvalidFormat(msg.into())
}

// ============================================================================
// TILE CODEC
// ============================================================================

/// Encode a tile as a 16-bit straight-alpha RGBA PNG.
pub fn encode_tile(tile: &Tile) -> Result<Vec<u8>> {
    // PNG samples are big-endian.
    let samples: Vec<u16> = tile
        .texture()
        .pixels()
        .iter()
        .flat_map(|p| unpremultiply(*p))
        .map(|c| ((c.clamp(0.0, 1.0) * 65535.0).round() as u16).to_be())
        .collect();

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, TILE_SIZE, TILE_SIZE);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Sixteen);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(bytemuck::cast_slice(&samples))?;
    writer.finish()?;
    Ok(out)
}

/// Decode a tile written by [`encode_tile`].
pub fn decode_tile(bytes: &[u8]) -> Result<Tile> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u16; reader.output_buffer_size().div_ceil(2)];
    let info = reader.next_frame(bytemuck::cast_slice_mut(&mut buf))?;

    if info.width != TILE_SIZE || info.height != TILE_SIZE {
        return Err(invalid(format!(
            "tile is {}x{}, expected {}x{}",
            info.width, info.height, TILE_SIZE, TILE_SIZE
        )));
    }
    if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Sixteen {
        return Err(invalid(format!("tile is {:?}/{:?}, expected 16-bit RGBA", info.color_type, info.bit_depth)));
    }

    let mut texture = Texture::new(TILE_SIZE, TILE_SIZE);
    for (px, raw) in texture.pixels_mut().iter_mut().zip(buf[..info.buffer_size() / 2].chunks_exact(4)) {
        let straight: [f32; 4] = std::array::from_fn(|c| u16::from_be(raw[c]) as f32 / 65535.0);
        *px = premultiply(straight);
    }
    Ok(Tile::from_texture(texture).unwrap_or_default())
}

fn encode_tiled(texture: &TiledTexture) -> Result<TiledData> {
    let tiles = texture
        .keys()
        .into_par_iter()
        .filter_map(|key| {
            let tile = texture.get(key)?;
            if tile.is_transparent() {
                return None;
            }
            Some(encode_tile(tile).map(|png| TileData { x: key.x, y: key.y, png: STANDARD.encode(png) }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TiledData { tiles })
}

fn decode_tiled(data: &TiledData) -> Result<TiledTexture> {
    let mut seen = HashSet::new();
    for t in &data.tiles {
        if !seen.insert((t.x, t.y)) {
            return Err(invalid(format!("duplicate tile ({}, {})", t.x, t.y)));
        }
    }
    let decoded = data
        .tiles
        .par_iter()
        .map(|t| -> Result<(TileKey, Tile)> {
            let bytes = STANDARD
                .decode(&t.png)
                .map_err(|e| invalid(format!("tile ({}, {}): {}", t.x, t.y, e)))?;
            Ok((TileKey::new(t.x, t.y), decode_tile(&bytes)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut texture = TiledTexture::new();
    for (key, tile) in decoded {
        texture.set(key, tile);
    }
    texture.prune_empty();
    Ok(texture)
}

// ============================================================================
// LAYER TREE ⇄ DOCUMENT
// ============================================================================

fn layer_to_data(layer: &Layer) -> Result<LayerData> {
    let content = match &layer.content {
        LayerContent::Image(texture) => ContentData::Image { image: encode_tiled(texture)? },
        LayerContent::Group(children) => ContentData::Group {
            children: children.iter().map(layer_to_data).collect::<Result<Vec<_>>>()?,
        },
    };
    Ok(LayerData { props: layer.props(), content })
}

fn layer_from_data(data: LayerData, count: &mut usize) -> Result<Layer> {
    *count += 1;
    if *count > MAX_LAYERS {
        return Err(invalid(format!("document exceeds the maximum of {} layers", MAX_LAYERS)));
    }
    let content = match data.content {
        ContentData::Image { image } => LayerContent::Image(decode_tiled(&image)?),
        ContentData::Group { children } => LayerContent::Group(
            children
                .into_iter()
                .map(|child| layer_from_data(child, count))
                .collect::<Result<Vec<_>>>()?,
        ),
    };
    let mut layer = Layer::new(data.props.name.clone(), content);
    layer.set_props(&data.props);
    Ok(layer)
}

/// Serialize the picture's layer tree.
pub fn document_to_json(picture: &Picture) -> Result<String> {
    let doc = DocumentFile {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
        width: picture.width(),
        height: picture.height(),
        root: layer_to_data(picture.root())?,
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Parse and validate a document.
pub fn document_from_json(text: &str) -> Result<Picture> {
    let doc: DocumentFile = serde_json::from_str(text)?;

    if doc.format != FORMAT_NAME {
        return Err(invalid(format!("unknown format '{}'", doc.format)));
    }
    if doc.version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported version {}", doc.version)));
    }
    if doc.width == 0 || doc.height == 0 {
        return Err(invalid("canvas dimensions cannot be zero"));
    }
    if doc.width > MAX_CANVAS_DIM || doc.height > MAX_CANVAS_DIM {
        return Err(invalid(format!(
            "canvas size {}x{} exceeds maximum allowed {}x{}",
            doc.width, doc.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if !matches!(doc.root.content, ContentData::Group { .. }) {
        return Err(invalid("root layer must be a group"));
    }

    let mut count = 0;
    let root = layer_from_data(doc.root, &mut count)?;
    log::info!("loaded {}x{} document with {} layers", doc.width, doc.height, count);
    Ok(Picture::from_root(doc.width, doc.height, root))
}

pub fn save_document(picture: &Picture, path: &Path) -> Result<()> {
    std::fs::write(path, document_to_json(picture)?)?;
    Ok(())
}

pub fn load_document(path: &Path) -> Result<Picture> {
    document_from_json(&std::fs::read_to_string(path)?)
}

// ============================================================================
// IMAGE CODEC
// ============================================================================

/// Decode any format the `image` crate was built with.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

/// Open a document (`.json`) or any raster image as a picture.
pub fn load_picture(path: &Path) -> Result<Picture> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if ext == "json" {
        return load_document(path);
    }
    let image = decode_image(&std::fs::read(path)?)?;
    if image.width() > MAX_CANVAS_DIM || image.height() > MAX_CANVAS_DIM {
        return Err(invalid(format!("image {}x{} is too large", image.width(), image.height())));
    }
    Ok(Picture::from_rgba_image(&image))
}

/// Write the flattened picture as an 8-bit PNG.
pub fn save_png(picture: &Picture, path: &Path) -> Result<()> {
    std::fs::write(path, encode_png(&picture.flatten_to_image())?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use image::Rgba;

    #[test]
    fn tile_codec_keeps_16_bit_precision() {
        let mut texture = Texture::new(TILE_SIZE, TILE_SIZE);
        texture.set_pixel(3, 4, premultiply([0.25, 0.5, 0.75, 0.5]));
        texture.set_pixel(200, 100, [1.0, 1.0, 1.0, 1.0]);
        let tile = Tile::from_texture(texture).unwrap();

        let decoded = decode_tile(&encode_tile(&tile).unwrap()).unwrap();
        for (a, b) in decoded.pixel(3, 4).iter().zip(tile.pixel(3, 4)) {
            assert!((a - b).abs() < 1e-4);
        }
        assert_eq!(decoded.pixel(200, 100), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(decoded.pixel(0, 0), [0.0; 4]);
    }

    #[test]
    fn tile_samples_are_big_endian() {
        let mut texture = Texture::new(TILE_SIZE, TILE_SIZE);
        texture.set_pixel(1, 0, [258.0 / 65535.0, 0.0, 0.0, 1.0]);
        let bytes = encode_tile(&Tile::from_texture(texture).unwrap()).unwrap();

        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::IDENTITY);
        let mut reader = decoder.read_info().unwrap();
        let mut raw = vec![0u8; reader.output_buffer_size()];
        reader.next_frame(&mut raw).unwrap();
        assert_eq!(&raw[8..10], &[0x01, 0x02]);
        assert_eq!(&raw[14..16], &[0xff, 0xff]);
    }

    #[test]
    fn wrong_tile_size_is_rejected() {
        let png = encode_png(&RgbaImage::new(4, 4)).unwrap();
        assert!(matches!(decode_tile(&png), Err(PaintError::InvalidFormat(_))));
    }

    #[test]
    fn document_json_shape() {
        let mut img = RgbaImage::new(300, 20);
        img.put_pixel(290, 5, Rgba([10, 20, 30, 255]));
        let mut picture = Picture::from_rgba_image(&img);
        let group = picture.add_group("Inks").unwrap();
        let props = LayerProps { blend_mode: BlendMode::Multiply, clipping_group: true, ..picture.layer(group).unwrap().props() };
        picture.set_layer_props(group, &props).unwrap();

        let value: serde_json::Value = serde_json::from_str(&document_to_json(&picture).unwrap()).unwrap();
        assert_eq!(value["format"], "paintcore");
        assert_eq!(value["version"], 1);
        let children = value["root"]["content"]["children"].as_array().unwrap();
        assert_eq!(children[0]["blendMode"], "multiply");
        assert_eq!(children[0]["clippingGroup"], true);
        assert_eq!(children[0]["content"]["type"], "group");
        let tiles = children[1]["content"]["image"]["tiles"].as_array().unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0]["x"], 1);
        assert_eq!(tiles[0]["y"], 0);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let doc = |w: u32, fmt: &str| {
            format!(
                r#"{{"format":"{fmt}","version":1,"width":{w},"height":10,"root":{{"name":"Root","opacity":1.0,"blendMode":"normal","visible":true,"clippingGroup":false,"preserveOpacity":false,"content":{{"type":"group","children":[]}}}}}}"#
            )
        };
        assert!(document_from_json(&doc(10, "paintcore")).is_ok());
        assert!(matches!(document_from_json(&doc(0, "paintcore")), Err(PaintError::InvalidFormat(_))));
        assert!(matches!(document_from_json(&doc(40_000, "paintcore")), Err(PaintError::InvalidFormat(_))));
        assert!(matches!(document_from_json(&doc(10, "pfe")), Err(PaintError::InvalidFormat(_))));
        assert!(matches!(document_from_json("{"), Err(PaintError::Json(_))));
    }

    #[test]
    fn too_many_layers_are_rejected() {
        let children = vec![Layer::new_image("x"); MAX_LAYERS + 1];
        let picture = Picture::from_root(8, 8, Layer::new_group("Root", children));
        let json = document_to_json(&picture).unwrap();
        assert!(matches!(document_from_json(&json), Err(PaintError::InvalidFormat(_))));
    }
}

// ============================================================================
// paintcore CLI: headless document processing via subcommands
// ============================================================================
//
// Usage examples:
//   paintcore import photo.png -o photo.json
//   paintcore flatten photo.json -o flat.png
//   paintcore flatten photo.json -o thumb.png --max-edge 128
//   paintcore info photo.json
//   paintcore stroke photo.json --from 10,10 --to 200,120 --width 24 --color 1,0,0,1 -o photo.json
//
// Everything runs synchronously on the calling thread, apart from the rayon
// row loops inside the raster paths.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::brush::{BrushPreset, PenPreset, StrokeInterpolator, WatercolorPreset, Waypoint};
use crate::config::CoreConfig;
use crate::error::{PaintError, Result};
use crate::geometry::Vec2;
use crate::gpu::RedrawScheduler;
use crate::io::{encode_png, load_picture, save_document, save_png};
use crate::layer::Layer;
use crate::picture::Picture;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// paintcore headless painter.
#[derive(Parser, Debug)]
#[command(
    name = "paintcore",
    about = "Tiled layer documents from the command line",
    long_about = "Import raster images into layered documents, flatten them back to\n\
                  PNG, inspect their layer tree and paint simple strokes.\n\n\
                  Example:\n  \
                  paintcore import photo.png -o photo.json\n  \
                  paintcore stroke photo.json --from 10,10 --to 200,120 -o photo.json"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Brush presets and history limits (JSON). Defaults are used when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session log location. Defaults to the platform data directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log debug output and per-command timing.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Turn a raster image into a single-layer document.
    Import {
        input: PathBuf,
        #[arg(short, long, value_name = "DOC.json")]
        output: PathBuf,
    },
    /// Composite all visible layers into a PNG.
    Flatten {
        input: PathBuf,
        #[arg(short, long, value_name = "OUT.png")]
        output: PathBuf,
        /// Downscale so the longer edge fits this many pixels.
        #[arg(long, value_name = "PX")]
        max_edge: Option<u32>,
    },
    /// Print the size and layer tree of a document.
    Info { input: PathBuf },
    /// Paint one straight stroke onto the top-most image layer.
    Stroke(StrokeArgs),
}

#[derive(Args, Debug)]
pub struct StrokeArgs {
    pub input: PathBuf,

    #[arg(long, value_parser = parse_point, value_name = "X,Y")]
    pub from: Vec2,

    #[arg(long, value_parser = parse_point, value_name = "X,Y")]
    pub to: Vec2,

    #[arg(long, value_enum, default_value_t = Engine::Pen)]
    pub engine: Engine,

    /// Configured preset by title; overrides `--engine`.
    #[arg(long, value_name = "TITLE")]
    pub preset: Option<String>,

    /// Brush diameter; the preset's width when omitted.
    #[arg(long)]
    pub width: Option<f32>,

    /// Straight-alpha color, components in 0..=1. Alpha defaults to 1.
    #[arg(long, value_parser = parse_color, default_value = "0,0,0,1", value_name = "R,G,B[,A]")]
    pub color: [f32; 4],

    #[arg(long, default_value_t = 1.0)]
    pub pressure: f32,

    /// `.png` writes the flattened result, anything else a document.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    Pen,
    Eraser,
    Watercolor,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match execute(&args) {
        Ok(()) => {
            log::debug!("done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

pub fn execute(args: &CliArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => CoreConfig::load(path),
        None => CoreConfig::default(),
    };
    match &args.command {
        CliCommand::Import { input, output } => {
            let picture = load_picture(input)?;
            save_document(&picture, output)?;
            log::info!("imported {} ({}x{})", input.display(), picture.width(), picture.height());
        }
        CliCommand::Flatten { input, output, max_edge } => {
            let picture = load_picture(input)?;
            match max_edge {
                Some(edge) => std::fs::write(output, encode_png(&picture.thumbnail(*edge))?)?,
                None => save_png(&picture, output)?,
            }
            log::info!("flattened {} -> {}", input.display(), output.display());
        }
        CliCommand::Info { input } => {
            let picture = load_picture(input)?;
            print!("{}", describe(&picture));
        }
        CliCommand::Stroke(stroke_args) => stroke(stroke_args, &config)?,
    }
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

fn stroke(args: &StrokeArgs, config: &CoreConfig) -> Result<()> {
    let mut picture = load_picture(&args.input)?;
    let mut preset = match &args.preset {
        Some(title) => config
            .preset(title)
            .cloned()
            .ok_or_else(|| PaintError::InvalidFormat(format!("no brush preset named '{}'", title)))?,
        None => preset_for(config, args.engine),
    };
    if let Some(width) = args.width {
        preset = preset.with_width(width);
    }

    let mut renderer = preset.renderer(args.color);
    let mut scheduler = RedrawScheduler::new();
    let mut interpolator = StrokeInterpolator::with_stabilizing(renderer.stabilizing_level());

    renderer.start(&picture)?;
    let first = interpolator.begin(Waypoint::new(args.from, args.pressure), |w| renderer.spacing(w));
    renderer.next_waypoints(&picture, &first, &mut scheduler)?;
    let rest = interpolator.add(Waypoint::new(args.to, args.pressure), |w| renderer.spacing(w));
    renderer.next_waypoints(&picture, &rest, &mut scheduler)?;
    let tail = interpolator.finish(|w| renderer.spacing(w));
    renderer.next_waypoints(&picture, &tail, &mut scheduler)?;

    match renderer.end(&mut picture)? {
        Some(rect) => log::info!("{}: painted {} dabs over {:?}", preset.title(), first.len() + rest.len() + tail.len(), rect),
        None => log::warn!("{}: stroke left the picture unchanged", preset.title()),
    }
    save_output(&picture, &args.output)
}

/// First configured preset of the requested engine, or the built-in one.
fn preset_for(config: &CoreConfig, engine: Engine) -> BrushPreset {
    let found = config.brush_presets.iter().find(|p| match (engine, p) {
        (Engine::Pen, BrushPreset::Pen(pen)) => !pen.eraser,
        (Engine::Eraser, BrushPreset::Pen(pen)) => pen.eraser,
        (Engine::Watercolor, BrushPreset::Watercolor(_)) => true,
        _ => false,
    });
    match (found, engine) {
        (Some(preset), _) => preset.clone(),
        (None, Engine::Pen) => BrushPreset::Pen(PenPreset::default()),
        (None, Engine::Eraser) => BrushPreset::Pen(PenPreset { title: "Eraser".to_string(), eraser: true, ..PenPreset::default() }),
        (None, Engine::Watercolor) => BrushPreset::Watercolor(WatercolorPreset::default()),
    }
}

fn save_output(picture: &Picture, path: &Path) -> Result<()> {
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_png { save_png(picture, path) } else { save_document(picture, path) }
}

/// Human-readable summary: size, then one indented line per layer, top first.
pub fn describe(picture: &Picture) -> String {
    let mut out = format!("{}x{}, {} layers\n", picture.width(), picture.height(), picture.root().count() - 1);
    for child in picture.root().children() {
        describe_layer(child, 1, &mut out);
    }
    out
}

fn describe_layer(layer: &Layer, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let flags = format!(
        "{}{}{}",
        if layer.visible { "" } else { " hidden" },
        if layer.clipping_group { " clip" } else { "" },
        if layer.preserve_opacity { " locked-alpha" } else { "" },
    );
    match layer.texture() {
        Some(texture) => out.push_str(&format!(
            "{}- {} [{:?}, {:.0}%{}] {} tiles\n",
            indent,
            layer.name,
            layer.blend_mode,
            layer.opacity() * 100.0,
            flags,
            texture.len()
        )),
        None => {
            out.push_str(&format!(
                "{}+ {} [{:?}, {:.0}%{}]\n",
                indent,
                layer.name,
                layer.blend_mode,
                layer.opacity() * 100.0,
                flags
            ));
            for child in layer.children() {
                describe_layer(child, depth + 1, out);
            }
        }
    }
}

// ============================================================================
// Value parsers
// ============================================================================

fn parse_floats(s: &str) -> std::result::Result<Vec<f32>, String> {
    s.split(',')
        .map(|part| {
            let v: f32 = part.trim().parse().map_err(|_| format!("'{}' is not a number", part.trim()))?;
            if v.is_finite() { Ok(v) } else { Err(format!("'{}' is not finite", part.trim())) }
        })
        .collect()
}

fn parse_point(s: &str) -> std::result::Result<Vec2, String> {
    match parse_floats(s)?.as_slice() {
        [x, y] => Ok(Vec2::new(*x, *y)),
        _ => Err(format!("expected X,Y but got '{}'", s)),
    }
}

fn parse_color(s: &str) -> std::result::Result<[f32; 4], String> {
    let color = match parse_floats(s)?.as_slice() {
        [r, g, b] => [*r, *g, *b, 1.0],
        [r, g, b, a] => [*r, *g, *b, *a],
        _ => return Err(format!("expected R,G,B or R,G,B,A but got '{}'", s)),
    };
    if color.iter().any(|c| !(0.0..=1.0).contains(c)) {
        return Err(format!("color components must be in 0..=1, got '{}'", s));
    }
    Ok(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn args(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn value_parsers() {
        assert_eq!(parse_point("3, 4.5"), Ok(Vec2::new(3.0, 4.5)));
        assert!(parse_point("3").is_err());
        assert!(parse_point("nan,1").is_err());
        assert_eq!(parse_color("1,0,0"), Ok([1.0, 0.0, 0.0, 1.0]));
        assert!(parse_color("2,0,0,1").is_err());
    }

    #[test]
    fn stroke_arguments_parse() {
        let parsed = args(&[
            "paintcore", "stroke", "in.json", "--from", "1,2", "--to", "30,40", "--engine", "watercolor", "-o",
            "out.json",
        ]);
        let CliCommand::Stroke(stroke) = parsed.command else {
            panic!("expected stroke");
        };
        assert_eq!(stroke.engine, Engine::Watercolor);
        assert_eq!(stroke.to, Vec2::new(30.0, 40.0));
        assert_eq!(stroke.color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(stroke.preset, None);
        assert!(CliArgs::try_parse_from(["paintcore", "stroke", "in.json", "-o", "x"]).is_err());
    }

    #[test]
    fn import_stroke_flatten() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("in.png");
        let doc = dir.path().join("doc.json");
        let out = dir.path().join("out.png");
        RgbaImage::from_pixel(64, 48, Rgba([255, 255, 255, 255])).save(&png).unwrap();

        let s = |p: &Path| p.to_str().unwrap().to_string();
        execute(&args(&["paintcore", "import", &s(&png), "-o", &s(&doc)])).unwrap();
        execute(&args(&[
            "paintcore", "stroke", &s(&doc), "--from", "8,24", "--to", "56,24", "--width", "8", "--color", "0,0,1",
            "-o", &s(&doc),
        ]))
        .unwrap();
        execute(&args(&["paintcore", "flatten", &s(&doc), "-o", &s(&out)])).unwrap();

        let flat = image::open(&out).unwrap().to_rgba8();
        assert_eq!(flat.dimensions(), (64, 48));
        let center = flat.get_pixel(32, 24).0;
        assert!(center[2] > 200 && center[0] < 60, "{:?}", center);
        assert_eq!(flat.get_pixel(32, 4).0, [255, 255, 255, 255]);
    }

    #[test]
    fn stroke_with_named_preset() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("in.png");
        let out = dir.path().join("out.png");
        RgbaImage::from_pixel(40, 40, Rgba([255, 0, 0, 255])).save(&png).unwrap();
        let s = |p: &Path| p.to_str().unwrap().to_string();

        let stroke = |preset: &str| {
            execute(&args(&[
                "paintcore", "stroke", &s(&png), "--from", "5,20", "--to", "35,20", "--preset", preset, "-o", &s(&out),
            ]))
        };
        assert!(matches!(stroke("Smudge"), Err(PaintError::InvalidFormat(_))));
        stroke("eraser").unwrap();
        let flat = image::open(&out).unwrap().to_rgba8();
        assert!(flat.get_pixel(20, 20).0[3] < 20);
        assert_eq!(flat.get_pixel(20, 2).0, [255, 0, 0, 255]);
    }

    #[test]
    fn describe_lists_layers_top_first() {
        let mut picture = Picture::new(16, 16);
        picture.add_layer("Ink").unwrap();
        let text = describe(&picture);
        assert!(text.starts_with("16x16, 2 layers\n"));
        let ink = text.find("Ink").unwrap();
        let base = text.find("Layer 1").unwrap();
        assert!(ink < base);
    }
}

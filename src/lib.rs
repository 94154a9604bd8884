//! Raster painting core: sparse tiled layers, a recursive blend-mode
//! compositor, dab brushes and undoable picture edits.

pub mod blend;
pub mod brush;
pub mod canvas;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod history;
pub mod io;
pub mod layer;
pub mod logger;
pub mod picture;
pub mod renderer;
pub mod selection;

pub use error::{PaintError, Result};
pub use picture::Picture;

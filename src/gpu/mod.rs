// ============================================================================
// GPU MODULE: software render device for the paint core
// ============================================================================
//
// Architecture:
//   texture.rs    premultiplied f32 RGBA render target, mips, sampling
//   composite.rs  Porter-Duff operators, fragment and textured-quad draws
//   pool.rs       scratch texture recycling pool
//   scheduler.rs  frame-coalescing redraw scheduler
//
// Draws are synchronous: a draw call returns once every pixel is written, so
// submission order is execution order for every target.
// ============================================================================

pub mod composite;
pub mod pool;
pub mod scheduler;
pub mod texture;

pub use composite::{CompositeOp, DrawParams, Filter, draw_fragments, draw_texture};
pub use pool::TexturePool;
pub use scheduler::RedrawScheduler;
pub use texture::{Pixel, TRANSPARENT, Texture, bilinear};

//! Temporal post-processing engine for presented EGL surfaces.
//!
//! Every frame handed to [`RenderEngine::render_frame`] goes through the
//! same fixed pipeline:
//!
//! ```text
//!   framebuffer 0 ──blit──▶ raw (internal size)
//!                             │
//!          history[prev] ─────┤ accumulate (motion-adaptive blend, anchor mask)
//!                             ▼
//!                        history[curr] ──output──▶ framebuffer 0
//!                                        (CAS sharpen, vibrance, ACES)
//! ```
//!
//! The engine is generic over a [`gpu::Gpu`] backend: [`gpu::GlowGpu`] drives
//! a real GLES context, [`gpu::SoftwareGpu`] runs the same passes on the CPU
//! using the kernels in [`shading`].

pub mod compile;
pub mod gpu;
pub mod shading;
mod types;

pub use gpu::{EngineStats, FrameOutcome, RenderEngine, RenderError, SkipReason};
pub use types::{
    AnchorParams, BlendParams, EffectParams, Extent, HistoryClear, OutputParams, OutputStyle,
};

//! GPU orchestration for the post-process pipeline.
//!
//! - `backend` defines the [`Gpu`] trait: the handful of raster operations
//!   the engine needs, plus the explicit [`PassInvocation`] binding record.
//! - `gles` implements it on OpenGL ES 3 through `glow`.
//! - `software` implements it on the CPU for headless runs and tests.
//! - `targets` owns the raw and ping-pong history targets and reallocates
//!   them as a unit on every surface size change.
//! - `pipeline` builds the two pass programs and keeps the previous pair when
//!   a rebuild fails.
//! - `timeline` feeds `u_time` to time-varying output styles.
//! - `state` glues everything together as [`RenderEngine`].

mod backend;
#[cfg(feature = "glow")]
mod gles;
mod geometry;
mod pipeline;
mod software;
mod state;
mod targets;
mod timeline;

pub use backend::{ColorTarget, Gpu, GpuError, PassInvocation, TargetOf};
#[cfg(feature = "glow")]
pub use gles::{GlowGpu, GlowQuad};
pub use geometry::{QuadVertex, QUAD_INDICES, QUAD_VERTICES};
pub use pipeline::{rebuild_programs, PassPrograms};
pub use software::{
    DrawRecord, SoftFramebuffer, SoftGeometry, SoftProgram, SoftTexture, SoftwareCounters,
    SoftwareGpu,
};
pub use state::{EngineStats, FrameOutcome, RenderEngine, RenderError, SkipReason};
pub use targets::{FrameBufferSet, FrameTargets, PingIndex, Resize};
pub use timeline::EffectClock;

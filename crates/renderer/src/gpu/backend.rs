use std::fmt;

use crate::compile::ProgramDesc;
use crate::types::Extent;

/// Failures reported by a [`Gpu`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("failed to create {object}: {reason}")]
    Create { object: &'static str, reason: String },
    #[error("framebuffer incomplete (status 0x{status:x})")]
    IncompleteFramebuffer { status: u32 },
    #[error("GPU ran out of memory while allocating {object}")]
    OutOfMemory { object: &'static str },
    #[error("{label} shader failed to compile: {log}")]
    Compile { label: &'static str, log: String },
    #[error("{label} program failed to link: {log}")]
    Link { label: &'static str, log: String },
}

/// A colour texture together with the framebuffer it is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorTarget<T, F> {
    pub texture: T,
    pub framebuffer: F,
    pub extent: Extent,
}

/// Colour target type produced by backend `G`.
pub type TargetOf<G> = ColorTarget<<G as Gpu>::Texture, <G as Gpu>::Framebuffer>;

/// Binding state for one fullscreen draw.
///
/// Everything a pass touches is listed here; backends bind exactly these
/// objects and nothing carries over implicitly between passes.
pub struct PassInvocation<'a, G: Gpu + ?Sized> {
    pub program: G::Program,
    /// `None` draws into the default framebuffer (the presented surface).
    pub target: Option<G::Framebuffer>,
    pub viewport: Extent,
    /// Textures bound to units `0..inputs.len()` in order.
    pub inputs: &'a [G::Texture],
    pub geometry: G::Geometry,
    pub uniforms: &'a [(&'static str, f32)],
}

impl<G: Gpu + ?Sized> fmt::Debug for PassInvocation<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassInvocation")
            .field("program", &self.program)
            .field("target", &self.target)
            .field("viewport", &self.viewport)
            .field("inputs", &self.inputs)
            .field("uniforms", &self.uniforms)
            .finish()
    }
}

/// The slice of an immediate-mode raster API the engine relies on.
///
/// Implementations issue commands on whatever context is current for the
/// calling thread; the engine never calls a backend from more than one thread.
pub trait Gpu {
    type Texture: Copy + fmt::Debug + PartialEq;
    type Framebuffer: Copy + fmt::Debug + PartialEq;
    type Program: Copy + fmt::Debug + PartialEq;
    type Geometry: Copy + fmt::Debug + PartialEq;

    /// Allocates an RGBA8, linearly filtered, edge-clamped texture and a
    /// framebuffer with it as colour attachment 0. Must verify completeness.
    fn create_color_target(&mut self, extent: Extent) -> Result<TargetOf<Self>, GpuError>;

    fn delete_color_target(&mut self, target: TargetOf<Self>);

    fn clear_color_target(&mut self, target: &TargetOf<Self>, rgba: [f32; 4]);

    /// Compiles and links `desc`, then points each sampler at its unit.
    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program, GpuError>;

    fn delete_program(&mut self, program: Self::Program);

    /// Uploads the shared fullscreen quad.
    fn create_fullscreen_quad(&mut self) -> Result<Self::Geometry, GpuError>;

    fn delete_fullscreen_quad(&mut self, geometry: Self::Geometry);

    /// Disables scissor, depth test and blending so passes overwrite every pixel.
    fn reset_raster_state(&mut self);

    /// Linear-filtered copy of the whole default framebuffer into `target`.
    fn blit_surface_to(&mut self, surface: Extent, target: &TargetOf<Self>);

    fn draw_pass(&mut self, pass: &PassInvocation<'_, Self>);
}

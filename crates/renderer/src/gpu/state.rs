use std::time::Instant;

use tracing::{debug, info, warn};

use crate::compile::TIME_UNIFORM;
use crate::types::{EffectParams, Extent};

use super::backend::{Gpu, GpuError, PassInvocation};
use super::pipeline::{rebuild_programs, PassPrograms};
use super::targets::{FrameBufferSet, FrameTargets, PingIndex};
use super::timeline::EffectClock;

/// Why [`RenderEngine::initialize`] could not make the effect ready.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("no valid shader programs are available")]
    NoPrograms,
    #[error("failed to create fullscreen quad: {0}")]
    Geometry(#[source] GpuError),
    #[error("failed to allocate frame targets for {surface}: {source}")]
    Targets {
        surface: Extent,
        #[source]
        source: GpuError,
    },
}

/// Result of one [`RenderEngine::render_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The effect replaced the contents of the default framebuffer.
    Rendered {
        /// History slot written by the accumulation pass.
        history_slot: usize,
        /// Resources were (re)created before this frame.
        reinitialized: bool,
    },
    /// The default framebuffer was left untouched.
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The surface reported a zero dimension.
    EmptySurface,
    /// The last initialisation for this surface size failed.
    Inactive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub reinitializations: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Readiness {
    Uninitialized,
    Ready,
    Failed,
}

/// Owns every GPU object of the effect and runs the per-frame pipeline:
/// downscale copy, temporal accumulation, then sharpen/tonemap into the
/// default framebuffer.
pub struct RenderEngine<G: Gpu> {
    gpu: G,
    params: EffectParams,
    programs: Option<PassPrograms<G::Program>>,
    geometry: Option<G::Geometry>,
    buffers: FrameBufferSet<G>,
    ping: PingIndex,
    surface: Option<Extent>,
    readiness: Readiness,
    clock: EffectClock,
    stats: EngineStats,
}

impl<G: Gpu> RenderEngine<G> {
    /// Creates an engine without touching the GPU; resources are created on
    /// the first frame.
    pub fn new(gpu: G, params: EffectParams) -> Self {
        Self {
            gpu,
            params,
            programs: None,
            geometry: None,
            buffers: FrameBufferSet::new(),
            ping: PingIndex::default(),
            surface: None,
            readiness: Readiness::Uninitialized,
            clock: EffectClock::new(Instant::now()),
            stats: EngineStats::default(),
        }
    }

    pub fn render_frame(&mut self, surface: Extent) -> FrameOutcome {
        self.render_frame_at(surface, Instant::now())
    }

    /// Runs the effect for one presented frame of size `surface`.
    pub fn render_frame_at(&mut self, surface: Extent, now: Instant) -> FrameOutcome {
        if surface.width == 0 || surface.height == 0 {
            return self.skip(SkipReason::EmptySurface);
        }

        let mut reinitialized = false;
        if self.surface != Some(surface) || self.readiness == Readiness::Uninitialized {
            reinitialized = true;
            if let Err(err) = self.initialize(surface) {
                warn!(%surface, error = %err, "effect disabled until the surface size changes");
            }
        }

        if self.readiness != Readiness::Ready {
            return self.skip(SkipReason::Inactive);
        }
        let (Some(programs), Some(geometry), Some(targets)) =
            (self.programs, self.geometry, self.buffers.targets())
        else {
            self.stats.frames_skipped += 1;
            return FrameOutcome::Skipped(SkipReason::Inactive);
        };

        self.gpu.reset_raster_state();
        self.gpu.blit_surface_to(surface, &targets.raw);

        let current = self.ping.current();
        let previous = self.ping.previous();
        self.gpu.draw_pass(&PassInvocation {
            program: programs.accumulate,
            target: Some(targets.history[current].framebuffer),
            viewport: targets.internal(),
            inputs: &[targets.raw.texture, targets.history[previous].texture],
            geometry,
            uniforms: &[],
        });

        let time = [(TIME_UNIFORM, self.clock.seconds(now))];
        let uniforms: &[(&'static str, f32)] = if programs.output_reads_time {
            &time
        } else {
            &[]
        };
        self.gpu.draw_pass(&PassInvocation {
            program: programs.output,
            target: None,
            viewport: surface,
            inputs: &[targets.history[current].texture],
            geometry,
            uniforms,
        });

        self.ping.flip();
        self.stats.frames_rendered += 1;
        FrameOutcome::Rendered {
            history_slot: current,
            reinitialized,
        }
    }

    /// Releases everything and recreates programs, quad and targets for
    /// `surface`.
    ///
    /// On failure the engine stays inactive for this surface size; the next
    /// size change retries.
    pub fn initialize(&mut self, surface: Extent) -> Result<(), RenderError> {
        self.surface = Some(surface);
        self.ping.reset();
        self.readiness = Readiness::Failed;
        self.stats.reinitializations += 1;

        self.buffers.release(&mut self.gpu);
        if let Some(geometry) = self.geometry.take() {
            self.gpu.delete_fullscreen_quad(geometry);
        }

        if !rebuild_programs(&mut self.gpu, &mut self.programs, &self.params) {
            return Err(RenderError::NoPrograms);
        }

        let geometry = self
            .gpu
            .create_fullscreen_quad()
            .map_err(RenderError::Geometry)?;
        self.geometry = Some(geometry);

        self.buffers
            .ensure_size(&mut self.gpu, surface, &self.params)
            .map_err(|source| RenderError::Targets { surface, source })?;

        self.readiness = Readiness::Ready;
        info!(
            %surface,
            internal = %self.params.internal_extent(surface),
            "post-process resources ready"
        );
        Ok(())
    }

    /// Deletes every GPU object; the next frame starts from scratch.
    pub fn release(&mut self) {
        self.buffers.release(&mut self.gpu);
        if let Some(geometry) = self.geometry.take() {
            self.gpu.delete_fullscreen_quad(geometry);
        }
        if let Some(programs) = self.programs.take() {
            programs.release(&mut self.gpu);
        }
        self.surface = None;
        self.readiness = Readiness::Uninitialized;
        debug!("post-process resources released");
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        self.stats.frames_skipped += 1;
        FrameOutcome::Skipped(reason)
    }

    pub fn is_active(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    pub fn ping(&self) -> PingIndex {
        self.ping
    }

    /// Surface size the current resources were built for.
    pub fn surface(&self) -> Option<Extent> {
        self.surface
    }

    pub fn internal_extent(&self) -> Option<Extent> {
        self.buffers.targets().map(FrameTargets::internal)
    }

    pub fn frame_targets(&self) -> Option<&FrameTargets<G>> {
        self.buffers.targets()
    }

    /// Number of successful target allocation cycles.
    pub fn allocations(&self) -> u64 {
        self.buffers.allocations()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }
}

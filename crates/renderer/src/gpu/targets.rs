use tracing::debug;

use crate::types::{EffectParams, Extent};

use super::backend::{Gpu, GpuError, TargetOf};

/// Which history slot is written this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PingIndex {
    current: usize,
}

impl PingIndex {
    pub fn current(self) -> usize {
        self.current
    }

    pub fn previous(self) -> usize {
        1 - self.current
    }

    pub fn flip(&mut self) {
        self.current = self.previous();
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

/// The three offscreen targets that live at internal resolution.
pub struct FrameTargets<G: Gpu> {
    pub raw: TargetOf<G>,
    pub history: [TargetOf<G>; 2],
    surface: Extent,
    internal: Extent,
}

impl<G: Gpu> FrameTargets<G> {
    /// Allocates `raw` and both history slots, all or nothing.
    fn allocate(gpu: &mut G, surface: Extent, params: &EffectParams) -> Result<Self, GpuError> {
        let internal = params.internal_extent(surface);
        let mut created: Vec<TargetOf<G>> = Vec::with_capacity(3);
        for _ in 0..3 {
            match gpu.create_color_target(internal) {
                Ok(target) => created.push(target),
                Err(err) => {
                    for target in created {
                        gpu.delete_color_target(target);
                    }
                    return Err(err);
                }
            }
        }

        let (raw, history) = (created[0], [created[1], created[2]]);
        let clear = params.history_clear.rgba();
        for slot in &history {
            gpu.clear_color_target(slot, clear);
        }

        debug!(%surface, %internal, "allocated frame targets");
        Ok(Self {
            raw,
            history,
            surface,
            internal,
        })
    }

    fn release(self, gpu: &mut G) {
        gpu.delete_color_target(self.raw);
        for slot in self.history {
            gpu.delete_color_target(slot);
        }
    }

    pub fn surface(&self) -> Extent {
        self.surface
    }

    pub fn internal(&self) -> Extent {
        self.internal
    }
}

/// Whether [`FrameBufferSet::ensure_size`] had to touch the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resize {
    Unchanged,
    Reallocated,
}

/// Owner of the raw and history targets; recreates them as a unit.
pub struct FrameBufferSet<G: Gpu> {
    targets: Option<FrameTargets<G>>,
    allocations: u64,
}

impl<G: Gpu> Default for FrameBufferSet<G> {
    fn default() -> Self {
        Self {
            targets: None,
            allocations: 0,
        }
    }
}

impl<G: Gpu> FrameBufferSet<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure targets exist for `surface`, reallocating on any size change.
    ///
    /// Existing targets are released before the new ones are created, so a
    /// failed allocation leaves the set empty.
    pub fn ensure_size(
        &mut self,
        gpu: &mut G,
        surface: Extent,
        params: &EffectParams,
    ) -> Result<Resize, GpuError> {
        if self
            .targets
            .as_ref()
            .is_some_and(|targets| targets.surface == surface)
        {
            return Ok(Resize::Unchanged);
        }

        self.release(gpu);
        let targets = FrameTargets::allocate(gpu, surface, params)?;
        self.targets = Some(targets);
        self.allocations += 1;
        Ok(Resize::Reallocated)
    }

    pub fn release(&mut self, gpu: &mut G) {
        if let Some(targets) = self.targets.take() {
            debug!(surface = %targets.surface, "releasing frame targets");
            targets.release(gpu);
        }
    }

    pub fn targets(&self) -> Option<&FrameTargets<G>> {
        self.targets.as_ref()
    }

    /// Number of successful allocation cycles since creation.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;

    #[test]
    fn ping_alternates_and_resets() {
        let mut ping = PingIndex::default();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(ping.current());
            assert_ne!(ping.current(), ping.previous());
            ping.flip();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        ping.reset();
        assert_eq!(ping.current(), 0);
    }

    #[test]
    fn ensure_size_only_reallocates_on_change() {
        let mut gpu = SoftwareGpu::new(Extent::new(640, 360));
        let params = EffectParams::default();
        let mut set = FrameBufferSet::new();

        let first = set.ensure_size(&mut gpu, Extent::new(640, 360), &params);
        assert_eq!(first, Ok(Resize::Reallocated));
        let again = set.ensure_size(&mut gpu, Extent::new(640, 360), &params);
        assert_eq!(again, Ok(Resize::Unchanged));
        assert_eq!(gpu.counters().targets_created, 3);

        let resized = set.ensure_size(&mut gpu, Extent::new(800, 600), &params);
        assert_eq!(resized, Ok(Resize::Reallocated));
        assert_eq!(gpu.counters().targets_created, 6);
        assert_eq!(gpu.live_targets(), 3);
        assert_eq!(set.allocations(), 2);
        let targets = set.targets().expect("targets");
        assert_eq!(targets.internal(), Extent::new(400, 300));
        assert_eq!(targets.raw.extent, Extent::new(400, 300));
    }

    #[test]
    fn history_slots_start_cleared() {
        let mut gpu = SoftwareGpu::new(Extent::new(200, 200));
        let mut set = FrameBufferSet::new();
        let mut params = EffectParams::default();
        params.history_clear = crate::types::HistoryClear::Transparent;
        set.ensure_size(&mut gpu, Extent::new(200, 200), &params)
            .expect("allocate");

        let targets = set.targets().expect("targets");
        for slot in &targets.history {
            let image = gpu.texture_image(slot.texture).expect("history image");
            assert!(image.pixels().all(|pixel| pixel.0 == [0, 0, 0, 0]));
        }
    }

    #[test]
    fn partial_allocation_failure_leaves_nothing_behind() {
        let mut gpu = SoftwareGpu::new(Extent::new(400, 400));
        gpu.set_target_budget(Some(2));
        let mut set = FrameBufferSet::new();
        let result = set.ensure_size(&mut gpu, Extent::new(400, 400), &EffectParams::default());
        assert!(matches!(result, Err(GpuError::OutOfMemory { .. })));
        assert!(set.targets().is_none());
        assert_eq!(gpu.live_targets(), 0);
    }
}

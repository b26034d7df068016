use tracing::{debug, warn};

use crate::compile::{accumulate_program, output_program};
use crate::types::EffectParams;

use super::backend::{Gpu, GpuError};

/// The linked accumulation and output programs for one parameter set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassPrograms<P> {
    pub accumulate: P,
    pub output: P,
    /// Whether `output` reads the `u_time` uniform.
    pub output_reads_time: bool,
}

impl<P: Copy> PassPrograms<P> {
    /// Builds both programs; on failure nothing is left allocated.
    pub fn build<G>(gpu: &mut G, params: &EffectParams) -> Result<Self, GpuError>
    where
        G: Gpu<Program = P>,
    {
        let accumulate = gpu.create_program(&accumulate_program(params))?;
        let output = match gpu.create_program(&output_program(params)) {
            Ok(program) => program,
            Err(err) => {
                gpu.delete_program(accumulate);
                return Err(err);
            }
        };
        Ok(Self {
            accumulate,
            output,
            output_reads_time: params.output.style.is_time_varying(),
        })
    }

    pub fn release<G>(self, gpu: &mut G)
    where
        G: Gpu<Program = P>,
    {
        gpu.delete_program(self.accumulate);
        gpu.delete_program(self.output);
    }
}

/// Replaces `slot` with freshly built programs, keeping the old pair if the
/// new one fails validation.
///
/// Returns `false` only when no usable programs exist afterwards.
pub fn rebuild_programs<G: Gpu>(
    gpu: &mut G,
    slot: &mut Option<PassPrograms<G::Program>>,
    params: &EffectParams,
) -> bool {
    match PassPrograms::build(gpu, params) {
        Ok(programs) => {
            if let Some(previous) = slot.replace(programs) {
                previous.release(gpu);
            }
            debug!("pass programs linked");
            true
        }
        Err(err) => {
            if slot.is_some() {
                warn!(error = %err, "shader rebuild failed; keeping previous programs");
                true
            } else {
                warn!(error = %err, "shader build failed; effect has no programs");
                false
            }
        }
    }
}

//! Deterministic CPU implementation of [`Gpu`].
//!
//! Textures are RGBA8 images, blits and passes are evaluated with the kernels
//! from [`crate::shading`], and every object creation is counted. Faults can
//! be injected to exercise the engine's fail-safe paths without a driver.

use std::collections::HashMap;

use glam::{Vec2, Vec4};
use image::{Rgba, RgbaImage};
use tracing::warn;

use crate::compile::{PassKind, ProgramDesc, TIME_UNIFORM};
use crate::shading::{self, CrossTaps};
use crate::types::Extent;

use super::backend::{ColorTarget, Gpu, GpuError, PassInvocation, TargetOf};

/// `GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT`, reported for injected failures.
const INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoftTexture(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoftFramebuffer(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoftProgram(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoftGeometry(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SoftwareCounters {
    pub targets_created: u64,
    pub targets_deleted: u64,
    pub programs_created: u64,
    pub programs_deleted: u64,
    pub quads_created: u64,
    pub quads_deleted: u64,
    pub raster_resets: u64,
    pub blits: u64,
    pub draws: u64,
}

/// One executed draw, in submission order.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub label: &'static str,
    pub target: Option<SoftFramebuffer>,
    pub viewport: Extent,
    pub inputs: Vec<SoftTexture>,
    pub time: Option<f32>,
}

pub struct SoftwareGpu {
    surface: RgbaImage,
    textures: HashMap<SoftTexture, RgbaImage>,
    attachments: HashMap<SoftFramebuffer, SoftTexture>,
    programs: HashMap<SoftProgram, (&'static str, PassKind)>,
    next_id: u32,
    target_budget: Option<usize>,
    incomplete_framebuffers: bool,
    reject_programs: bool,
    counters: SoftwareCounters,
    draws: Vec<DrawRecord>,
}

impl SoftwareGpu {
    /// Creates a backend whose default framebuffer is opaque black.
    pub fn new(surface: Extent) -> Self {
        Self {
            surface: RgbaImage::from_pixel(surface.width, surface.height, Rgba([0, 0, 0, 255])),
            textures: HashMap::new(),
            attachments: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            target_budget: None,
            incomplete_framebuffers: false,
            reject_programs: false,
            counters: SoftwareCounters::default(),
            draws: Vec::new(),
        }
    }

    /// The default framebuffer.
    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut RgbaImage {
        &mut self.surface
    }

    /// Replaces the default framebuffer with a solid colour at `extent`.
    pub fn fill_surface(&mut self, extent: Extent, rgba: [u8; 4]) {
        self.surface = RgbaImage::from_pixel(extent.width, extent.height, Rgba(rgba));
    }

    pub fn texture_image(&self, texture: SoftTexture) -> Option<&RgbaImage> {
        self.textures.get(&texture)
    }

    pub fn counters(&self) -> SoftwareCounters {
        self.counters
    }

    pub fn live_targets(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Maximum number of live colour targets; creations beyond it fail with
    /// [`GpuError::OutOfMemory`].
    pub fn set_target_budget(&mut self, budget: Option<usize>) {
        self.target_budget = budget;
    }

    /// Makes every new framebuffer report itself incomplete.
    pub fn set_incomplete_framebuffers(&mut self, incomplete: bool) {
        self.incomplete_framebuffers = incomplete;
    }

    /// Makes every program fail to link.
    pub fn set_reject_programs(&mut self, reject: bool) {
        self.reject_programs = reject;
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn run_pass(
        kind: PassKind,
        target: &mut RgbaImage,
        viewport: Extent,
        inputs: &[&RgbaImage],
        time: f32,
    ) {
        let width = viewport.width.min(target.width());
        let height = viewport.height.min(target.height());
        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / viewport.width as f32,
                    (y as f32 + 0.5) / viewport.height as f32,
                );
                let color = match kind {
                    PassKind::Accumulate { blend, anchor } => {
                        let current = sample_uv(inputs[0], uv);
                        let history = sample_uv(inputs[1], uv);
                        shading::accumulate(&blend, &anchor, uv, current, history)
                    }
                    PassKind::Output(output) => {
                        let source = inputs[0];
                        let uv = shading::styled_uv(output.style, uv, time);
                        let texel = Vec2::new(
                            1.0 / source.width() as f32,
                            1.0 / source.height() as f32,
                        );
                        let taps = CrossTaps {
                            center: sample_uv(source, uv),
                            north: sample_uv(source, uv - Vec2::new(0.0, texel.y)),
                            south: sample_uv(source, uv + Vec2::new(0.0, texel.y)),
                            east: sample_uv(source, uv + Vec2::new(texel.x, 0.0)),
                            west: sample_uv(source, uv - Vec2::new(texel.x, 0.0)),
                        };
                        shading::finish(&output, &taps)
                    }
                };
                target.put_pixel(x, y, to_rgba8(color));
            }
        }
    }
}

impl Gpu for SoftwareGpu {
    type Texture = SoftTexture;
    type Framebuffer = SoftFramebuffer;
    type Program = SoftProgram;
    type Geometry = SoftGeometry;

    fn create_color_target(&mut self, extent: Extent) -> Result<TargetOf<Self>, GpuError> {
        if self
            .target_budget
            .is_some_and(|budget| self.textures.len() >= budget)
        {
            return Err(GpuError::OutOfMemory {
                object: "color target",
            });
        }
        if self.incomplete_framebuffers {
            return Err(GpuError::IncompleteFramebuffer {
                status: INCOMPLETE_ATTACHMENT,
            });
        }

        let texture = SoftTexture(self.next_id());
        let framebuffer = SoftFramebuffer(self.next_id());
        self.textures.insert(
            texture,
            RgbaImage::new(extent.width.max(1), extent.height.max(1)),
        );
        self.attachments.insert(framebuffer, texture);
        self.counters.targets_created += 1;
        Ok(ColorTarget {
            texture,
            framebuffer,
            extent,
        })
    }

    fn delete_color_target(&mut self, target: TargetOf<Self>) {
        self.attachments.remove(&target.framebuffer);
        if self.textures.remove(&target.texture).is_some() {
            self.counters.targets_deleted += 1;
        }
    }

    fn clear_color_target(&mut self, target: &TargetOf<Self>, rgba: [f32; 4]) {
        if let Some(image) = self.textures.get_mut(&target.texture) {
            let fill = to_rgba8(Vec4::from(rgba));
            for pixel in image.pixels_mut() {
                *pixel = fill;
            }
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program, GpuError> {
        if self.reject_programs {
            return Err(GpuError::Link {
                label: desc.label,
                log: "program rejected by software backend".to_string(),
            });
        }
        let program = SoftProgram(self.next_id());
        self.programs.insert(program, (desc.label, desc.kind));
        self.counters.programs_created += 1;
        Ok(program)
    }

    fn delete_program(&mut self, program: Self::Program) {
        if self.programs.remove(&program).is_some() {
            self.counters.programs_deleted += 1;
        }
    }

    fn create_fullscreen_quad(&mut self) -> Result<Self::Geometry, GpuError> {
        self.counters.quads_created += 1;
        Ok(SoftGeometry(self.next_id()))
    }

    fn delete_fullscreen_quad(&mut self, _geometry: Self::Geometry) {
        self.counters.quads_deleted += 1;
    }

    fn reset_raster_state(&mut self) {
        self.counters.raster_resets += 1;
    }

    fn blit_surface_to(&mut self, surface: Extent, target: &TargetOf<Self>) {
        let source = &self.surface;
        let Some(destination) = self.textures.get_mut(&target.texture) else {
            warn!(?target, "blit into unknown target");
            return;
        };
        self.counters.blits += 1;

        let scale_x = surface.width as f32 / destination.width() as f32;
        let scale_y = surface.height as f32 / destination.height() as f32;
        for y in 0..destination.height() {
            for x in 0..destination.width() {
                let color = sample_texels(
                    source,
                    (x as f32 + 0.5) * scale_x,
                    (y as f32 + 0.5) * scale_y,
                );
                destination.put_pixel(x, y, to_rgba8(color));
            }
        }
    }

    fn draw_pass(&mut self, pass: &PassInvocation<'_, Self>) {
        let Some((label, kind)) = self.programs.get(&pass.program).copied() else {
            warn!(program = ?pass.program, "draw with unknown program");
            return;
        };
        let time = pass
            .uniforms
            .iter()
            .find(|(name, _)| *name == TIME_UNIFORM)
            .map(|(_, value)| *value);
        self.counters.draws += 1;
        self.draws.push(DrawRecord {
            label,
            target: pass.target,
            viewport: pass.viewport,
            inputs: pass.inputs.to_vec(),
            time,
        });

        let expected_inputs = match kind {
            PassKind::Accumulate { .. } => 2,
            PassKind::Output(_) => 1,
        };
        if pass.inputs.len() < expected_inputs {
            warn!(label, inputs = pass.inputs.len(), "pass is missing inputs");
            return;
        }

        // The target is detached while the pass runs, so a pass that samples
        // its own target finds the input missing instead of aliasing it.
        let target_texture = match pass.target {
            Some(framebuffer) => match self.attachments.get(&framebuffer) {
                Some(texture) => Some(*texture),
                None => {
                    warn!(?framebuffer, "draw into unknown framebuffer");
                    return;
                }
            },
            None => None,
        };
        let mut target = match target_texture {
            Some(texture) => match self.textures.remove(&texture) {
                Some(image) => image,
                None => return,
            },
            None => std::mem::take(&mut self.surface),
        };

        let inputs: Option<Vec<&RgbaImage>> = pass
            .inputs
            .iter()
            .map(|texture| self.textures.get(texture))
            .collect();
        match inputs {
            Some(inputs) => {
                Self::run_pass(kind, &mut target, pass.viewport, &inputs, time.unwrap_or(0.0))
            }
            None => warn!(label, "pass samples a missing or bound-for-write texture"),
        }

        match target_texture {
            Some(texture) => {
                self.textures.insert(texture, target);
            }
            None => self.surface = target,
        }
    }
}

fn from_rgba8(pixel: &Rgba<u8>) -> Vec4 {
    Vec4::new(
        pixel.0[0] as f32,
        pixel.0[1] as f32,
        pixel.0[2] as f32,
        pixel.0[3] as f32,
    ) / 255.0
}

fn to_rgba8(color: Vec4) -> Rgba<u8> {
    let scaled = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    Rgba([
        scaled.x as u8,
        scaled.y as u8,
        scaled.z as u8,
        scaled.w as u8,
    ])
}

fn sample_uv(image: &RgbaImage, uv: Vec2) -> Vec4 {
    sample_texels(
        image,
        uv.x * image.width() as f32,
        uv.y * image.height() as f32,
    )
}

/// Bilinear fetch at a position measured in texels, clamped to the edges.
fn sample_texels(image: &RgbaImage, x: f32, y: f32) -> Vec4 {
    if image.width() == 0 || image.height() == 0 {
        return Vec4::ZERO;
    }
    let fx = x - 0.5;
    let fy = y - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;

    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let fetch = |x: i64, y: i64| -> Vec4 {
        let x = x.clamp(0, max_x) as u32;
        let y = y.clamp(0, max_y) as u32;
        from_rgba8(image.get_pixel(x, y))
    };

    let (x0, y0) = (x0 as i64, y0 as i64);
    let top = fetch(x0, y0).lerp(fetch(x0 + 1, y0), tx);
    let bottom = fetch(x0, y0 + 1).lerp(fetch(x0 + 1, y0 + 1), tx);
    top.lerp(bottom, ty)
}

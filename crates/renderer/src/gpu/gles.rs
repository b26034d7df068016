//! OpenGL ES 3 backend on top of `glow`.

use std::ffi::c_void;

use glow::HasContext;
use tracing::{debug, warn};

use crate::compile::ProgramDesc;
use crate::types::Extent;

use super::backend::{ColorTarget, Gpu, GpuError, PassInvocation, TargetOf};
use super::geometry::{QuadVertex, QUAD_INDICES, QUAD_STRIDE, QUAD_VERTICES, TEXCOORD_OFFSET};

const POSITION_LOCATION: u32 = 0;
const TEXCOORD_LOCATION: u32 = 1;

/// Vertex array plus the two buffers it references.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlowQuad {
    pub vertex_array: glow::NativeVertexArray,
    pub vertices: glow::NativeBuffer,
    pub indices: glow::NativeBuffer,
}

/// Issues commands on whatever EGL context is current on the calling thread.
pub struct GlowGpu {
    gl: glow::Context,
}

impl GlowGpu {
    /// # Safety
    ///
    /// `gl` must have been loaded for the context that is current whenever
    /// this backend is used.
    pub unsafe fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    /// Loads every entry point through `loader`.
    ///
    /// # Safety
    ///
    /// `loader` must return valid function pointers (or null) for the
    /// current context.
    pub unsafe fn from_loader<F>(loader: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        Self::new(glow::Context::from_loader_function(loader))
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    /// Discards errors raised by the host before our commands.
    fn drain_errors(&self) {
        let mut drained = 0;
        // SAFETY: glGetError has no preconditions beyond a current context.
        while unsafe { self.gl.get_error() } != glow::NO_ERROR {
            drained += 1;
            if drained > 16 {
                break;
            }
        }
    }

    fn last_error(&self) -> u32 {
        // SAFETY: see `drain_errors`.
        unsafe { self.gl.get_error() }
    }

    unsafe fn compile_stage(
        &self,
        label: &'static str,
        stage: u32,
        source: &str,
    ) -> Result<glow::NativeShader, GpuError> {
        let gl = &self.gl;
        let shader = gl.create_shader(stage).map_err(|reason| GpuError::Create {
            object: "shader",
            reason,
        })?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(GpuError::Compile { label, log });
        }
        Ok(shader)
    }

    unsafe fn delete_target_objects(
        &self,
        texture: Option<glow::NativeTexture>,
        framebuffer: Option<glow::NativeFramebuffer>,
    ) {
        if let Some(framebuffer) = framebuffer {
            self.gl.delete_framebuffer(framebuffer);
        }
        if let Some(texture) = texture {
            self.gl.delete_texture(texture);
        }
    }
}

impl Gpu for GlowGpu {
    type Texture = glow::NativeTexture;
    type Framebuffer = glow::NativeFramebuffer;
    type Program = glow::NativeProgram;
    type Geometry = GlowQuad;

    fn create_color_target(&mut self, extent: Extent) -> Result<TargetOf<Self>, GpuError> {
        let (width, height) = extent.gl_size();
        self.drain_errors();

        // SAFETY: every object created here is either returned or deleted
        // before leaving the function.
        unsafe {
            let gl = &self.gl;
            let texture = gl.create_texture().map_err(|reason| GpuError::Create {
                object: "texture",
                reason,
            })?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
            );
            for (pname, value) in [
                (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
                (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
                (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
                (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
            ] {
                gl.tex_parameter_i32(glow::TEXTURE_2D, pname, value as i32);
            }
            if self.last_error() == glow::OUT_OF_MEMORY {
                self.delete_target_objects(Some(texture), None);
                return Err(GpuError::OutOfMemory { object: "texture" });
            }

            let framebuffer = match gl.create_framebuffer() {
                Ok(framebuffer) => framebuffer,
                Err(reason) => {
                    self.delete_target_objects(Some(texture), None);
                    return Err(GpuError::Create {
                        object: "framebuffer",
                        reason,
                    });
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.delete_target_objects(Some(texture), Some(framebuffer));
                return Err(GpuError::IncompleteFramebuffer { status });
            }
            if self.last_error() == glow::OUT_OF_MEMORY {
                self.delete_target_objects(Some(texture), Some(framebuffer));
                return Err(GpuError::OutOfMemory {
                    object: "framebuffer",
                });
            }

            debug!(%extent, ?texture, ?framebuffer, "created color target");
            Ok(ColorTarget {
                texture,
                framebuffer,
                extent,
            })
        }
    }

    fn delete_color_target(&mut self, target: TargetOf<Self>) {
        // SAFETY: the target was created by this backend and is not used again.
        unsafe { self.delete_target_objects(Some(target.texture), Some(target.framebuffer)) }
    }

    fn clear_color_target(&mut self, target: &TargetOf<Self>, rgba: [f32; 4]) {
        let (width, height) = target.extent.gl_size();
        // SAFETY: the framebuffer belongs to this backend.
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(target.framebuffer));
            gl.viewport(0, 0, width, height);
            gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program, GpuError> {
        // SAFETY: shaders are deleted on every path; the program is returned
        // only after a successful link.
        unsafe {
            let vertex = self.compile_stage(desc.label, glow::VERTEX_SHADER, &desc.vertex)?;
            let fragment =
                match self.compile_stage(desc.label, glow::FRAGMENT_SHADER, &desc.fragment) {
                    Ok(shader) => shader,
                    Err(err) => {
                        self.gl.delete_shader(vertex);
                        return Err(err);
                    }
                };

            let gl = &self.gl;
            let program = match gl.create_program() {
                Ok(program) => program,
                Err(reason) => {
                    gl.delete_shader(vertex);
                    gl.delete_shader(fragment);
                    return Err(GpuError::Create {
                        object: "program",
                        reason,
                    });
                }
            };
            gl.attach_shader(program, vertex);
            gl.attach_shader(program, fragment);
            gl.link_program(program);
            let linked = gl.get_program_link_status(program);
            gl.detach_shader(program, vertex);
            gl.detach_shader(program, fragment);
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);

            if !linked {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(GpuError::Link {
                    label: desc.label,
                    log,
                });
            }

            gl.use_program(Some(program));
            for (name, unit) in desc.samplers {
                match gl.get_uniform_location(program, name) {
                    Some(location) => gl.uniform_1_i32(Some(&location), *unit as i32),
                    None => warn!(label = desc.label, sampler = name, "sampler uniform not found"),
                }
            }
            gl.use_program(None);

            debug!(label = desc.label, ?program, "linked program");
            Ok(program)
        }
    }

    fn delete_program(&mut self, program: Self::Program) {
        // SAFETY: the program was created by this backend.
        unsafe { self.gl.delete_program(program) }
    }

    fn create_fullscreen_quad(&mut self) -> Result<Self::Geometry, GpuError> {
        let create = |object: &'static str| move |reason: String| GpuError::Create { object, reason };
        // SAFETY: the vertex array and buffers are either returned together
        // or deleted.
        unsafe {
            let gl = &self.gl;
            let vertex_array = gl.create_vertex_array().map_err(create("vertex array"))?;
            let vertices = match gl.create_buffer() {
                Ok(buffer) => buffer,
                Err(reason) => {
                    gl.delete_vertex_array(vertex_array);
                    return Err(create("vertex buffer")(reason));
                }
            };
            let indices = match gl.create_buffer() {
                Ok(buffer) => buffer,
                Err(reason) => {
                    gl.delete_buffer(vertices);
                    gl.delete_vertex_array(vertex_array);
                    return Err(create("index buffer")(reason));
                }
            };

            gl.bind_vertex_array(Some(vertex_array));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vertices));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice::<QuadVertex, u8>(&QUAD_VERTICES),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(indices));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice::<u16, u8>(&QUAD_INDICES),
                glow::STATIC_DRAW,
            );
            gl.enable_vertex_attrib_array(POSITION_LOCATION);
            gl.vertex_attrib_pointer_f32(POSITION_LOCATION, 2, glow::FLOAT, false, QUAD_STRIDE, 0);
            gl.enable_vertex_attrib_array(TEXCOORD_LOCATION);
            gl.vertex_attrib_pointer_f32(
                TEXCOORD_LOCATION,
                2,
                glow::FLOAT,
                false,
                QUAD_STRIDE,
                TEXCOORD_OFFSET,
            );
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            Ok(GlowQuad {
                vertex_array,
                vertices,
                indices,
            })
        }
    }

    fn delete_fullscreen_quad(&mut self, geometry: Self::Geometry) {
        // SAFETY: the quad was created by this backend.
        unsafe {
            self.gl.delete_vertex_array(geometry.vertex_array);
            self.gl.delete_buffer(geometry.vertices);
            self.gl.delete_buffer(geometry.indices);
        }
    }

    fn reset_raster_state(&mut self) {
        // SAFETY: plain state toggles.
        unsafe {
            self.gl.disable(glow::SCISSOR_TEST);
            self.gl.disable(glow::DEPTH_TEST);
            self.gl.disable(glow::BLEND);
        }
    }

    fn blit_surface_to(&mut self, surface: Extent, target: &TargetOf<Self>) {
        let (src_width, src_height) = surface.gl_size();
        let (dst_width, dst_height) = target.extent.gl_size();
        // SAFETY: reads framebuffer 0 and writes a framebuffer we own.
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(target.framebuffer));
            gl.blit_framebuffer(
                0,
                0,
                src_width,
                src_height,
                0,
                0,
                dst_width,
                dst_height,
                glow::COLOR_BUFFER_BIT,
                glow::LINEAR,
            );
        }
    }

    fn draw_pass(&mut self, pass: &PassInvocation<'_, Self>) {
        let (width, height) = pass.viewport.gl_size();
        // SAFETY: every bound object belongs to this backend; framebuffer 0
        // is the host's presented surface.
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, pass.target);
            gl.viewport(0, 0, width, height);
            gl.use_program(Some(pass.program));
            for (unit, texture) in pass.inputs.iter().enumerate() {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(*texture));
            }
            for (name, value) in pass.uniforms {
                if let Some(location) = gl.get_uniform_location(pass.program, name) {
                    gl.uniform_1_f32(Some(&location), *value);
                }
            }
            gl.bind_vertex_array(Some(pass.geometry.vertex_array));
            gl.draw_elements(
                glow::TRIANGLES,
                QUAD_INDICES.len() as i32,
                glow::UNSIGNED_SHORT,
                0,
            );
            gl.bind_vertex_array(None);
            gl.active_texture(glow::TEXTURE0);
        }
    }
}

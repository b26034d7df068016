//! The few EGL types and entry points the interceptor touches.

use std::ffi::{c_char, c_void, CStr};

use renderer::Extent;

use crate::hook::Address;

pub type EGLDisplay = *mut c_void;
pub type EGLSurface = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLBoolean = u32;
pub type EGLint = i32;

pub const EGL_FALSE: EGLBoolean = 0;
pub const EGL_TRUE: EGLBoolean = 1;
pub const EGL_HEIGHT: EGLint = 0x3056;
pub const EGL_WIDTH: EGLint = 0x3057;

pub type SwapBuffersFn = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
pub type QuerySurfaceFn =
    unsafe extern "C" fn(EGLDisplay, EGLSurface, EGLint, *mut EGLint) -> EGLBoolean;
pub type GetProcAddressFn = unsafe extern "C" fn(*const c_char) -> *const c_void;
pub type GetCurrentContextFn = unsafe extern "C" fn() -> EGLContext;

pub const SWAP_BUFFERS: &str = "eglSwapBuffers";
pub const QUERY_SURFACE: &str = "eglQuerySurface";
pub const GET_PROC_ADDRESS: &str = "eglGetProcAddress";
pub const GET_CURRENT_CONTEXT: &str = "eglGetCurrentContext";

/// Resolved EGL entry points; `swap_buffers` is always the original present.
#[derive(Clone, Copy, Debug)]
pub struct EglApi {
    pub swap_buffers: SwapBuffersFn,
    pub query_surface: QuerySurfaceFn,
    pub get_proc_address: GetProcAddressFn,
    pub get_current_context: GetCurrentContextFn,
}

impl EglApi {
    pub fn from_fns(
        swap_buffers: SwapBuffersFn,
        query_surface: QuerySurfaceFn,
        get_proc_address: GetProcAddressFn,
        get_current_context: GetCurrentContextFn,
    ) -> Self {
        Self {
            swap_buffers,
            query_surface,
            get_proc_address,
            get_current_context,
        }
    }

    /// # Safety
    ///
    /// Each address must point at a function with the matching EGL signature.
    pub unsafe fn from_addresses(
        swap_buffers: Address,
        query_surface: Address,
        get_proc_address: Address,
        get_current_context: Address,
    ) -> Self {
        Self {
            swap_buffers: std::mem::transmute::<*const c_void, SwapBuffersFn>(
                swap_buffers.as_ptr(),
            ),
            query_surface: std::mem::transmute::<*const c_void, QuerySurfaceFn>(
                query_surface.as_ptr(),
            ),
            get_proc_address: std::mem::transmute::<*const c_void, GetProcAddressFn>(
                get_proc_address.as_ptr(),
            ),
            get_current_context: std::mem::transmute::<*const c_void, GetCurrentContextFn>(
                get_current_context.as_ptr(),
            ),
        }
    }

    /// Current size of `surface`, or `None` if either query fails.
    ///
    /// # Safety
    ///
    /// `display` and `surface` must be the handles passed to the present call.
    pub unsafe fn surface_extent(&self, display: EGLDisplay, surface: EGLSurface) -> Option<Extent> {
        let mut width: EGLint = 0;
        let mut height: EGLint = 0;
        if (self.query_surface)(display, surface, EGL_WIDTH, &mut width) == EGL_FALSE
            || (self.query_surface)(display, surface, EGL_HEIGHT, &mut height) == EGL_FALSE
        {
            return None;
        }
        Some(Extent::new(
            u32::try_from(width).ok()?,
            u32::try_from(height).ok()?,
        ))
    }

    /// # Safety
    ///
    /// Same contract as `eglSwapBuffers`.
    pub unsafe fn swap_buffers(&self, display: EGLDisplay, surface: EGLSurface) -> EGLBoolean {
        (self.swap_buffers)(display, surface)
    }

    /// # Safety
    ///
    /// Must be called with an EGL display initialised in this process.
    pub unsafe fn proc_address(&self, name: &CStr) -> *const c_void {
        (self.get_proc_address)(name.as_ptr())
    }

    /// Context current on the calling thread; null for `EGL_NO_CONTEXT`.
    ///
    /// # Safety
    ///
    /// `get_current_context` must be the display library's export.
    pub unsafe fn current_context(&self) -> EGLContext {
        (self.get_current_context)()
    }
}

//! The replacement present path.
//!
//! Once bootstrap publishes an [`Installation`], every present on a large
//! enough surface first runs the effect on the calling thread and then
//! forwards to the original `eglSwapBuffers`, whose result is returned as is.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use anyhow::{bail, Result};
use renderer::gpu::GlowGpu;
use renderer::{EffectParams, Extent, FrameOutcome, RenderEngine};
use tracing::{debug, trace, warn};

use crate::egl::{EGLBoolean, EGLDisplay, EGLSurface, EglApi};

/// Fallback libraries for GL entry points `eglGetProcAddress` does not return.
const GLES_LIBRARIES: &[&str] = &["libGLESv3.so", "libGLESv2.so.2", "libGLESv2.so"];

const GL_VERSION: u32 = 0x1F02;

type GetStringFn = unsafe extern "C" fn(u32) -> *const u8;

/// Decides which presents get the effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentInterceptor {
    /// Surfaces at most this wide (splash screens, tiny overlays) are skipped.
    pub min_surface_width: u32,
}

impl Default for PresentInterceptor {
    fn default() -> Self {
        Self {
            min_surface_width: 100,
        }
    }
}

impl PresentInterceptor {
    pub fn new(min_surface_width: u32) -> Self {
        Self { min_surface_width }
    }

    pub fn wants(&self, surface: Extent) -> bool {
        surface.width > self.min_surface_width && surface.height > 0
    }

    /// Runs `render` when `surface` qualifies, then always calls `forward`.
    pub fn present<R>(
        &self,
        surface: Option<Extent>,
        render: impl FnOnce(Extent),
        forward: impl FnOnce() -> R,
    ) -> R {
        if let Some(surface) = surface.filter(|surface| self.wants(*surface)) {
            render(surface);
        }
        forward()
    }
}

/// Everything the present path needs once the hook is in place.
#[derive(Clone, Copy, Debug)]
pub struct Installation {
    pub api: EglApi,
    pub interceptor: PresentInterceptor,
    pub params: EffectParams,
}

static INSTALLATION: OnceLock<Installation> = OnceLock::new();

/// Records the installation; only the first call wins.
pub fn publish(installation: Installation) -> bool {
    INSTALLATION.set(installation).is_ok()
}

pub fn installed() -> Option<&'static Installation> {
    INSTALLATION.get()
}

/// The hooked present: effect first, then the original call.
///
/// # Safety
///
/// Must only be called with the arguments of an `eglSwapBuffers` call made by
/// the host, on the thread that owns the surface's current context.
pub unsafe fn present_installed(
    installation: &Installation,
    display: EGLDisplay,
    surface: EGLSurface,
) -> EGLBoolean {
    let api = installation.api;
    // SAFETY: forwarded from the caller's contract.
    let extent = unsafe { api.surface_extent(display, surface) };
    installation.interceptor.present(
        extent,
        |extent| render_on_current_thread(installation, extent),
        // SAFETY: forwarded from the caller's contract.
        || unsafe { api.swap_buffers(display, surface) },
    )
}

thread_local! {
    static EFFECT: EffectCell<GlEffect> = const { EffectCell::new() };
}

fn render_on_current_thread(installation: &Installation, extent: Extent) {
    // SAFETY: the installation's entry points come from the display library.
    let context = unsafe { installation.api.current_context() };
    if context.is_null() {
        trace!(%extent, "no current context; frame presented without effect");
        return;
    }
    let _ = EFFECT.try_with(|cell| {
        cell.run_frame(
            context as usize,
            || GlEffect::load(installation),
            |effect| {
                if let FrameOutcome::Skipped(reason) = effect.engine.render_frame(extent) {
                    trace!(%extent, ?reason, "frame presented without effect");
                }
            },
        )
    });
}

/// Engine bound to the GLES context current on this thread.
struct GlEffect {
    engine: RenderEngine<GlowGpu>,
    _gles: Option<libloading::Library>,
}

impl GlEffect {
    fn load(installation: &Installation) -> Result<Self> {
        let api = installation.api;
        // SAFETY: these are the system GLES libraries the host already uses.
        let gles = GLES_LIBRARIES
            .iter()
            .find_map(|name| unsafe { libloading::Library::new(name) }.ok());

        let mut lookup = |name: &str| -> *const c_void {
            let Ok(name) = CString::new(name) else {
                return std::ptr::null();
            };
            // SAFETY: called from inside a present, so EGL is initialised.
            let ptr = unsafe { api.proc_address(&name) };
            if !ptr.is_null() {
                return ptr;
            }
            gles.as_ref()
                .and_then(|library| {
                    // SAFETY: only the address is read.
                    unsafe { library.get::<*const c_void>(name.as_bytes_with_nul()) }
                        .ok()
                        .map(|symbol| *symbol)
                })
                .unwrap_or(std::ptr::null())
        };

        let get_string = lookup("glGetString");
        if get_string.is_null() {
            bail!("no GLES entry points available on this thread");
        }
        // SAFETY: `glGetString` has this signature in every GLES version.
        let get_string = unsafe { std::mem::transmute::<*const c_void, GetStringFn>(get_string) };
        // SAFETY: a null result is how GL reports a missing current context.
        if unsafe { get_string(GL_VERSION) }.is_null() {
            bail!("GL_VERSION is unavailable; no usable GLES context on this thread");
        }
        // SAFETY: the loader resolves against the context that is current for
        // this present, and the engine never leaves this thread.
        let gpu = unsafe { GlowGpu::from_loader(&mut lookup) };
        debug!("GLES entry points loaded");

        Ok(Self {
            engine: RenderEngine::new(gpu, installation.params),
            _gles: gles,
        })
    }
}

enum Slot<E> {
    Idle,
    Active { context: usize, effect: E },
    Disabled,
}

/// Lazily created per-thread effect that shuts itself off after a panic or
/// a failed creation.
///
/// The effect belongs to the context it was created under. When a frame
/// arrives under another context the old effect is dropped without touching
/// GL (its objects died with their context) and a new one is created.
pub struct EffectCell<E> {
    slot: RefCell<Slot<E>>,
}

impl<E> Default for EffectCell<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EffectCell<E> {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(Slot::Idle),
        }
    }

    /// Creates the effect for `context` on first use and runs `frame` on it.
    ///
    /// Returns whether `frame` ran to completion. Panics never escape.
    pub fn run_frame<C, F>(&self, context: usize, create: C, frame: F) -> bool
    where
        C: FnOnce() -> Result<E>,
        F: FnOnce(&mut E),
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let Ok(mut slot) = self.slot.try_borrow_mut() else {
                return false;
            };
            let stale = match &*slot {
                Slot::Active { context: owner, .. } if *owner != context => Some(*owner),
                _ => None,
            };
            if let Some(owner) = stale {
                debug!(from = owner, to = context, "context changed; rebuilding effect");
                *slot = Slot::Idle;
            }
            if matches!(*slot, Slot::Idle) {
                *slot = match create() {
                    Ok(effect) => Slot::Active { context, effect },
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "effect unavailable on this thread");
                        Slot::Disabled
                    }
                };
            }
            match &mut *slot {
                Slot::Active { effect, .. } => {
                    frame(effect);
                    true
                }
                Slot::Idle | Slot::Disabled => false,
            }
        }));

        match outcome {
            Ok(ran) => ran,
            Err(payload) => {
                warn!(
                    panic = panic_message(payload.as_ref()),
                    "effect panicked; disabled on this thread"
                );
                if let Ok(mut slot) = self.slot.try_borrow_mut() {
                    *slot = Slot::Disabled;
                }
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.slot.try_borrow().as_deref(), Ok(Slot::Active { .. }))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.slot.try_borrow().as_deref(), Ok(Slot::Disabled))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const CONTEXT: usize = 0xc0;

    #[test]
    fn narrow_surfaces_are_forwarded_untouched() {
        let interceptor = PresentInterceptor::default();
        let rendered = Cell::new(false);
        let result = interceptor.present(
            Some(Extent::new(100, 600)),
            |_| rendered.set(true),
            || 7,
        );
        assert_eq!(result, 7);
        assert!(!rendered.get());

        let result = interceptor.present(
            Some(Extent::new(101, 600)),
            |_| rendered.set(true),
            || 9,
        );
        assert_eq!(result, 9);
        assert!(rendered.get());
    }

    #[test]
    fn unknown_size_still_forwards() {
        let interceptor = PresentInterceptor::new(0);
        let forwarded = Cell::new(0);
        interceptor.present(None, |_| panic!("no size, no render"), || {
            forwarded.set(forwarded.get() + 1)
        });
        assert_eq!(forwarded.get(), 1);
    }

    #[test]
    fn effect_is_created_once() {
        let cell = EffectCell::new();
        let created = Cell::new(0);
        let mut frames = 0;
        for _ in 0..3 {
            let ran = cell.run_frame(
                CONTEXT,
                || {
                    created.set(created.get() + 1);
                    Ok(0u32)
                },
                |count| *count += 1,
            );
            assert!(ran);
            frames += 1;
        }
        assert_eq!(created.get(), 1);
        assert_eq!(frames, 3);
        assert!(cell.is_active());
    }

    #[test]
    fn new_context_gets_a_fresh_effect() {
        let cell = EffectCell::new();
        let created = Cell::new(0);
        let mut seen = Vec::new();
        for context in [CONTEXT, CONTEXT, 0xc1, 0xc1] {
            let ran = cell.run_frame(
                context,
                || {
                    created.set(created.get() + 1);
                    Ok((context, 0u32))
                },
                |(owner, frames)| {
                    *frames += 1;
                    seen.push((*owner, *frames));
                },
            );
            assert!(ran);
        }
        assert_eq!(created.get(), 2);
        assert_eq!(seen, vec![(CONTEXT, 1), (CONTEXT, 2), (0xc1, 1), (0xc1, 2)]);
    }

    #[test]
    fn failed_creation_disables_without_retry() {
        let cell: EffectCell<u32> = EffectCell::new();
        let attempts = Cell::new(0);
        for _ in 0..2 {
            let ran = cell.run_frame(
                CONTEXT,
                || {
                    attempts.set(attempts.get() + 1);
                    bail!("no context")
                },
                |_| unreachable!(),
            );
            assert!(!ran);
        }
        assert_eq!(attempts.get(), 1);
        assert!(cell.is_disabled());
    }

    #[test]
    fn panics_are_contained_and_disable_the_effect() {
        let cell = EffectCell::new();
        let ran = cell.run_frame(CONTEXT, || Ok(()), |_| panic!("driver exploded"));
        assert!(!ran);
        assert!(cell.is_disabled());

        let ran = cell.run_frame(CONTEXT, || Ok(()), |_| unreachable!());
        assert!(!ran);
    }

    #[test]
    fn panic_payloads_are_described() {
        let text: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(text.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}

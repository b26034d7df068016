//! Injectable EGL present hook running the `renderer` post-process.
//!
//! ```text
//!   library load ──▶ run::start ──▶ bootstrap thread (sleep, resolve, install)
//!                                            │ Installation
//!                                            ▼
//!   host eglSwapBuffers ──▶ interceptor ──▶ RenderEngine (this thread) ──▶ original
//! ```
//!
//! With the default `preload` feature the library exports `eglSwapBuffers`
//! itself and starts the bootstrap from an `.init_array` constructor. Until
//! the installation is published, presents are forwarded untouched.

pub mod bindings;
pub mod bootstrap;
pub mod egl;
pub mod hook;
pub mod interceptor;
#[cfg(feature = "preload")]
mod preload;
pub mod run;

pub use bootstrap::{install, Bootstrap, BootstrapSettings};
pub use hook::{Address, DynamicLinkerProvider, HookError, HookProvider, LibraryHandle};
pub use interceptor::{Installation, PresentInterceptor};

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use renderer::EffectParams;
use tracing::{info, warn};

use crate::egl::{EglApi, GET_CURRENT_CONTEXT, GET_PROC_ADDRESS, QUERY_SURFACE};
use crate::hook::{Address, HookProvider};
use crate::interceptor::{Installation, PresentInterceptor};

pub const THREAD_NAME: &str = "afterimage-bootstrap";

/// Inputs of one installation attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapSettings {
    pub startup_delay: Duration,
    pub library: String,
    pub symbol: String,
    pub min_surface_width: u32,
    pub params: EffectParams,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(1),
            library: "libEGL.so".into(),
            symbol: crate::egl::SWAP_BUFFERS.into(),
            min_surface_width: 100,
            params: EffectParams::default(),
        }
    }
}

/// Resolves the present symbol and its helpers, then hooks it with
/// `replacement`.
pub fn install<P: HookProvider>(
    provider: &mut P,
    settings: &BootstrapSettings,
    replacement: Address,
) -> Result<Installation> {
    let library = provider
        .open(&settings.library)
        .with_context(|| format!("failed to open display library {}", settings.library))?;
    let target = provider
        .symbol(library, &settings.symbol)
        .with_context(|| format!("failed to resolve {}", settings.symbol))?;
    let query_surface = provider
        .symbol(library, QUERY_SURFACE)
        .with_context(|| format!("failed to resolve {QUERY_SURFACE}"))?;
    let get_proc_address = provider
        .symbol(library, GET_PROC_ADDRESS)
        .with_context(|| format!("failed to resolve {GET_PROC_ADDRESS}"))?;
    let get_current_context = provider
        .symbol(library, GET_CURRENT_CONTEXT)
        .with_context(|| format!("failed to resolve {GET_CURRENT_CONTEXT}"))?;

    if target == replacement {
        bail!(
            "{} in {} resolved to the replacement itself",
            settings.symbol,
            settings.library
        );
    }

    let original = provider
        .install(target, replacement)
        .with_context(|| format!("failed to hook {}", settings.symbol))?;

    // SAFETY: the addresses come from the display library's own exports (or
    // the provider's trampoline for the original), all with EGL signatures.
    let api = unsafe {
        EglApi::from_addresses(original, query_surface, get_proc_address, get_current_context)
    };
    info!(
        library = %settings.library,
        symbol = %settings.symbol,
        ?target,
        ?original,
        "present hook installed"
    );
    Ok(Installation {
        api,
        interceptor: PresentInterceptor::new(settings.min_surface_width),
        params: settings.params,
    })
}

/// Single-shot background installer.
pub struct Bootstrap {
    started: AtomicBool,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bootstrap {
    pub const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
        }
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawns the installer thread unless one was already started.
    ///
    /// The worker sleeps for the startup delay, builds a provider with
    /// `make_provider`, and hands a successful installation to `publish`.
    /// Failures are logged and never retried.
    pub fn start<P, F, C>(
        &self,
        settings: BootstrapSettings,
        replacement: Address,
        make_provider: F,
        publish: C,
    ) -> Option<JoinHandle<()>>
    where
        P: HookProvider,
        F: FnOnce() -> P + Send + 'static,
        C: FnOnce(Installation) + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("bootstrap already started; ignoring second request");
            return None;
        }

        let spawned = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                thread::sleep(settings.startup_delay);
                let mut provider = make_provider();
                match install(&mut provider, &settings, replacement) {
                    Ok(installation) => {
                        // The original address points into libraries the
                        // provider opened; they must stay loaded.
                        std::mem::forget(provider);
                        publish(installation);
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "post-process effect stays inactive");
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to spawn bootstrap thread");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egl::{EGLBoolean, EGLDisplay, EGLSurface, EGL_TRUE, SWAP_BUFFERS};
    use crate::hook::{HookError, LibraryHandle};
    use std::collections::HashMap;
    use std::ffi::{c_char, c_void};
    use std::sync::mpsc;

    unsafe extern "C" fn fake_swap(_: EGLDisplay, _: EGLSurface) -> EGLBoolean {
        EGL_TRUE
    }

    unsafe extern "C" fn fake_replacement(_: EGLDisplay, _: EGLSurface) -> EGLBoolean {
        EGL_TRUE
    }

    unsafe extern "C" fn fake_query(
        _: EGLDisplay,
        _: EGLSurface,
        _: i32,
        value: *mut i32,
    ) -> EGLBoolean {
        *value = 640;
        EGL_TRUE
    }

    unsafe extern "C" fn fake_proc(_: *const c_char) -> *const c_void {
        std::ptr::null()
    }

    unsafe extern "C" fn fake_context() -> *mut c_void {
        std::ptr::null_mut()
    }

    struct FakeProvider {
        libraries: Vec<&'static str>,
        symbols: HashMap<&'static str, Address>,
        installs: Vec<(Address, Address)>,
        fail_install: bool,
    }

    impl FakeProvider {
        fn egl() -> Self {
            let symbols = HashMap::from([
                (SWAP_BUFFERS, Address::of_fn(fake_swap as usize)),
                (QUERY_SURFACE, Address::of_fn(fake_query as usize)),
                (GET_PROC_ADDRESS, Address::of_fn(fake_proc as usize)),
                (GET_CURRENT_CONTEXT, Address::of_fn(fake_context as usize)),
            ]);
            Self {
                libraries: vec!["libEGL.so"],
                symbols,
                installs: Vec::new(),
                fail_install: false,
            }
        }
    }

    impl HookProvider for FakeProvider {
        fn open(&mut self, library: &str) -> Result<LibraryHandle, HookError> {
            self.libraries
                .iter()
                .position(|known| *known == library)
                .map(LibraryHandle)
                .ok_or_else(|| HookError::Open {
                    library: library.into(),
                    reason: "not found".into(),
                })
        }

        fn symbol(&mut self, _library: LibraryHandle, name: &str) -> Result<Address, HookError> {
            self.symbols
                .get(name)
                .copied()
                .ok_or_else(|| HookError::Symbol {
                    library: "libEGL.so".into(),
                    symbol: name.into(),
                    reason: "undefined".into(),
                })
        }

        fn install(
            &mut self,
            target: Address,
            replacement: Address,
        ) -> Result<Address, HookError> {
            if self.fail_install {
                return Err(HookError::Install {
                    target,
                    reason: "page is not writable".into(),
                });
            }
            self.installs.push((target, replacement));
            Ok(target)
        }
    }

    fn replacement() -> Address {
        Address::of_fn(fake_replacement as usize)
    }

    #[test]
    fn installs_and_records_original() {
        let mut provider = FakeProvider::egl();
        let settings = BootstrapSettings {
            min_surface_width: 320,
            ..BootstrapSettings::default()
        };
        let installation = install(&mut provider, &settings, replacement()).expect("install");

        assert_eq!(
            provider.installs,
            vec![(Address::of_fn(fake_swap as usize), replacement())]
        );
        assert_eq!(installation.interceptor.min_surface_width, 320);
        let null = std::ptr::null_mut();
        assert_eq!(unsafe { installation.api.swap_buffers(null, null) }, EGL_TRUE);
    }

    #[test]
    fn missing_library_is_an_error() {
        let mut provider = FakeProvider::egl();
        let settings = BootstrapSettings {
            library: "libEGL_missing.so".into(),
            ..BootstrapSettings::default()
        };
        let err = install(&mut provider, &settings, replacement()).unwrap_err();
        assert!(format!("{err:#}").contains("libEGL_missing.so"));
        assert!(provider.installs.is_empty());
    }

    #[test]
    fn missing_helper_symbol_is_an_error() {
        let mut provider = FakeProvider::egl();
        provider.symbols.remove(QUERY_SURFACE);
        let err = install(&mut provider, &BootstrapSettings::default(), replacement()).unwrap_err();
        assert!(format!("{err:#}").contains(QUERY_SURFACE));
        assert!(provider.installs.is_empty());
    }

    #[test]
    fn install_failure_is_an_error() {
        let mut provider = FakeProvider::egl();
        provider.fail_install = true;
        let err = install(&mut provider, &BootstrapSettings::default(), replacement()).unwrap_err();
        assert!(err.downcast_ref::<HookError>().is_some());
    }

    #[test]
    fn refuses_to_hook_itself() {
        let mut provider = FakeProvider::egl();
        let err = install(
            &mut provider,
            &BootstrapSettings::default(),
            Address::of_fn(fake_swap as usize),
        )
        .unwrap_err();
        assert!(err.to_string().contains("replacement itself"));
    }

    #[test]
    fn second_start_is_ignored() {
        let bootstrap = Bootstrap::new();
        let settings = BootstrapSettings {
            startup_delay: Duration::ZERO,
            ..BootstrapSettings::default()
        };
        let (sender, receiver) = mpsc::channel();

        let handle = bootstrap
            .start(settings.clone(), replacement(), FakeProvider::egl, move |installation| {
                sender.send(installation.interceptor).expect("send");
            })
            .expect("first start spawns");
        assert!(bootstrap.has_started());
        assert_eq!(handle.thread().name(), Some(THREAD_NAME));

        let second = bootstrap.start(settings, replacement(), FakeProvider::egl, |_| {
            panic!("second bootstrap must not run")
        });
        assert!(second.is_none());

        handle.join().expect("bootstrap thread");
        assert_eq!(receiver.recv().expect("installation"), PresentInterceptor::new(100));
    }

    #[test]
    fn failed_bootstrap_publishes_nothing() {
        let bootstrap = Bootstrap::new();
        let settings = BootstrapSettings {
            startup_delay: Duration::ZERO,
            symbol: "eglSwapBuffersWithDamageKHR".into(),
            ..BootstrapSettings::default()
        };
        let (sender, receiver) = mpsc::channel::<Installation>();
        let handle = bootstrap
            .start(settings, replacement(), FakeProvider::egl, move |installation| {
                let _ = sender.send(installation);
            })
            .expect("spawn");
        handle.join().expect("bootstrap thread");
        assert!(receiver.recv().is_err());
    }
}

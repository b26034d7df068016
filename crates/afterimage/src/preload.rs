//! Symbol-preload entry points (`LD_PRELOAD`, Android `wrap.sh`).

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use fxconfig::HookSection;
use tracing::{debug, warn};

use crate::egl::{EGLBoolean, EGLDisplay, EGLSurface, SwapBuffersFn, EGL_FALSE};
use crate::hook::{Address, DynamicLinkerProvider, HookError, HookProvider};
use crate::interceptor;
use crate::run;

/// Sonames tried after the configured library and the next definition in
/// link order. `libEGL.so` is only a development symlink on many distros.
const FALLBACK_LIBRARIES: &[&str] = &["libEGL.so.1", "libEGL.so"];

static PASSTHROUGH: OnceLock<SwapBuffersFn> = OnceLock::new();
static UNRESOLVED_REPORTED: AtomicBool = AtomicBool::new(false);

/// Exported over the display library's own `eglSwapBuffers`.
///
/// # Safety
///
/// Called by the host with the same contract as `eglSwapBuffers`.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn eglSwapBuffers(display: EGLDisplay, surface: EGLSurface) -> EGLBoolean {
    if let Some(installation) = interceptor::installed() {
        // SAFETY: forwarded from the host's call.
        return unsafe { interceptor::present_installed(installation, display, surface) };
    }
    match passthrough() {
        // SAFETY: `original` is a real `eglSwapBuffers` other than this one.
        Some(original) => unsafe { original(display, surface) },
        None => EGL_FALSE,
    }
}

fn self_address() -> Address {
    Address::of_fn(eglSwapBuffers as usize)
}

/// The real present, used until bootstrap has installed the hook.
///
/// Only a successful lookup is cached, so a display library loaded later by
/// the host is still picked up.
fn passthrough() -> Option<SwapBuffersFn> {
    if let Some(original) = PASSTHROUGH.get() {
        return Some(*original);
    }
    let names = run::hook_names();
    let mut provider = DynamicLinkerProvider::new();
    match resolve_passthrough(&mut provider, &names, self_address()) {
        Ok(original) => {
            // The libraries behind `original` must stay loaded.
            std::mem::forget(provider);
            Some(*PASSTHROUGH.get_or_init(|| original))
        }
        Err(err) => {
            if !UNRESOLVED_REPORTED.swap(true, Ordering::Relaxed) {
                warn!(error = %err, "cannot forward present before installation");
            }
            None
        }
    }
}

/// Finds a definition of the present symbol that is not `this`: the
/// configured library first, then the next object in link order, then the
/// well-known sonames.
fn resolve_original<P: HookProvider>(
    provider: &mut P,
    names: &HookSection,
    this: Address,
) -> Result<Address, HookError> {
    let mut last_error = None;
    let fallbacks = FALLBACK_LIBRARIES
        .iter()
        .copied()
        .filter(|library| *library != names.library);
    let candidates = [Some(names.library.as_str()), None]
        .into_iter()
        .chain(fallbacks.map(Some));

    for library in candidates {
        let resolved = match library {
            Some(library) => provider
                .open(library)
                .and_then(|handle| provider.symbol(handle, &names.symbol)),
            None => provider.next_symbol(&names.symbol),
        };
        match resolved {
            Ok(address) if address != this => return Ok(address),
            Ok(_) => {
                last_error = Some(HookError::Recursive {
                    symbol: names.symbol.clone(),
                })
            }
            Err(err) => {
                debug!(error = %err, "present candidate unavailable");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| HookError::Recursive {
        symbol: names.symbol.clone(),
    }))
}

fn resolve_passthrough<P: HookProvider>(
    provider: &mut P,
    names: &HookSection,
    this: Address,
) -> Result<SwapBuffersFn, HookError> {
    let address = resolve_original(provider, names, this)?;
    // SAFETY: resolved under the present symbol's name, so it has the
    // `eglSwapBuffers` signature.
    Ok(unsafe { std::mem::transmute::<*const c_void, SwapBuffersFn>(address.as_ptr()) })
}

#[cfg_attr(test, allow(dead_code))]
extern "C" fn on_load() {
    run::start(self_address());
}

#[cfg(not(test))]
#[used]
#[cfg_attr(
    any(target_os = "linux", target_os = "android"),
    link_section = ".init_array"
)]
static ON_LOAD: extern "C" fn() = on_load;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egl::EGL_TRUE;
    use crate::hook::LibraryHandle;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    static FORWARDED: AtomicUsize = AtomicUsize::new(0);
    static LAST_ARGS: Mutex<(usize, usize)> = Mutex::new((0, 0));

    unsafe extern "C" fn system_swap(display: EGLDisplay, surface: EGLSurface) -> EGLBoolean {
        FORWARDED.fetch_add(1, Ordering::SeqCst);
        *LAST_ARGS.lock().unwrap() = (display as usize, surface as usize);
        0x5a
    }

    unsafe extern "C" fn other_swap(_: EGLDisplay, _: EGLSurface) -> EGLBoolean {
        EGL_TRUE
    }

    /// Linker stand-in: `libraries` lists what can be opened, `next` is the
    /// definition found past this library.
    struct Linker {
        libraries: Vec<(&'static str, Address)>,
        next: Option<Address>,
        opened: Vec<String>,
    }

    impl Linker {
        fn new(libraries: Vec<(&'static str, Address)>, next: Option<Address>) -> Self {
            Self {
                libraries,
                next,
                opened: Vec::new(),
            }
        }
    }

    impl HookProvider for Linker {
        fn open(&mut self, library: &str) -> Result<LibraryHandle, HookError> {
            self.opened.push(library.to_string());
            self.libraries
                .iter()
                .position(|(name, _)| *name == library)
                .map(LibraryHandle)
                .ok_or_else(|| HookError::Open {
                    library: library.into(),
                    reason: "cannot open shared object file".into(),
                })
        }

        fn symbol(&mut self, library: LibraryHandle, _: &str) -> Result<Address, HookError> {
            self.libraries
                .get(library.0)
                .map(|(_, address)| *address)
                .ok_or(HookError::UnknownLibrary(library))
        }

        fn install(&mut self, target: Address, _: Address) -> Result<Address, HookError> {
            Ok(target)
        }

        fn next_symbol(&mut self, name: &str) -> Result<Address, HookError> {
            self.next.ok_or_else(|| HookError::Symbol {
                library: "next".into(),
                symbol: name.into(),
                reason: "undefined".into(),
            })
        }
    }

    fn missing_library() -> HookSection {
        HookSection {
            library: "libEGL_not_here.so".into(),
            ..HookSection::default()
        }
    }

    fn address(f: unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean) -> Address {
        Address::of_fn(f as usize)
    }

    #[test]
    fn missing_library_still_forwards_to_the_next_definition() {
        let mut linker = Linker::new(Vec::new(), Some(address(system_swap)));
        let original = resolve_passthrough(&mut linker, &missing_library(), self_address())
            .expect("next definition");

        let before = FORWARDED.load(Ordering::SeqCst);
        let result = unsafe { original(0xd15usize as EGLDisplay, 0x5usize as EGLSurface) };
        assert_eq!(result, 0x5a);
        assert_eq!(FORWARDED.load(Ordering::SeqCst), before + 1);
        assert_eq!(*LAST_ARGS.lock().unwrap(), (0xd15, 0x5));
    }

    #[test]
    fn versioned_soname_follows_the_link_order_lookup() {
        let mut linker = Linker::new(vec![("libEGL.so.1", address(other_swap))], None);
        let found = resolve_original(&mut linker, &missing_library(), self_address())
            .expect("soname fallback");
        assert_eq!(found, address(other_swap));
        assert_eq!(linker.opened, vec!["libEGL_not_here.so", "libEGL.so.1"]);
    }

    #[test]
    fn configured_library_wins() {
        let mut linker = Linker::new(
            vec![("libEGL.so", address(other_swap))],
            Some(address(system_swap)),
        );
        let found = resolve_original(&mut linker, &HookSection::default(), self_address())
            .expect("configured library");
        assert_eq!(found, address(other_swap));
        assert_eq!(linker.opened, vec!["libEGL.so"]);
    }

    #[test]
    fn this_library_is_never_the_original() {
        let mut linker = Linker::new(
            vec![("libEGL.so", self_address())],
            Some(address(system_swap)),
        );
        let found = resolve_original(&mut linker, &HookSection::default(), self_address())
            .expect("next definition");
        assert_eq!(found, address(system_swap));

        let mut only_self = Linker::new(vec![("libEGL.so", self_address())], None);
        let err = resolve_original(&mut only_self, &HookSection::default(), self_address())
            .unwrap_err();
        assert!(matches!(err, HookError::Open { ref library, .. } if library == "libEGL.so.1"));
    }

    #[test]
    fn unresolvable_present_reports_the_last_failure() {
        let mut linker = Linker::new(Vec::new(), None);
        let err = resolve_original(&mut linker, &missing_library(), self_address()).unwrap_err();
        assert!(matches!(err, HookError::Open { ref library, .. } if library == "libEGL.so"));
    }
}

//! Symbol resolution and hook installation behind [`HookProvider`].

use std::ffi::c_void;
#[cfg(unix)]
use std::ffi::CString;
use std::fmt;

use tracing::debug;

/// Non-null code address inside the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(usize);

impl Address {
    pub fn new(ptr: *const c_void) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self(ptr as usize))
        }
    }

    /// Wraps the address of a function item cast with `f as usize`.
    pub fn of_fn(address: usize) -> Self {
        Self(address)
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque handle to a library opened through a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LibraryHandle(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to open {library}: {reason}")]
    Open { library: String, reason: String },
    #[error("symbol {symbol} not found in {library}: {reason}")]
    Symbol {
        library: String,
        symbol: String,
        reason: String,
    },
    #[error("unknown library handle {0:?}")]
    UnknownLibrary(LibraryHandle),
    #[error("failed to hook {target:?}: {reason}")]
    Install { target: Address, reason: String },
    #[error("{symbol} resolved to the replacement itself")]
    Recursive { symbol: String },
}

/// Library name reported for lookups that search past the calling object.
pub const NEXT_IN_LINK_ORDER: &str = "<next in link order>";

/// Resolves symbols and redirects a function to a replacement.
///
/// `install` returns the address callers must use to reach the original
/// behaviour of `target`.
pub trait HookProvider {
    fn open(&mut self, library: &str) -> Result<LibraryHandle, HookError>;

    fn symbol(&mut self, library: LibraryHandle, name: &str) -> Result<Address, HookError>;

    fn install(&mut self, target: Address, replacement: Address) -> Result<Address, HookError>;

    /// Next definition of `name` after this library in symbol lookup order.
    fn next_symbol(&mut self, name: &str) -> Result<Address, HookError> {
        Err(HookError::Symbol {
            library: NEXT_IN_LINK_ORDER.into(),
            symbol: name.to_string(),
            reason: "not supported by this provider".into(),
        })
    }
}

/// Provider backed by the platform dynamic linker.
///
/// Redirection itself comes from symbol preloading: this library exports the
/// hooked symbol, so `install` has nothing to patch and the symbol resolved
/// from the real library is the original.
#[derive(Default)]
pub struct DynamicLinkerProvider {
    libraries: Vec<(String, libloading::Library)>,
}

impl DynamicLinkerProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookProvider for DynamicLinkerProvider {
    fn open(&mut self, library: &str) -> Result<LibraryHandle, HookError> {
        // SAFETY: the display library's initialisers already ran when the
        // host loaded it; opening it again only bumps its refcount.
        let handle = unsafe { libloading::Library::new(library) }.map_err(|err| {
            HookError::Open {
                library: library.to_string(),
                reason: err.to_string(),
            }
        })?;
        self.libraries.push((library.to_string(), handle));
        debug!(library, "opened library");
        Ok(LibraryHandle(self.libraries.len() - 1))
    }

    fn symbol(&mut self, library: LibraryHandle, name: &str) -> Result<Address, HookError> {
        let (library_name, handle) = self
            .libraries
            .get(library.0)
            .ok_or(HookError::UnknownLibrary(library))?;
        let missing = |reason: String| HookError::Symbol {
            library: library_name.clone(),
            symbol: name.to_string(),
            reason,
        };
        // SAFETY: the symbol is only read as an address here.
        let symbol = unsafe { handle.get::<*const c_void>(name.as_bytes()) }
            .map_err(|err| missing(err.to_string()))?;
        let address = Address::new(*symbol).ok_or_else(|| missing("resolved to null".into()))?;
        debug!(library = %library_name, symbol = name, ?address, "resolved symbol");
        Ok(address)
    }

    fn install(&mut self, target: Address, replacement: Address) -> Result<Address, HookError> {
        debug!(?target, ?replacement, "preload provider keeps the resolved symbol as original");
        Ok(target)
    }

    #[cfg(unix)]
    fn next_symbol(&mut self, name: &str) -> Result<Address, HookError> {
        let missing = |reason: &str| HookError::Symbol {
            library: NEXT_IN_LINK_ORDER.into(),
            symbol: name.to_string(),
            reason: reason.into(),
        };
        let symbol = CString::new(name).map_err(|_| missing("name contains a nul byte"))?;
        // SAFETY: `symbol` is nul-terminated; RTLD_NEXT searches the objects
        // loaded after this library.
        let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };
        let address = Address::new(ptr).ok_or_else(|| missing("no later definition"))?;
        debug!(symbol = name, ?address, "resolved next definition");
        Ok(address)
    }
}

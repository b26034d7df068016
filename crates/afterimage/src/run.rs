use std::path::Path;
use std::sync::OnceLock;

use fxconfig::{FxConfig, HookSection};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bindings::bootstrap_settings;
use crate::bootstrap::Bootstrap;
use crate::hook::{Address, DynamicLinkerProvider};
use crate::interceptor;

/// Environment variable holding the `tracing` filter directives.
pub const LOG_ENV: &str = "AFTERIMAGE_LOG";

static BOOTSTRAP: Bootstrap = Bootstrap::new();
static HOOK: OnceLock<HookSection> = OnceLock::new();

/// Library-load entry point: logging, configuration, then the background
/// installer. Only the first call does anything.
pub fn start(replacement: Address) {
    if BOOTSTRAP.has_started() {
        return;
    }
    initialise_tracing();

    let path = fxconfig::config_path_from_env();
    let config = load_config(path.as_deref());
    let _ = HOOK.set(config.hook.clone());
    let settings = bootstrap_settings(&config);
    info!(
        library = %settings.library,
        symbol = %settings.symbol,
        delay = ?settings.startup_delay,
        scale = settings.params.scale,
        "afterimage loaded"
    );

    let handle = BOOTSTRAP.start(
        settings,
        replacement,
        DynamicLinkerProvider::new,
        |installation| {
            if !interceptor::publish(installation) {
                warn!("present hook was already installed");
            }
        },
    );
    if handle.is_some() {
        debug!("bootstrap thread spawned");
    }
}

/// Library and symbol of the hooked present, as configured.
pub fn hook_names() -> HookSection {
    HOOK.get().cloned().unwrap_or_default()
}

/// Reads `path` when given; any failure falls back to the defaults.
pub fn load_config(path: Option<&Path>) -> FxConfig {
    match FxConfig::load_or_default(path) {
        Ok(config) => {
            if let Some(path) = path {
                info!(path = %path.display(), "loaded configuration");
            }
            config
        }
        Err(err) => {
            warn!(error = %err, "using default configuration");
            FxConfig::default()
        }
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    // The host may already own the global subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afterimage.toml");
        fs::write(&path, "[effect]\nscale = 3.0\n").unwrap();
        assert_eq!(load_config(Some(&path)), FxConfig::default());
    }

    #[test]
    fn valid_config_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afterimage.toml");
        fs::write(&path, "min_surface_width = 480\n").unwrap();
        assert_eq!(load_config(Some(&path)).min_surface_width, 480);
        assert_eq!(load_config(None), FxConfig::default());
    }

    #[test]
    fn hook_names_default_before_start() {
        let names = hook_names();
        assert_eq!(names.symbol, "eglSwapBuffers");
    }
}

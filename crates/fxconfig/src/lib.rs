//! TOML configuration for the afterimage post-process library.
//!
//! Every field is optional; anything left out keeps the compiled-in default.
//!
//! ```toml
//! version = 1
//! startup_delay = "1s"
//! min_surface_width = 100
//!
//! [hook]
//! library = "libEGL.so"
//! symbol = "eglSwapBuffers"
//!
//! [effect]
//! scale = 0.5
//! history_clear = "opaque"
//!
//! [effect.blend]
//! max_history = 0.94
//! min_history = 0.35
//!
//! [effect.output]
//! sharpen = 0.88
//! style = "drift"
//! drift = { amplitude = 0.002, frequency = 12.0, speed = 1.0 }
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "AFTERIMAGE_CONFIG";

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FxConfig {
    pub version: u32,
    /// Wait before resolving and installing the hook.
    #[serde(deserialize_with = "deserialize_duration")]
    pub startup_delay: Duration,
    /// Surfaces at most this wide are presented untouched.
    pub min_surface_width: u32,
    pub hook: HookSection,
    pub effect: EffectSection,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            startup_delay: Duration::from_secs(1),
            min_surface_width: 100,
            hook: HookSection::default(),
            effect: EffectSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookSection {
    pub library: String,
    pub symbol: String,
}

impl Default for HookSection {
    fn default() -> Self {
        Self {
            library: "libEGL.so".into(),
            symbol: "eglSwapBuffers".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectSection {
    pub scale: f32,
    pub history_clear: HistoryClearSetting,
    pub blend: BlendSection,
    pub anchor: AnchorSection,
    pub output: OutputSection,
}

impl Default for EffectSection {
    fn default() -> Self {
        Self {
            scale: 0.5,
            history_clear: HistoryClearSetting::Opaque,
            blend: BlendSection::default(),
            anchor: AnchorSection::default(),
            output: OutputSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryClearSetting {
    Opaque,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlendSection {
    pub max_history: f32,
    pub min_history: f32,
    pub low_motion: f32,
    pub high_motion: f32,
    pub shadow_bias: f32,
}

impl Default for BlendSection {
    fn default() -> Self {
        Self {
            max_history: 0.94,
            min_history: 0.35,
            low_motion: 0.02,
            high_motion: 0.30,
            shadow_bias: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnchorSection {
    pub center: [f32; 2],
    pub inner_radius: f32,
    pub outer_radius: f32,
}

impl Default for AnchorSection {
    fn default() -> Self {
        Self {
            center: [0.5, 0.5],
            inner_radius: 0.01,
            outer_radius: 0.12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub sharpen: f32,
    pub vibrance: f32,
    pub tonemap: bool,
    pub style: StyleSetting,
    /// Only read when `style = "drift"`.
    pub drift: DriftSection,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            sharpen: 0.88,
            vibrance: 0.2,
            tonemap: true,
            style: StyleSetting::Clarity,
            drift: DriftSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleSetting {
    Clarity,
    Drift,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriftSection {
    pub amplitude: f32,
    pub frequency: f32,
    pub speed: f32,
}

impl Default for DriftSection {
    fn default() -> Self {
        Self {
            amplitude: 0.0025,
            frequency: 12.0,
            speed: 1.0,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Path named by [`CONFIG_ENV`], if set and non-empty.
pub fn config_path_from_env() -> Option<PathBuf> {
    env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

impl FxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {SUPPORTED_VERSION}",
                self.version
            )));
        }

        if self.hook.library.trim().is_empty() {
            return Err(ConfigError::Invalid("hook.library may not be empty".into()));
        }
        if self.hook.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("hook.symbol may not be empty".into()));
        }

        self.effect.validate()
    }
}

impl EffectSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "effect.scale must be in (0, 1], got {}",
                self.scale
            )));
        }

        let blend = &self.blend;
        unit_interval("effect.blend.max_history", blend.max_history)?;
        unit_interval("effect.blend.min_history", blend.min_history)?;
        unit_interval("effect.blend.shadow_bias", blend.shadow_bias)?;
        unit_interval("effect.blend.low_motion", blend.low_motion)?;
        unit_interval("effect.blend.high_motion", blend.high_motion)?;
        if blend.low_motion >= blend.high_motion {
            return Err(ConfigError::Invalid(format!(
                "effect.blend.low_motion ({}) must be below high_motion ({})",
                blend.low_motion, blend.high_motion
            )));
        }

        let anchor = &self.anchor;
        unit_interval("effect.anchor.center[0]", anchor.center[0])?;
        unit_interval("effect.anchor.center[1]", anchor.center[1])?;
        if !anchor.inner_radius.is_finite() || anchor.inner_radius < 0.0 {
            return Err(ConfigError::Invalid(
                "effect.anchor.inner_radius must be >= 0".into(),
            ));
        }
        if !anchor.outer_radius.is_finite() || anchor.outer_radius <= anchor.inner_radius {
            return Err(ConfigError::Invalid(format!(
                "effect.anchor.outer_radius ({}) must exceed inner_radius ({})",
                anchor.outer_radius, anchor.inner_radius
            )));
        }

        let output = &self.output;
        unit_interval("effect.output.sharpen", output.sharpen)?;
        if !output.vibrance.is_finite() || output.vibrance.abs() > 1.0 {
            return Err(ConfigError::Invalid(
                "effect.output.vibrance must be in [-1, 1]".into(),
            ));
        }
        let drift = &output.drift;
        if ![drift.amplitude, drift.frequency, drift.speed]
            .iter()
            .all(|value| value.is_finite())
        {
            return Err(ConfigError::Invalid(
                "effect.output.drift values must be finite".into(),
            ));
        }
        if drift.amplitude < 0.0 {
            return Err(ConfigError::Invalid(
                "effect.output.drift.amplitude must be >= 0".into(),
            ));
        }

        Ok(())
    }
}

fn unit_interval(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be in [0, 1], got {value}"
        )))
    }
}

/// Width/height pair in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scales both axes by `scale`, rounding down and never collapsing below
    /// a single pixel. Scales outside `(0, 1]` render at full size.
    pub fn scaled(self, scale: f32) -> Self {
        let scale = sanitize_scale(scale);
        let width = (self.width as f32 * scale).floor() as u32;
        let height = (self.height as f32 * scale).floor() as u32;
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub(crate) fn gl_size(self) -> (i32, i32) {
        (
            self.width.min(i32::MAX as u32) as i32,
            self.height.min(i32::MAX as u32) as i32,
        )
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn sanitize_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale.min(1.0)
    } else {
        1.0
    }
}

/// Motion-adaptive temporal blend settings for the accumulation pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendParams {
    /// History weight used while the image is (nearly) stationary.
    pub max_history: f32,
    /// History weight used during fast motion.
    pub min_history: f32,
    /// Luma difference at or below which the image counts as stationary.
    pub low_motion: f32,
    /// Luma difference at or above which the image counts as fast motion.
    pub high_motion: f32,
    /// Extra pull towards history when history is darker than the new frame.
    pub shadow_bias: f32,
}

impl Default for BlendParams {
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

/// Screen-space region that always shows the newest frame (e.g. a crosshair).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorParams {
    /// Anchor position in normalised texture coordinates.
    pub center: [f32; 2],
    /// Inside this radius history never contributes.
    pub inner_radius: f32,
    /// Beyond this radius the full temporal blend applies.
    pub outer_radius: f32,
}

impl Default for AnchorParams {
    fn default() -> Self {
        Self {
            center: [0.5, 0.5],
            inner_radius: 0.01,
            outer_radius: 0.12,
        }
    }
}

/// Stylised treatment applied by the output pass before sharpening.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum OutputStyle {
    /// Sharpen, vibrance and tonemap only.
    #[default]
    Clarity,
    /// Time-varying sine distortion of the sampling coordinates.
    Drift {
        amplitude: f32,
        frequency: f32,
        speed: f32,
    },
}

impl OutputStyle {
    /// Whether the output program consumes the `u_time` uniform.
    pub fn is_time_varying(self) -> bool {
        matches!(self, OutputStyle::Drift { .. })
    }
}

/// Settings for the clarity/output pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputParams {
    /// Contrast-adaptive sharpening strength in `[0, 1]`.
    pub sharpen: f32,
    /// Saturation boost for muted colours; `0.0` disables the stage.
    pub vibrance: f32,
    /// Apply the ACES filmic curve.
    pub tonemap: bool,
    pub style: OutputStyle,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            sharpen: 0.88,
            vibrance: 0.2,
            tonemap: true,
            style: OutputStyle::Clarity,
        }
    }
}

/// Base colour written into both history targets after (re)allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HistoryClear {
    #[default]
    Opaque,
    Transparent,
}

impl HistoryClear {
    pub fn rgba(self) -> [f32; 4] {
        match self {
            HistoryClear::Opaque => [0.0, 0.0, 0.0, 1.0],
            HistoryClear::Transparent => [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Complete parameter set for one pipeline instance.
///
/// Everything here is baked into the generated shader sources, so changing a
/// value requires a re-initialisation of the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectParams {
    /// Internal resolution factor, `0 < scale <= 1`.
    pub scale: f32,
    pub blend: BlendParams,
    pub anchor: AnchorParams,
    pub output: OutputParams,
    pub history_clear: HistoryClear,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            scale: 0.5,
            blend: BlendParams::default(),
            anchor: AnchorParams::default(),
            output: OutputParams::default(),
            history_clear: HistoryClear::default(),
        }
    }
}

impl EffectParams {
    pub fn internal_extent(&self, surface: Extent) -> Extent {
        surface.scaled(self.scale)
    }
}

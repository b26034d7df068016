use fxconfig::{EffectSection, FxConfig, HistoryClearSetting, StyleSetting};
use renderer::{
    AnchorParams, BlendParams, EffectParams, HistoryClear, OutputParams, OutputStyle,
};

use crate::bootstrap::BootstrapSettings;

pub fn effect_params(section: &EffectSection) -> EffectParams {
    let blend = &section.blend;
    let anchor = &section.anchor;
    let output = &section.output;
    EffectParams {
        scale: section.scale,
        blend: BlendParams {
            max_history: blend.max_history,
            min_history: blend.min_history,
            low_motion: blend.low_motion,
            high_motion: blend.high_motion,
            shadow_bias: blend.shadow_bias,
        },
        anchor: AnchorParams {
            center: anchor.center,
            inner_radius: anchor.inner_radius,
            outer_radius: anchor.outer_radius,
        },
        output: OutputParams {
            sharpen: output.sharpen,
            vibrance: output.vibrance,
            tonemap: output.tonemap,
            style: match output.style {
                StyleSetting::Clarity => OutputStyle::Clarity,
                StyleSetting::Drift => OutputStyle::Drift {
                    amplitude: output.drift.amplitude,
                    frequency: output.drift.frequency,
                    speed: output.drift.speed,
                },
            },
        },
        history_clear: map_history_clear(section.history_clear),
    }
}

pub fn map_history_clear(setting: HistoryClearSetting) -> HistoryClear {
    match setting {
        HistoryClearSetting::Opaque => HistoryClear::Opaque,
        HistoryClearSetting::Transparent => HistoryClear::Transparent,
    }
}

pub fn bootstrap_settings(config: &FxConfig) -> BootstrapSettings {
    BootstrapSettings {
        startup_delay: config.startup_delay,
        library: config.hook.library.clone(),
        symbol: config.hook.symbol.clone(),
        min_surface_width: config.min_surface_width,
        params: effect_params(&config.effect),
    }
}

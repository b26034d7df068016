//! CPU mirror of the per-pixel math baked into the GLSL passes.
//!
//! The software backend evaluates passes through these functions, and the
//! shader sources in [`crate::compile`] encode exactly the same expressions.
//! Keep both sides in sync when changing a formula.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::types::{AnchorParams, BlendParams, OutputParams, OutputStyle};

/// Rec.601 luma weights.
pub const LUMA: Vec3 = Vec3::new(0.299, 0.587, 0.114);

/// Guards the contrast ratio against division by zero on saturated highlights.
const CONTRAST_EPSILON: f32 = 0.001;

/// Time is wrapped at this period before reaching the shader so `mediump`
/// floats keep sub-frame precision.
pub const TIME_WRAP_SECONDS: f32 = 512.0;

pub fn luma(rgb: Vec3) -> f32 {
    rgb.dot(LUMA)
}

/// GLSL `smoothstep`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// History weight chosen from the frame-to-frame luma difference.
pub fn history_weight(blend: &BlendParams, luma_delta: f32) -> f32 {
    let motion = smoothstep(blend.low_motion, blend.high_motion, luma_delta.abs());
    mix(blend.max_history, blend.min_history, motion)
}

/// History weight after the shadow nudge has been folded in: a darker
/// history pulls a further `shadow_bias` of the remaining distance.
pub fn effective_history_weight(blend: &BlendParams, current_luma: f32, history_luma: f32) -> f32 {
    let weight = history_weight(blend, current_luma - history_luma);
    if history_luma < current_luma {
        weight + (1.0 - weight) * blend.shadow_bias
    } else {
        weight
    }
}

/// 0 at the anchor, 1 outside `outer_radius`.
pub fn anchor_mask(anchor: &AnchorParams, uv: Vec2) -> f32 {
    let distance = uv.distance(Vec2::from(anchor.center));
    smoothstep(anchor.inner_radius, anchor.outer_radius, distance)
}

/// Accumulation pass for a single texel.
pub fn accumulate(
    blend: &BlendParams,
    anchor: &AnchorParams,
    uv: Vec2,
    current: Vec4,
    history: Vec4,
) -> Vec4 {
    let current_luma = luma(current.xyz());
    let history_luma = luma(history.xyz());
    let weight = effective_history_weight(blend, current_luma, history_luma);
    let result = current.lerp(history, weight);
    current.lerp(result, anchor_mask(anchor, uv))
}

/// Plus-shaped neighbourhood fetched around one output texel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossTaps {
    pub center: Vec4,
    pub north: Vec4,
    pub south: Vec4,
    pub east: Vec4,
    pub west: Vec4,
}

impl CrossTaps {
    pub fn flat(color: Vec4) -> Self {
        Self {
            center: color,
            north: color,
            south: color,
            east: color,
            west: color,
        }
    }
}

/// Contrast-adaptive sharpening applied as a luma delta.
pub fn sharpen(strength: f32, taps: &CrossTaps) -> Vec3 {
    let center = luma(taps.center.xyz());
    let north = luma(taps.north.xyz());
    let south = luma(taps.south.xyz());
    let east = luma(taps.east.xyz());
    let west = luma(taps.west.xyz());

    let brightest = center.max(north.max(south)).max(east.max(west));
    let darkest = center.min(north.min(south)).min(east.min(west));
    let amount = (darkest / (1.0 - brightest + CONTRAST_EPSILON))
        .clamp(0.0, 1.0)
        .sqrt();

    let peak = -1.0 / mix(8.0, 5.0, amount * strength);
    let sharpened = (center + (north + south + east + west) * peak) / (1.0 + 4.0 * peak);

    taps.center.xyz() + Vec3::splat(sharpened - center)
}

/// Pushes muted colours away from their brightest channel.
pub fn vibrance(amount: f32, rgb: Vec3) -> Vec3 {
    let brightest = rgb.max_element();
    let saturation = (brightest - rgb.min_element()).max(0.0);
    rgb.lerp(Vec3::splat(brightest), (1.0 - saturation.sqrt()) * -amount)
}

/// ACES filmic approximation, clamped to the displayable range.
pub fn tonemap_aces(rgb: Vec3) -> Vec3 {
    let numerator = rgb * (rgb * 2.51 + Vec3::splat(0.03));
    let denominator = rgb * (rgb * 2.43 + Vec3::splat(0.59)) + Vec3::splat(0.14);
    (numerator / denominator).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Sampling coordinate used by the output pass for `style`.
pub fn styled_uv(style: OutputStyle, uv: Vec2, time: f32) -> Vec2 {
    match style {
        OutputStyle::Clarity => uv,
        OutputStyle::Drift {
            amplitude,
            frequency,
            speed,
        } => {
            let phase = time * speed;
            Vec2::new(
                uv.x + amplitude * (uv.y * frequency + phase).sin(),
                uv.y + amplitude * (uv.x * frequency + phase).cos(),
            )
        }
    }
}

/// Sharpen, vibrance and tonemap for one output texel; alpha is always opaque.
pub fn finish(output: &OutputParams, taps: &CrossTaps) -> Vec4 {
    let mut rgb = sharpen(output.sharpen, taps);
    if output.vibrance != 0.0 {
        rgb = vibrance(output.vibrance, rgb);
    }
    if output.tonemap {
        rgb = tonemap_aces(rgb);
    }
    rgb.extend(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }

    #[test]
    fn stationary_pixels_use_maximum_history() {
        let blend = BlendParams::default();
        assert_close(history_weight(&blend, 0.0), blend.max_history);
        assert_close(history_weight(&blend, 0.01), blend.max_history);
        assert_close(history_weight(&blend, -0.015), blend.max_history);
    }

    #[test]
    fn fast_motion_uses_minimum_history() {
        let blend = BlendParams::default();
        assert_close(history_weight(&blend, 0.31), blend.min_history);
        assert_close(history_weight(&blend, 0.9), blend.min_history);
    }

    #[test]
    fn moderate_motion_lands_between_the_bounds() {
        let blend = BlendParams::default();
        let weight = history_weight(&blend, 0.16);
        assert!(weight < blend.max_history && weight > blend.min_history);
    }

    #[test]
    fn accumulation_applies_the_effective_weight() {
        let blend = BlendParams::default();
        let anchor = AnchorParams::default();
        let uv = Vec2::new(0.05, 0.05);
        let current = Vec4::new(0.40, 0.40, 0.40, 1.0);
        let brighter_history = Vec4::new(0.41, 0.41, 0.41, 1.0);

        let out = accumulate(&blend, &anchor, uv, current, brighter_history);
        let expected = current.lerp(brighter_history, blend.max_history);
        assert!((out - expected).abs().max_element() < 1e-5);

        let darker_history = Vec4::new(0.39, 0.39, 0.39, 1.0);
        let weight = effective_history_weight(&blend, 0.40, 0.39);
        let out = accumulate(&blend, &anchor, uv, current, darker_history);
        let expected = current.lerp(darker_history, weight);
        assert!((out - expected).abs().max_element() < 1e-5);
        assert!(weight > blend.max_history);
    }

    #[test]
    fn shadow_nudge_matches_the_two_step_shader_blend() {
        let blend = BlendParams::default();
        let anchor = AnchorParams::default();
        let uv = Vec2::new(0.95, 0.05);
        let current = Vec4::new(0.8, 0.6, 0.5, 1.0);
        let history = Vec4::new(0.3, 0.2, 0.2, 1.0);

        let weight = history_weight(&blend, luma(current.xyz()) - luma(history.xyz()));
        let two_step = current.lerp(history, weight).lerp(history, blend.shadow_bias);
        let out = accumulate(&blend, &anchor, uv, current, history);
        assert!((out - two_step).abs().max_element() < 1e-5);
    }

    #[test]
    fn anchor_texel_ignores_history() {
        let blend = BlendParams::default();
        let anchor = AnchorParams::default();
        let current = Vec4::new(0.8, 0.1, 0.3, 1.0);
        for history in [Vec4::ZERO, Vec4::ONE, Vec4::new(0.2, 0.9, 0.5, 0.0)] {
            let out = accumulate(&blend, &anchor, Vec2::new(0.5, 0.5), current, history);
            assert_eq!(out, current);
        }
    }

    #[test]
    fn far_from_anchor_history_contributes() {
        let anchor = AnchorParams::default();
        assert_close(anchor_mask(&anchor, Vec2::new(0.5, 0.5)), 0.0);
        assert_close(anchor_mask(&anchor, Vec2::new(0.9, 0.5)), 1.0);
        let edge = anchor_mask(&anchor, Vec2::new(0.56, 0.5));
        assert!(edge > 0.0 && edge < 1.0);
    }

    #[test]
    fn flat_regions_are_not_sharpened() {
        for color in [
            Vec4::new(0.25, 0.5, 0.75, 1.0),
            Vec4::new(1.0, 1.0, 1.0, 1.0),
            Vec4::ZERO,
        ] {
            let out = sharpen(0.88, &CrossTaps::flat(color));
            assert!((out - color.xyz()).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn edges_gain_contrast() {
        let dark = Vec4::new(0.2, 0.2, 0.2, 1.0);
        let taps = CrossTaps {
            center: Vec4::new(0.5, 0.5, 0.5, 1.0),
            north: dark,
            south: dark,
            east: dark,
            west: dark,
        };
        let out = sharpen(0.88, &taps);
        assert!(out.x > 0.5);
    }

    #[test]
    fn vibrance_leaves_greys_alone_and_boosts_muted_colours() {
        let grey = Vec3::splat(0.4);
        assert!((vibrance(0.2, grey) - grey).abs().max_element() < 1e-6);

        let muted = Vec3::new(0.5, 0.45, 0.4);
        let boosted = vibrance(0.2, muted);
        let before = muted.max_element() - muted.min_element();
        let after = boosted.max_element() - boosted.min_element();
        assert!(after > before);
    }

    #[test]
    fn aces_is_monotonic_and_bounded() {
        let mut last = -1.0;
        for step in 0..=20 {
            let x = step as f32 / 10.0;
            let y = tonemap_aces(Vec3::splat(x)).x;
            assert!(y >= last);
            assert!((0.0..=1.0).contains(&y));
            last = y;
        }
        assert_close(tonemap_aces(Vec3::ZERO).x, 0.0);
    }

    #[test]
    fn finished_texels_are_opaque() {
        let taps = CrossTaps::flat(Vec4::new(0.3, 0.6, 0.2, 0.0));
        let out = finish(&OutputParams::default(), &taps);
        assert_eq!(out.w, 1.0);
    }

    #[test]
    fn drift_moves_coordinates_over_time() {
        let style = OutputStyle::Drift {
            amplitude: 0.01,
            frequency: 10.0,
            speed: 2.0,
        };
        let uv = Vec2::new(0.3, 0.7);
        assert_eq!(styled_uv(OutputStyle::Clarity, uv, 5.0), uv);
        let a = styled_uv(style, uv, 0.0);
        let b = styled_uv(style, uv, 1.0);
        assert!(a.distance(b) > 0.0);
        assert!(a.distance(uv) <= 0.015);
    }
}

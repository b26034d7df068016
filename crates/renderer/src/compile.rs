//! GLSL ES sources for the two post-processing passes.
//!
//! Effect parameters are formatted straight into the program text, so every
//! program is specialised for one [`EffectParams`] value and carries no
//! per-frame uniforms apart from its samplers and (optionally) `u_time`.

use crate::types::{AnchorParams, BlendParams, EffectParams, OutputParams, OutputStyle};

/// Sampler uniforms of the accumulation pass and their texture units.
pub const ACCUMULATE_SAMPLERS: &[(&str, u32)] = &[("c", 0), ("h", 1)];
/// Sampler uniforms of the output pass and their texture units.
pub const OUTPUT_SAMPLERS: &[(&str, u32)] = &[("t", 0)];
/// Elapsed-time uniform read by time-varying output styles.
pub const TIME_UNIFORM: &str = "u_time";

/// Which pass a program implements, along with the parameters it was built for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PassKind {
    Accumulate {
        blend: BlendParams,
        anchor: AnchorParams,
    },
    Output(OutputParams),
}

/// Everything a backend needs to build one program.
#[derive(Clone, Debug)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub kind: PassKind,
    pub vertex: String,
    pub fragment: String,
    pub samplers: &'static [(&'static str, u32)],
}

pub fn accumulate_program(params: &EffectParams) -> ProgramDesc {
    ProgramDesc {
        label: "accumulate",
        kind: PassKind::Accumulate {
            blend: params.blend,
            anchor: params.anchor,
        },
        vertex: VERTEX_SHADER_GLSL.to_string(),
        fragment: accumulate_fragment(&params.blend, &params.anchor),
        samplers: ACCUMULATE_SAMPLERS,
    }
}

pub fn output_program(params: &EffectParams) -> ProgramDesc {
    ProgramDesc {
        label: "output",
        kind: PassKind::Output(params.output),
        vertex: VERTEX_SHADER_GLSL.to_string(),
        fragment: output_fragment(&params.output),
        samplers: OUTPUT_SAMPLERS,
    }
}

/// Formats a float as a GLSL literal; always carries a decimal point.
fn glsl_float(value: f32) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    format!("{value:.6}")
}

fn accumulate_fragment(blend: &BlendParams, anchor: &AnchorParams) -> String {
    format!(
        r"#version 300 es
precision mediump float;
in mediump vec2 v;
uniform sampler2D c;
uniform sampler2D h;
out vec4 o;

const vec3 LUMA = vec3(0.299, 0.587, 0.114);

void main() {{
    vec4 curr = texture(c, v);
    vec4 hist = texture(h, v);

    float lC = dot(curr.rgb, LUMA);
    float lH = dot(hist.rgb, LUMA);
    float motion = smoothstep({low}, {high}, abs(lC - lH));
    float weight = mix({max_history}, {min_history}, motion);

    vec4 result = mix(curr, hist, weight);
    if (lH < lC) {{
        result = mix(result, hist, {shadow_bias});
    }}

    float mask = smoothstep({inner}, {outer}, distance(v, vec2({anchor_x}, {anchor_y})));
    o = mix(curr, result, mask);
}}
",
        low = glsl_float(blend.low_motion),
        high = glsl_float(blend.high_motion),
        max_history = glsl_float(blend.max_history),
        min_history = glsl_float(blend.min_history),
        shadow_bias = glsl_float(blend.shadow_bias),
        inner = glsl_float(anchor.inner_radius),
        outer = glsl_float(anchor.outer_radius),
        anchor_x = glsl_float(anchor.center[0]),
        anchor_y = glsl_float(anchor.center[1]),
    )
}

fn output_fragment(output: &OutputParams) -> String {
    let (time_decl, uv_expr) = match output.style {
        OutputStyle::Clarity => (String::new(), "v".to_string()),
        OutputStyle::Drift {
            amplitude,
            frequency,
            speed,
        } => (
            format!("uniform float {TIME_UNIFORM};\n"),
            format!(
                "v + {amp} * vec2(sin(v.y * {freq} + {TIME_UNIFORM} * {speed}), cos(v.x * {freq} + {TIME_UNIFORM} * {speed}))",
                amp = glsl_float(amplitude),
                freq = glsl_float(frequency),
                speed = glsl_float(speed),
            ),
        ),
    };

    let vibrance = if output.vibrance != 0.0 {
        format!(
            r"    float maxRGB = max(col.r, max(col.g, col.b));
    float sat = max(maxRGB - min(col.r, min(col.g, col.b)), 0.0);
    col.rgb = mix(col.rgb, vec3(maxRGB), (1.0 - sqrt(sat)) * {amount});
",
            amount = glsl_float(-output.vibrance)
        )
    } else {
        String::new()
    };

    let tonemap = if output.tonemap {
        r"    vec3 x = col.rgb;
    col.rgb = clamp((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14), 0.0, 1.0);
"
    } else {
        ""
    };

    format!(
        r"#version 300 es
precision mediump float;
in mediump vec2 v;
uniform sampler2D t;
{time_decl}out vec4 o;

const vec3 LUMA = vec3(0.299, 0.587, 0.114);

void main() {{
    vec2 uv = {uv_expr};
    vec4 col = texture(t, uv);
    float lC = dot(col.rgb, LUMA);
    float lN = dot(textureOffset(t, uv, ivec2(0, -1)).rgb, LUMA);
    float lS = dot(textureOffset(t, uv, ivec2(0, 1)).rgb, LUMA);
    float lE = dot(textureOffset(t, uv, ivec2(1, 0)).rgb, LUMA);
    float lW = dot(textureOffset(t, uv, ivec2(-1, 0)).rgb, LUMA);

    float mx = max(lC, max(max(lN, lS), max(lE, lW)));
    float mn = min(lC, min(min(lN, lS), min(lE, lW)));
    float amt = sqrt(clamp(mn / (1.0 - mx + 0.001), 0.0, 1.0));
    float peak = -1.0 / mix(8.0, 5.0, amt * {sharpen});
    float sharpLuma = (lC + (lN + lS + lE + lW) * peak) / (1.0 + 4.0 * peak);
    col.rgb += sharpLuma - lC;
{vibrance}{tonemap}
    o = vec4(col.rgb, 1.0);
}}
",
        sharpen = glsl_float(output.sharpen),
    )
}

/// Fullscreen quad vertex stage: position at location 0, texcoord at 1.
const VERTEX_SHADER_GLSL: &str = r"#version 300 es
layout(location = 0) in vec4 p;
layout(location = 1) in vec2 t;
out mediump vec2 v;

void main() {
    gl_Position = p;
    v = t;
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_always_have_a_decimal_point() {
        assert_eq!(glsl_float(1.0), "1.000000");
        assert_eq!(glsl_float(0.94), "0.940000");
        assert_eq!(glsl_float(-0.2), "-0.200000");
        assert_eq!(glsl_float(f32::INFINITY), "0.000000");
    }

    #[test]
    fn accumulate_source_bakes_blend_constants() {
        let desc = accumulate_program(&EffectParams::default());
        assert!(desc.fragment.contains("uniform sampler2D c;"));
        assert!(desc.fragment.contains("uniform sampler2D h;"));
        assert!(desc.fragment.contains("smoothstep(0.020000, 0.300000"));
        assert!(desc.fragment.contains("mix(0.940000, 0.350000, motion)"));
        assert!(desc.fragment.contains("vec2(0.500000, 0.500000)"));
        assert_eq!(desc.samplers, ACCUMULATE_SAMPLERS);
    }

    #[test]
    fn clarity_output_has_no_time_uniform() {
        let desc = output_program(&EffectParams::default());
        assert!(!desc.fragment.contains(TIME_UNIFORM));
        assert!(desc.fragment.contains("textureOffset(t, uv, ivec2(0, -1))"));
        assert!(desc.fragment.contains("o = vec4(col.rgb, 1.0);"));
        assert!(desc.fragment.contains("2.51"));
    }

    #[test]
    fn drift_output_declares_time() {
        let mut params = EffectParams::default();
        params.output.style = OutputStyle::Drift {
            amplitude: 0.003,
            frequency: 12.0,
            speed: 1.5,
        };
        let desc = output_program(&params);
        assert!(desc.fragment.contains("uniform float u_time;"));
        assert!(desc.fragment.contains("u_time * 1.500000"));
    }

    #[test]
    fn disabled_stages_are_omitted() {
        let mut params = EffectParams::default();
        params.output.vibrance = 0.0;
        params.output.tonemap = false;
        let desc = output_program(&params);
        assert!(!desc.fragment.contains("maxRGB"));
        assert!(!desc.fragment.contains("2.43"));
    }

    #[test]
    fn both_passes_share_the_quad_vertex_stage() {
        let params = EffectParams::default();
        assert_eq!(
            accumulate_program(&params).vertex,
            output_program(&params).vertex
        );
        assert!(VERTEX_SHADER_GLSL.contains("layout(location = 1) in vec2 t;"));
    }
}

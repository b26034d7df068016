use bytemuck::{Pod, Zeroable};

/// Interleaved clip-space position and texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
}

pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, 1.0],
        texcoord: [0.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, -1.0],
        texcoord: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        texcoord: [1.0, 0.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        texcoord: [1.0, 1.0],
    },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub const QUAD_STRIDE: i32 = std::mem::size_of::<QuadVertex>() as i32;
pub const TEXCOORD_OFFSET: i32 = std::mem::size_of::<[f32; 2]>() as i32;

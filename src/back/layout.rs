//! The buffer layout of host-shareable types, the one every backend reproduces.
//!
//! Structs and fixed arrays follow std140, which satisfies the alignment rules of both uniform and storage
//! buffers, so a struct keeps one set of offsets wherever it is used. Only the stride of a runtime array uses the
//! tighter std430 rule. Matrices are laid out as `rows` vectors of `cols` floats, one per 16 bytes, and only
//! four-column matrices are accepted in buffers. SPIR-V states these offsets with decorations, the text backends
//! by declaring padding words and padded array elements (see [crate::back::text]).

use crate::types::{StructDef, Type};

pub const MATRIX_STRIDE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

fn round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}

fn vector(n: u8) -> Layout {
    match n {
        2 => Layout { size: 8, align: 8 },
        3 => Layout { size: 12, align: 16 },
        _ => Layout { size: 16, align: 16 },
    }
}

pub fn std140(ty: &Type, structs: &[StructDef]) -> Layout {
    match ty {
        Type::Scalar(_) => Layout { size: 4, align: 4 },
        Type::Vector(_, n) => vector(*n),
        Type::Matrix { rows, .. } => Layout {
            size: *rows as u32 * MATRIX_STRIDE,
            align: 16,
        },
        Type::Array(elem, len) => {
            let stride = array_stride(elem, structs);
            Layout {
                size: stride * len.unwrap_or(0),
                align: round_up(std140(elem, structs).align, 16),
            }
        }
        Type::Struct(id) => {
            let def = &structs[id.0];
            let align = round_up(
                def.members
                    .iter()
                    .map(|m| std140(&m.ty, structs).align)
                    .max()
                    .unwrap_or(16),
                16,
            );
            let end = member_offsets(def, structs)
                .iter()
                .zip(&def.members)
                .map(|(offset, m)| offset + std140(&m.ty, structs).size)
                .max()
                .unwrap_or(0);
            Layout {
                size: round_up(end, align),
                align,
            }
        }
        Type::Void | Type::Resource(_) => Layout { size: 0, align: 4 },
    }
}

/// Byte offset of each member
pub fn member_offsets(def: &StructDef, structs: &[StructDef]) -> Vec<u32> {
    let mut offset = 0;
    def.members
        .iter()
        .map(|member| {
            let layout = std140(&member.ty, structs);
            let start = round_up(offset, layout.align);
            offset = start + layout.size;
            start
        })
        .collect()
}

/// Stride of a fixed-size array inside a buffer
pub fn array_stride(elem: &Type, structs: &[StructDef]) -> u32 {
    let layout = std140(elem, structs);
    round_up(layout.size, round_up(layout.align, 16))
}

/// Stride of the runtime array behind a structured buffer
pub fn runtime_array_stride(elem: &Type, structs: &[StructDef]) -> u32 {
    let layout = match elem {
        Type::Array(..) | Type::Struct(_) | Type::Matrix { .. } => std140(elem, structs),
        other => std430_scalar_vector(other),
    };
    round_up(layout.size, layout.align)
}

fn std430_scalar_vector(ty: &Type) -> Layout {
    match ty {
        Type::Vector(_, n) => vector(*n),
        _ => Layout { size: 4, align: 4 },
    }
}

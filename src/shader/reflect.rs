//! WGSL front-end: parse, validate and reflect the uniform block with naga.
//!
//! Both graphics backends go through here, so a shader that compiles in tests
//! compiles for the GPU and resolves to the same uniform locations.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, ScalarKind, TypeInner, VectorSize};

use super::{ShaderStage, UniformKind, UniformLocation};

/// Size of the host-side uniform buffer (bytes)
pub const UNIFORM_BLOCK_SIZE: u32 = 16 * 1024;

/// Bind group and binding the uniform block must use
pub const UNIFORM_GROUP: u32 = 0;
pub const UNIFORM_BINDING: u32 = 0;

/// Reflected members of the uniform block, by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformLayout {
    /// Declared size of the block (bytes); 0 when the stage declares none
    pub span: u32,
    members: BTreeMap<String, UniformLocation>,
}

impl UniformLayout {
    pub fn get(&self, name: &str) -> Option<UniformLocation> {
        self.members.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// One validated shader stage.
#[derive(Debug, Clone)]
pub struct StageModule {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub uniforms: UniformLayout,
}

/// Parse and validate `source` as a single stage.
///
/// The error string is the rendered diagnostic, suitable for a compile log.
pub fn parse_stage(stage: ShaderStage, source: &str) -> Result<StageModule, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == wanted)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| format!("no @{stage} entry point"))?;

    let uniforms = reflect_uniforms(&module)?;

    Ok(StageModule {
        stage,
        entry_point,
        uniforms,
    })
}

fn reflect_uniforms(module: &naga::Module) -> Result<UniformLayout, String> {
    let block = module.global_variables.iter().find(|(_, var)| {
        var.space == AddressSpace::Uniform
            && var
                .binding
                .as_ref()
                .is_some_and(|b| b.group == UNIFORM_GROUP && b.binding == UNIFORM_BINDING)
    });

    let Some((_, var)) = block else {
        return Ok(UniformLayout::default());
    };

    let TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
        return Err(format!(
            "uniform at @group({UNIFORM_GROUP}) @binding({UNIFORM_BINDING}) must be a struct"
        ));
    };

    let mut layout = UniformLayout {
        span: *span,
        members: BTreeMap::new(),
    };
    for member in members {
        let Some(name) = &member.name else { continue };
        // Members of other types are allowed; they are just not fed by the host.
        if let Some(kind) = member_kind(module, &module.types[member.ty].inner) {
            layout.members.insert(
                name.clone(),
                UniformLocation {
                    offset: member.offset,
                    kind,
                },
            );
        }
    }
    Ok(layout)
}

fn member_kind(module: &naga::Module, inner: &TypeInner) -> Option<UniformKind> {
    match *inner {
        TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Uint => Some(UniformKind::Uint),
            _ => None,
        },
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => Some(UniformKind::Vec2),
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.width == 4 => Some(UniformKind::Mat4),
        TypeInner::Array {
            base,
            size: ArraySize::Constant(elements),
            stride,
        } => {
            let components = match module.types[base].inner {
                TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Float => 1,
                TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => {
                    size as u32
                }
                _ => return None,
            };
            Some(UniformKind::FloatArray {
                elements: elements.get(),
                stride,
                components,
            })
        }
        _ => None,
    }
}

/// Combine the vertex and fragment views of the uniform block.
///
/// A member declared by both stages must agree on offset and type.
pub fn merge_uniforms(vertex: &UniformLayout, fragment: &UniformLayout) -> Result<UniformLayout, String> {
    let mut merged = vertex.clone();
    for (name, location) in &fragment.members {
        match merged.members.get(name) {
            Some(existing) if existing != location => {
                return Err(format!(
                    "uniform '{name}' differs between stages ({existing:?} vs {location:?})"
                ));
            }
            Some(_) => {}
            None => {
                merged.members.insert(name.clone(), *location);
            }
        }
    }
    merged.span = vertex.span.max(fragment.span);

    if merged.span > UNIFORM_BLOCK_SIZE {
        return Err(format!(
            "uniform block is {} bytes, the limit is {UNIFORM_BLOCK_SIZE}",
            merged.span
        ));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = include_str!("../../shaders/default.vert.wgsl");
    const FRAGMENT: &str = include_str!("../../shaders/default.frag.wgsl");

    #[test]
    fn test_shipped_shaders_validate() {
        let vs = parse_stage(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = parse_stage(ShaderStage::Fragment, FRAGMENT).unwrap();

        assert_eq!(vs.entry_point, "vs_main");
        assert_eq!(fs.entry_point, "fs_main");
        assert!(vs.uniforms.is_empty());
        assert!(merge_uniforms(&vs.uniforms, &fs.uniforms).is_ok());
    }

    #[test]
    fn test_reflects_default_fragment_layout() {
        let fs = parse_stage(ShaderStage::Fragment, FRAGMENT).unwrap();
        let layout = &fs.uniforms;

        assert_eq!(
            layout.get("transform"),
            Some(UniformLocation { offset: 0, kind: UniformKind::Mat4 })
        );
        assert_eq!(
            layout.get("resolution"),
            Some(UniformLocation { offset: 64, kind: UniformKind::Vec2 })
        );
        assert_eq!(
            layout.get("time"),
            Some(UniformLocation { offset: 72, kind: UniformKind::Float })
        );
        assert_eq!(
            layout.get("waveCount"),
            Some(UniformLocation { offset: 76, kind: UniformKind::Uint })
        );
        assert_eq!(
            layout.get("waveData"),
            Some(UniformLocation {
                offset: 80,
                kind: UniformKind::FloatArray { elements: 256, stride: 16, components: 4 },
            })
        );
        assert_eq!(layout.span, 80 + 256 * 16);
    }

    #[test]
    fn test_syntax_error_is_rendered() {
        let err = parse_stage(ShaderStage::Fragment, "@fragment fn fs_main( {").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_wrong_stage_entry_point_rejected() {
        let err = parse_stage(ShaderStage::Vertex, FRAGMENT).unwrap_err();
        assert!(err.contains("vertex"), "{err}");
    }

    #[test]
    fn test_conflicting_member_fails_merge() {
        let vs = parse_stage(
            ShaderStage::Vertex,
            r#"
                struct Uniforms { time: u32 };
                @group(0) @binding(0) var<uniform> u: Uniforms;
                @vertex
                fn vs_main(@location(0) p: vec2<f32>) -> @builtin(position) vec4<f32> {
                    return vec4<f32>(p, f32(u.time), 1.0);
                }
            "#,
        )
        .unwrap();
        let fs = parse_stage(ShaderStage::Fragment, FRAGMENT).unwrap();

        let err = merge_uniforms(&vs.uniforms, &fs.uniforms).unwrap_err();
        assert!(err.contains("time"), "{err}");
    }

    #[test]
    fn test_oversized_block_fails_merge() {
        let fs = parse_stage(
            ShaderStage::Fragment,
            r#"
                struct Big { data: array<vec4<f32>, 2048> };
                @group(0) @binding(0) var<uniform> big: Big;
                @fragment
                fn fs_main() -> @location(0) vec4<f32> {
                    return big.data[0];
                }
            "#,
        )
        .unwrap();

        let err = merge_uniforms(&UniformLayout::default(), &fs.uniforms).unwrap_err();
        assert!(err.contains("limit"), "{err}");
    }
}

//! SPIR-V reflection.
//!
//! [`uniform_usage`] walks the module's instructions with spirq's parser and
//! reports, for every uniform-qualified variable and every member of a uniform
//! block, whether a function body reads or writes it. Members count as used when an access
//! chain indexes them with a constant. [`descriptor_bindings`] lists set and
//! binding slots through spirq.

use crate::error::{Result, ShaderError};
use spirq::parse::SpirvBinary;
use spirq::spirv::{Op, StorageClass};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;

/// Uniform name to whether the shader uses it.
///
/// Block members are keyed `block.member`, where `block` is the instance name
/// or, for anonymous instances, the block type name.
pub type UniformUsage = BTreeMap<String, bool>;

#[derive(Debug)]
struct UniformVariable {
    id: u32,
    pointee: u32,
}

fn reflection_error(e: impl Debug) -> ShaderError {
    ShaderError::Reflection(format!("{e:?}"))
}

fn is_uniform_storage(class: u32) -> bool {
    matches!(
        StorageClass::from_u32(class),
        Some(
            StorageClass::UniformConstant
                | StorageClass::Uniform
                | StorageClass::PushConstant
                | StorageClass::StorageBuffer
        )
    )
}

/// Ids of memory objects an instruction in a function body reads or writes.
fn referenced_ids(op: Op, operands: &[u32]) -> &[u32] {
    let ids = match op {
        Op::Load
        | Op::ArrayLength
        | Op::ImageTexelPointer
        | Op::AccessChain
        | Op::InBoundsAccessChain
        | Op::PtrAccessChain
        | Op::AtomicLoad
        | Op::AtomicExchange
        | Op::AtomicCompareExchange
        | Op::AtomicCompareExchangeWeak
        | Op::AtomicIIncrement
        | Op::AtomicIDecrement
        | Op::AtomicIAdd
        | Op::AtomicISub
        | Op::AtomicSMin
        | Op::AtomicUMin
        | Op::AtomicSMax
        | Op::AtomicUMax
        | Op::AtomicAnd
        | Op::AtomicOr
        | Op::AtomicXor => operands.get(2..3),
        Op::Store | Op::CopyMemory => operands.get(..2),
        Op::AtomicStore => operands.get(..1),
        Op::FunctionCall => operands.get(3..),
        _ => None,
    };
    ids.unwrap_or_default()
}

/// Report which uniforms and uniform block members `words` uses.
pub fn uniform_usage(words: &[u32]) -> Result<UniformUsage> {
    let binary = SpirvBinary::from(words);
    let mut instrs = binary.instrs().map_err(reflection_error)?;

    let mut names: HashMap<u32, String> = HashMap::new();
    let mut member_names: HashMap<u32, BTreeMap<u32, String>> = HashMap::new();
    let mut structs: HashSet<u32> = HashSet::new();
    let mut pointers: HashMap<u32, u32> = HashMap::new();
    let mut constants: HashMap<u32, u32> = HashMap::new();
    let mut uniforms: Vec<UniformVariable> = Vec::new();

    let mut used_vars: HashSet<u32> = HashSet::new();
    let mut used_members: HashSet<(u32, u32)> = HashSet::new();
    let mut in_function = false;

    while let Some(instr) = instrs.next().map_err(reflection_error)? {
        // Unknown opcodes carry nothing this walk reads
        let Some(op) = Op::from_u32(instr.opcode()) else {
            continue;
        };
        let mut operands = instr.operands();
        match op {
            Op::Name => {
                let target = operands.read_u32().map_err(reflection_error)?;
                let name = operands.read_str().map_err(reflection_error)?;
                names.insert(target, name.to_string());
            }
            Op::MemberName => {
                let ty = operands.read_u32().map_err(reflection_error)?;
                let member = operands.read_u32().map_err(reflection_error)?;
                let name = operands.read_str().map_err(reflection_error)?;
                member_names.entry(ty).or_default().insert(member, name.to_string());
            }
            Op::TypeStruct => {
                structs.insert(operands.read_u32().map_err(reflection_error)?);
            }
            Op::TypePointer => {
                let id = operands.read_u32().map_err(reflection_error)?;
                let _class = operands.read_u32().map_err(reflection_error)?;
                let pointee = operands.read_u32().map_err(reflection_error)?;
                pointers.insert(id, pointee);
            }
            Op::Constant => {
                let _ty = operands.read_u32().map_err(reflection_error)?;
                let id = operands.read_u32().map_err(reflection_error)?;
                let value = operands.read_u32().map_err(reflection_error)?;
                constants.insert(id, value);
            }
            Op::Variable if !in_function => {
                let ty = operands.read_u32().map_err(reflection_error)?;
                let id = operands.read_u32().map_err(reflection_error)?;
                let class = operands.read_u32().map_err(reflection_error)?;
                if is_uniform_storage(class) {
                    uniforms.push(UniformVariable {
                        id,
                        pointee: pointers.get(&ty).copied().unwrap_or_default(),
                    });
                }
            }
            Op::Function => in_function = true,
            Op::FunctionEnd => in_function = false,
            _ if in_function => {
                let words = operands.read_list().map_err(reflection_error)?;
                if matches!(op, Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain) {
                    if let (Some(&base), Some(index)) = (words.get(2), words.get(3)) {
                        if let Some(&member) = constants.get(index) {
                            used_members.insert((base, member));
                        }
                    }
                }
                used_vars.extend(referenced_ids(op, words).iter().copied());
            }
            _ => {}
        }
    }

    let mut usage = UniformUsage::new();
    for var in &uniforms {
        let used = used_vars.contains(&var.id);
        let instance = names.get(&var.id).filter(|n| !n.is_empty());
        let type_name = names.get(&var.pointee).filter(|n| !n.is_empty());
        let Some(name) = instance.or(type_name) else {
            continue;
        };
        usage.insert(name.clone(), used);

        if structs.contains(&var.pointee) {
            if let Some(members) = member_names.get(&var.pointee) {
                for (index, member) in members {
                    let member_used = used_members.contains(&(var.id, *index));
                    usage.insert(format!("{name}.{member}"), member_used);
                }
            }
        }
    }
    Ok(usage)
}

/// Descriptor slot declared by a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub count: u32,
}

/// List the descriptor bindings of `entry_point`, including unused ones.
pub fn descriptor_bindings(words: &[u32], entry_point: &str) -> Result<Vec<DescriptorBinding>> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| ShaderError::Reflection(format!("{e:?}")))?;

    let mut bindings = Vec::new();
    for entry in entry_points.iter().filter(|e| e.name == entry_point) {
        for var in &entry.vars {
            if let spirq::var::Variable::Descriptor {
                name, desc_bind, nbind, ..
            } = var
            {
                bindings.push(DescriptorBinding {
                    name: name.clone().unwrap_or_default(),
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    count: *nbind,
                });
            }
        }
    }
    bindings.sort_by_key(|b| (b.set, b.binding));
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spirq::spirv::MAGIC_NUMBER;

    /// Minimal module assembler for the opcodes the walker reads.
    struct Module(Vec<u32>);

    impl Module {
        fn new() -> Self {
            Self(vec![MAGIC_NUMBER, 0x0001_0000, 0, 100, 0])
        }

        fn inst(mut self, op: Op, operands: &[u32]) -> Self {
            self.0.push(((operands.len() as u32 + 1) << 16) | op as u32);
            self.0.extend_from_slice(operands);
            self
        }

        fn name(self, id: u32, name: &str) -> Self {
            let operands = [&[id][..], &string_words(name)].concat();
            self.inst(Op::Name, &operands)
        }

        fn member_name(self, ty: u32, member: u32, name: &str) -> Self {
            let operands = [&[ty, member][..], &string_words(name)].concat();
            self.inst(Op::MemberName, &operands)
        }
    }

    fn string_words(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    // ids: 1 float, 2 Params struct, 3 ptr push Params, 4 params var,
    // 5 sampler type, 6 ptr UniformConstant sampler, 7 used_tex, 8 unused_tex,
    // 9 int, 10 const 1, 11 ptr push float, 12 main, 13-15 temporaries
    fn sample_module() -> Vec<u32> {
        Module::new()
            .name(2, "Params")
            .member_name(2, 0, "time")
            .member_name(2, 1, "decay")
            .name(4, "params")
            .name(7, "used_tex")
            .name(8, "unused_tex")
            .inst(Op::TypeStruct, &[2, 1, 1])
            .inst(Op::TypePointer, &[3, StorageClass::PushConstant as u32, 2])
            .inst(Op::TypePointer, &[6, StorageClass::UniformConstant as u32, 5])
            .inst(Op::TypePointer, &[11, StorageClass::PushConstant as u32, 1])
            .inst(Op::Constant, &[9, 10, 1])
            .inst(Op::Variable, &[3, 4, StorageClass::PushConstant as u32])
            .inst(Op::Variable, &[6, 7, StorageClass::UniformConstant as u32])
            .inst(Op::Variable, &[6, 8, StorageClass::UniformConstant as u32])
            .inst(Op::Function, &[0, 12, 0, 0])
            .inst(Op::Load, &[5, 13, 7])
            .inst(Op::AccessChain, &[11, 14, 4, 10])
            .inst(Op::Load, &[1, 15, 14])
            .inst(Op::FunctionEnd, &[])
            .0
    }

    #[test]
    fn usage_tracks_variables_and_indexed_members() {
        let usage = uniform_usage(&sample_module()).unwrap();
        assert_eq!(usage.get("used_tex"), Some(&true));
        assert_eq!(usage.get("unused_tex"), Some(&false));
        assert_eq!(usage.get("params"), Some(&true));
        assert_eq!(usage.get("params.decay"), Some(&true));
        assert_eq!(usage.get("params.time"), Some(&false));
        assert_eq!(usage.len(), 5);
    }

    #[test]
    fn anonymous_blocks_use_type_name() {
        let words = Module::new()
            .name(2, "Globals")
            .member_name(2, 0, "scale")
            .name(4, "")
            .inst(Op::TypeStruct, &[2, 1])
            .inst(Op::TypePointer, &[3, StorageClass::Uniform as u32, 2])
            .inst(Op::Variable, &[3, 4, StorageClass::Uniform as u32])
            .0;
        let usage = uniform_usage(&words).unwrap();
        assert_eq!(usage.get("Globals"), Some(&false));
        assert_eq!(usage.get("Globals.scale"), Some(&false));
    }

    #[test]
    fn stores_mark_their_target_used() {
        let storage = StorageClass::StorageBuffer as u32;
        let words = Module::new()
            .name(4, "counter")
            .name(5, "results")
            .inst(Op::TypePointer, &[3, storage, 1])
            .inst(Op::Variable, &[3, 4, storage])
            .inst(Op::Variable, &[3, 5, storage])
            .inst(Op::Function, &[0, 12, 0, 0])
            .inst(Op::AtomicStore, &[4, 20, 21, 22])
            .inst(Op::Store, &[5, 22])
            .inst(Op::FunctionEnd, &[])
            .0;
        let usage = uniform_usage(&words).unwrap();
        assert_eq!(usage.get("counter"), Some(&true));
        assert_eq!(usage.get("results"), Some(&true));
    }

    #[test]
    fn inputs_are_not_uniforms() {
        const INPUT: u32 = StorageClass::Input as u32;
        let words = Module::new()
            .name(4, "in_uv")
            .inst(Op::TypePointer, &[3, INPUT, 1])
            .inst(Op::Variable, &[3, 4, INPUT])
            .0;
        assert!(uniform_usage(&words).unwrap().is_empty());
    }

    #[test]
    fn malformed_modules_are_rejected() {
        assert!(uniform_usage(&[1, 2, 3]).is_err());
        let mut truncated = Module::new().0;
        truncated.push((4 << 16) | u32::from(Op::Name));
        assert!(uniform_usage(&truncated).is_err());
    }
}

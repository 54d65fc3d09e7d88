//! Decodes a finished module and checks the structural rules the emitter relies on.
//!
//! This is not a full validator. It covers the header, id definition and use, block termination and
//! operand/result type agreement for the instructions whose types are easy to get wrong.

use std::collections::{HashMap, HashSet};

use bitutils::bits;
use log::trace;
use num_traits::FromPrimitive;

use super::spec::{Op, GENERATOR, HEADER_WORDS, MAGIC, VERSION_1_3};
use crate::back::{EmitError, EmitResult};

/// How the words after the opcode word are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    /// Must already be defined
    Id,
    /// May be defined later in the module
    ForwardId,
    Literal,
    String,
    /// All remaining words are ids
    Ids,
    ForwardIds,
    Literals,
}

/// `(has result type, has result id, operands)`
fn shape(op: Op) -> (bool, bool, &'static [Operand]) {
    use Operand::*;
    match op {
        Op::Name => (false, false, &[ForwardId, String]),
        Op::MemberName => (false, false, &[ForwardId, Literal, String]),
        Op::ExtInstImport => (false, true, &[String]),
        Op::ExtInst => (true, true, &[Id, Literal, Ids]),
        Op::MemoryModel | Op::Capability => (false, false, &[Literals]),
        Op::EntryPoint => (false, false, &[Literal, ForwardId, String, ForwardIds]),
        Op::ExecutionMode => (false, false, &[ForwardId, Literals]),
        Op::TypeVoid | Op::TypeBool | Op::TypeSampler => (false, true, &[]),
        Op::TypeInt | Op::TypeFloat => (false, true, &[Literals]),
        Op::TypeVector | Op::TypeMatrix => (false, true, &[Id, Literal]),
        Op::TypeImage => (false, true, &[Id, Literals]),
        Op::TypeSampledImage | Op::TypeRuntimeArray => (false, true, &[Id]),
        Op::TypeArray => (false, true, &[Id, Id]),
        Op::TypeStruct | Op::TypeFunction => (false, true, &[Ids]),
        Op::TypePointer => (false, true, &[Literal, Id]),
        Op::ConstantTrue | Op::ConstantFalse | Op::ConstantNull => (true, true, &[]),
        Op::Constant => (true, true, &[Literals]),
        Op::ConstantComposite => (true, true, &[Ids]),
        Op::Function => (true, true, &[Literal, Id]),
        Op::FunctionParameter => (true, true, &[]),
        Op::FunctionEnd | Op::Kill | Op::Return | Op::Unreachable => (false, false, &[]),
        Op::FunctionCall => (true, true, &[ForwardId, Ids]),
        Op::Variable => (true, true, &[Literal, Ids]),
        Op::Load => (true, true, &[Id]),
        Op::Store => (false, false, &[Id, Id]),
        Op::AccessChain | Op::CompositeConstruct => (true, true, &[Ids]),
        Op::Decorate => (false, false, &[ForwardId, Literals]),
        Op::MemberDecorate => (false, false, &[ForwardId, Literals]),
        Op::VectorShuffle => (true, true, &[Id, Id, Literals]),
        Op::CompositeExtract => (true, true, &[Id, Literals]),
        Op::ImageSampleImplicitLod => (true, true, &[Id, Id, Literals]),
        Op::ImageSampleExplicitLod => (true, true, &[Id, Id, Literal, Ids]),
        Op::Transpose
        | Op::ConvertFToU
        | Op::ConvertFToS
        | Op::ConvertSToF
        | Op::ConvertUToF
        | Op::Bitcast
        | Op::SNegate
        | Op::FNegate
        | Op::Any
        | Op::All
        | Op::LogicalNot
        | Op::Not => (true, true, &[Id]),
        Op::Select => (true, true, &[Id, Id, Id]),
        Op::LoopMerge => (false, false, &[ForwardId, ForwardId, Literal]),
        Op::SelectionMerge => (false, false, &[ForwardId, Literal]),
        Op::Label => (false, true, &[]),
        Op::Branch => (false, false, &[ForwardId]),
        Op::BranchConditional => (false, false, &[Id, ForwardId, ForwardId]),
        Op::ReturnValue => (false, false, &[Id]),
        // Every remaining opcode is a binary operation
        _ => (true, true, &[Id, Id]),
    }
}

/// Operations whose operands and result all share one type
fn is_homogeneous(op: Op) -> bool {
    matches!(
        op,
        Op::IAdd
            | Op::FAdd
            | Op::ISub
            | Op::FSub
            | Op::IMul
            | Op::FMul
            | Op::UDiv
            | Op::SDiv
            | Op::FDiv
            | Op::UMod
            | Op::SRem
            | Op::FRem
            | Op::BitwiseOr
            | Op::BitwiseXor
            | Op::BitwiseAnd
            | Op::SNegate
            | Op::FNegate
            | Op::Not
            | Op::LogicalAnd
            | Op::LogicalOr
            | Op::LogicalNot
    )
}

fn is_comparison(op: Op) -> bool {
    (Op::LogicalEqual as u32..=Op::LogicalNotEqual as u32).contains(&(op as u32))
        || (Op::IEqual as u32..=Op::FOrdGreaterThanEqual as u32).contains(&(op as u32))
}

#[derive(Debug, Clone)]
struct Instruction {
    op: Op,
    /// Word offset in the module, for messages
    offset: usize,
    result_type: Option<u32>,
    result: Option<u32>,
    /// Id operands that must be defined earlier
    ids: Vec<u32>,
    /// Id operands that may refer ahead, such as branch targets
    forward: Vec<u32>,
    literals: Vec<u32>,
}

fn invalid<T>(message: String) -> EmitResult<T> {
    Err(EmitError::InvalidModule(message))
}

/// Reads a nul-terminated UTF-8 string, returning the number of words it occupies
fn string_words(words: &[u32]) -> EmitResult<usize> {
    for (index, word) in words.iter().enumerate() {
        if word.to_le_bytes().contains(&0) {
            return Ok(index + 1);
        }
    }
    invalid("unterminated string operand".to_owned())
}

fn decode(words: &[u32]) -> EmitResult<(u32, Vec<Instruction>)> {
    if words.len() < HEADER_WORDS {
        return invalid(format!("{} words is too short for a header", words.len()));
    }
    if words[0] != MAGIC {
        return invalid(format!("bad magic number {:#010x}", words[0]));
    }
    if words[1] != VERSION_1_3 || words[2] != GENERATOR || words[4] != 0 {
        return invalid(format!(
            "unexpected header version {:#x} generator {:#x} schema {}",
            words[1], words[2], words[4]
        ));
    }
    let bound = words[3];

    let mut instructions = vec![];
    let mut offset = HEADER_WORDS;
    while offset < words.len() {
        let word = words[offset];
        let count = bits!(word, 16:31) as usize;
        let opcode = bits!(word, 0:15);
        if count == 0 || offset + count > words.len() {
            return invalid(format!("instruction at word {} has bad word count {}", offset, count));
        }
        let Some(op) = Op::from_u32(opcode) else {
            return invalid(format!("unknown opcode {} at word {}", opcode, offset));
        };
        let operands = &words[offset + 1..offset + count];
        let next = |pos: &mut usize, what: &str| -> EmitResult<u32> {
            let word = operands.get(*pos).copied().ok_or_else(|| {
                EmitError::InvalidModule(format!("{:?} at word {} is missing its {}", op, offset, what))
            })?;
            *pos += 1;
            Ok(word)
        };
        let mut pos = 0;
        let (has_type, has_result, shape) = shape(op);
        let result_type = if has_type { Some(next(&mut pos, "result type")?) } else { None };
        let result = if has_result { Some(next(&mut pos, "result id")?) } else { None };

        let mut ids = vec![];
        let mut forward = vec![];
        let mut literals = vec![];
        for operand in shape {
            match operand {
                Operand::Id => ids.push(next(&mut pos, "operand")?),
                Operand::ForwardId => forward.push(next(&mut pos, "operand")?),
                Operand::Literal => literals.push(next(&mut pos, "literal")?),
                Operand::String => pos += string_words(&operands[pos..])?,
                Operand::Ids => ids.extend(&operands[pos..]),
                Operand::ForwardIds => forward.extend(&operands[pos..]),
                Operand::Literals => literals.extend(&operands[pos..]),
            }
            if matches!(operand, Operand::Ids | Operand::ForwardIds | Operand::Literals) {
                pos = operands.len();
            }
        }
        if pos < operands.len() {
            return invalid(format!(
                "{:?} at word {} has {} trailing words",
                op,
                offset,
                operands.len() - pos
            ));
        }
        instructions.push(Instruction {
            op,
            offset,
            result_type,
            result,
            ids,
            forward,
            literals,
        });
        offset += count;
    }

    let mut defined = HashSet::new();
    let mut checked = Vec::with_capacity(instructions.len());
    let mut forward_refs = vec![];
    for instruction in instructions {
        for id in instruction.result_type.iter().chain(&instruction.ids) {
            if !defined.contains(id) {
                return invalid(format!(
                    "{:?} at word {} uses %{} before it is defined",
                    instruction.op, instruction.offset, id
                ));
            }
        }
        forward_refs.extend(instruction.forward.iter().map(|id| (*id, instruction.offset)));
        if let Some(result) = instruction.result {
            if result == 0 || result >= bound {
                return invalid(format!("result id %{} is outside the bound {}", result, bound));
            }
            if !defined.insert(result) {
                return invalid(format!("%{} is defined twice", result));
            }
        }
        checked.push(instruction);
    }
    for (id, offset) in forward_refs {
        if !defined.contains(&id) {
            return invalid(format!("word {} refers to %{}, which is never defined", offset, id));
        }
    }
    Ok((bound, checked))
}

/// Type declarations that matter for the checks below
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeDecl {
    Pointer { pointee: u32 },
    Function { ret: u32, params: Vec<u32> },
    Void,
    Other,
}

pub fn check(words: &[u32]) -> EmitResult<()> {
    let (bound, instructions) = decode(words)?;

    let mut types: HashMap<u32, TypeDecl> = HashMap::new();
    let mut structural = HashSet::new();
    let mut value_types: HashMap<u32, u32> = HashMap::new();
    let mut function_types: HashMap<u32, u32> = HashMap::new();
    for instruction in &instructions {
        let (Some(result), op) = (instruction.result, instruction.op) else {
            continue;
        };
        match op {
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypePointer
            | Op::TypeFunction => {
                if !structural.insert((op, instruction.ids.clone(), instruction.literals.clone())) {
                    return invalid(format!("%{} repeats an existing {:?}", result, op));
                }
                let decl = match op {
                    Op::TypePointer => TypeDecl::Pointer {
                        pointee: instruction.ids[0],
                    },
                    Op::TypeFunction => TypeDecl::Function {
                        ret: instruction.ids[0],
                        params: instruction.ids[1..].to_vec(),
                    },
                    Op::TypeVoid => TypeDecl::Void,
                    _ => TypeDecl::Other,
                };
                types.insert(result, decl);
            }
            Op::TypeStruct => {
                types.insert(result, TypeDecl::Other);
            }
            Op::Function => {
                function_types.insert(result, instruction.ids[0]);
            }
            _ => {}
        }
        if let Some(ty) = instruction.result_type {
            value_types.insert(result, ty);
        }
    }

    let type_of = |id: u32, instruction: &Instruction| -> EmitResult<u32> {
        match value_types.get(&id) {
            Some(ty) => Ok(*ty),
            None => invalid(format!("{:?} at word {} uses %{}, which has no type", instruction.op, instruction.offset, id)),
        }
    };
    let mismatch = |instruction: &Instruction, what: &str| -> EmitResult<()> {
        invalid(format!("{:?} at word {}: {}", instruction.op, instruction.offset, what))
    };

    let mut in_function: Option<u32> = None;
    let mut in_block = false;
    let mut blocks = 0;
    for instruction in &instructions {
        let op = instruction.op;
        match op {
            Op::Function => {
                if in_function.is_some() {
                    return mismatch(instruction, "function inside a function");
                }
                let return_type = instruction.result_type.unwrap_or(0);
                match types.get(&instruction.ids[0]) {
                    Some(TypeDecl::Function { ret, .. }) if *ret == return_type => {}
                    _ => return mismatch(instruction, "function type does not match the return type"),
                }
                in_function = Some(return_type);
                continue;
            }
            Op::FunctionEnd => {
                if in_function.is_none() || in_block {
                    return mismatch(instruction, "function ends inside an open block");
                }
                in_function = None;
                continue;
            }
            Op::FunctionParameter => continue,
            Op::Label => {
                if in_function.is_none() || in_block {
                    return mismatch(instruction, "block starts before the previous one is terminated");
                }
                in_block = true;
                blocks += 1;
                continue;
            }
            _ => {}
        }
        if in_function.is_some() && !in_block {
            return mismatch(instruction, "instruction outside a block");
        }
        if op.is_terminator() {
            in_block = false;
        }

        match op {
            Op::Load => {
                let pointer = type_of(instruction.ids[0], instruction)?;
                match types.get(&pointer) {
                    Some(TypeDecl::Pointer { pointee }) if Some(*pointee) == instruction.result_type => {}
                    _ => return mismatch(instruction, "loaded type does not match the pointer"),
                }
            }
            Op::Store => {
                let pointer = type_of(instruction.ids[0], instruction)?;
                let value = type_of(instruction.ids[1], instruction)?;
                match types.get(&pointer) {
                    Some(TypeDecl::Pointer { pointee }) if *pointee == value => {}
                    _ => return mismatch(instruction, "stored type does not match the pointer"),
                }
            }
            Op::FunctionCall => {
                let Some(callee) = function_types.get(&instruction.forward[0]) else {
                    return mismatch(instruction, "call to something that is not a function");
                };
                let Some(TypeDecl::Function { ret, params }) = types.get(callee) else {
                    return mismatch(instruction, "callee has no function type");
                };
                if Some(*ret) != instruction.result_type {
                    return mismatch(instruction, "result type differs from the callee's return type");
                }
                if params.len() != instruction.ids.len() {
                    return mismatch(instruction, "argument count differs from the callee's");
                }
                for (param, arg) in params.iter().zip(&instruction.ids) {
                    if type_of(*arg, instruction)? != *param {
                        return mismatch(instruction, "argument type differs from the parameter");
                    }
                }
            }
            Op::ReturnValue => {
                if Some(type_of(instruction.ids[0], instruction)?) != in_function {
                    return mismatch(instruction, "returned value differs from the return type");
                }
            }
            Op::Return => {
                if !matches!(in_function.and_then(|t| types.get(&t)), Some(TypeDecl::Void)) {
                    return mismatch(instruction, "plain return from a function with a result");
                }
            }
            op if is_homogeneous(op) => {
                for id in &instruction.ids {
                    if Some(type_of(*id, instruction)?) != instruction.result_type {
                        return mismatch(instruction, "operand type differs from the result type");
                    }
                }
            }
            op if is_comparison(op) => {
                if type_of(instruction.ids[0], instruction)? != type_of(instruction.ids[1], instruction)? {
                    return mismatch(instruction, "compared operands have different types");
                }
            }
            _ => {}
        }
    }
    if in_function.is_some() {
        return invalid("module ends inside a function".to_owned());
    }
    trace!("checked {} instructions in {} blocks, bound {}", instructions.len(), blocks, bound);
    Ok(())
}

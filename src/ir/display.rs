use std::fmt::{Display, Formatter, Result};

use super::{
    Block, Constant, Function, Merge, Module, Op, Place, PlaceIndex, PlaceRoot, Terminator, ValueId,
};

impl Display for ValueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "%{}", self.0)
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Uint(v) => write!(f, "{}u", v),
            Constant::Float(v) => write!(f, "{:?}f", v),
        }
    }
}

impl Display for Place {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.root {
            PlaceRoot::Local(l) => write!(f, "local{}", l.0)?,
            PlaceRoot::Resource(r) => write!(f, "res{}", r.0)?,
        }
        for index in &self.path {
            match index {
                PlaceIndex::Field(i) => write!(f, ".{}", i)?,
                PlaceIndex::Const(i) => write!(f, "[{}]", i)?,
                PlaceIndex::Dynamic(v) => write!(f, "[{}]", v)?,
            }
        }
        Ok(())
    }
}

fn list(values: &[ValueId]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Op::Constant(c) => write!(f, "const {}", c),
            Op::Composite(values) => write!(f, "composite({})", list(values)),
            Op::Load(place) => write!(f, "load {}", place),
            Op::Store { place, value } => write!(f, "store {} <- {}", place, value),
            Op::Unary(op, v) => write!(f, "{:?} {}", op, v),
            Op::Binary(op, a, b) => write!(f, "{} {} {}", a, op.symbol(), b),
            Op::Convert(v) => write!(f, "convert {}", v),
            Op::Extract(v, i) => write!(f, "extract {}.{}", v, i),
            Op::ExtractDynamic(v, i) => write!(f, "extract {}[{}]", v, i),
            Op::Swizzle(v, components) => {
                const NAMES: [char; 4] = ['x', 'y', 'z', 'w'];
                let mask: String = components.iter().map(|c| NAMES[*c as usize]).collect();
                write!(f, "swizzle {}.{}", v, mask)
            }
            Op::Splat(v) => write!(f, "splat {}", v),
            Op::Call(function, args) => write!(f, "call fn{}({})", function.0, list(args)),
            Op::Intrinsic(intrinsic, args) => write!(f, "{}({})", intrinsic.name(), list(args)),
            Op::Sample {
                texture,
                sampler,
                coord,
                lod,
            } => {
                write!(f, "sample res{} res{} {}", texture.0, sampler.0, coord)?;
                if let Some(lod) = lod {
                    write!(f, " lod {}", lod)?;
                }
                Ok(())
            }
            Op::Select {
                cond,
                accept,
                reject,
            } => write!(f, "select {} ? {} : {}", cond, accept, reject),
        }
    }
}

impl Display for Terminator {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Terminator::Branch(b) => write!(f, "br bb{}", b.0),
            Terminator::CondBranch {
                cond,
                accept,
                reject,
            } => write!(f, "br {} ? bb{} : bb{}", cond, accept.0, reject.0),
            Terminator::Return(Some(v)) => write!(f, "ret {}", v),
            Terminator::Return(None) => write!(f, "ret"),
            Terminator::Kill => write!(f, "kill"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

struct Annotated<'a>(&'a Function, &'a Module);

impl Display for Annotated<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let Annotated(function, module) = self;
        let structs = &module.structs;
        let params: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("%{}: {} {}", i, p.ty.named(structs), p.name))
            .collect();
        write!(
            f,
            "fn {}({}) -> {}",
            function.name,
            params.join(", "),
            function.return_type.named(structs)
        )?;
        if let Some(stage) = function.stage {
            write!(f, " [{}]", stage.name())?;
        }
        writeln!(f, " {{")?;
        for (i, local) in function.locals.iter().enumerate() {
            writeln!(f, "    local{}: {} {}", i, local.ty.named(structs), local.name)?;
        }
        for (i, Block { instructions, terminator, merge }) in function.blocks.iter().enumerate() {
            write!(f, "  bb{}:", i)?;
            match merge {
                Some(Merge::Selection(m)) => write!(f, " [selection merge bb{}]", m.0)?,
                Some(Merge::Loop { merge, continuing }) => {
                    write!(f, " [loop merge bb{} continue bb{}]", merge.0, continuing.0)?
                }
                None => {}
            }
            writeln!(f)?;
            for instruction in instructions {
                match instruction.result {
                    Some(result) => writeln!(
                        f,
                        "    {}: {} = {}",
                        result,
                        function.value_type(result).named(structs),
                        instruction.op
                    )?,
                    None => writeln!(f, "    {}", instruction.op)?,
                }
            }
            writeln!(f, "    {}", terminator)?;
        }
        writeln!(f, "}}")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        for def in &self.structs {
            writeln!(f, "struct {} {{", def.name)?;
            for member in &def.members {
                writeln!(f, "    {} {};", member.ty.named(&self.structs), member.name)?;
            }
            writeln!(f, "}}")?;
        }
        for (i, resource) in self.resources.iter().enumerate() {
            writeln!(
                f,
                "res{} {}: {} @ {}{}",
                i,
                resource.name,
                crate::types::Type::Resource(resource.kind.clone()).named(&self.structs),
                resource.binding.class.register_letter(),
                resource.binding.slot
            )?;
        }
        for function in &self.functions {
            write!(f, "{}", Annotated(function, self))?;
        }
        for entry in &self.entry_points {
            writeln!(
                f,
                "entry {} {} fn{} {:?}",
                entry.stage.name(),
                entry.name,
                entry.function.0,
                entry.workgroup_size
            )?;
        }
        Ok(())
    }
}

//! Structural checks run on every lowered module before a backend sees it.

use std::collections::HashSet;

use super::{
    BinaryOp, Block, BlockId, Function, LoweringError, Merge, Module, Op, PlaceRoot, Terminator, ValueId,
};

pub fn verify(module: &Module) -> Result<(), LoweringError> {
    for function in &module.functions {
        FunctionVerifier { module, function }.run()?;
    }
    for id in &module.function_order {
        if id.0 >= module.functions.len() {
            return Err(LoweringError {
                function: "<module>".to_owned(),
                message: format!("function order names unknown function {}", id.0),
            });
        }
    }
    Ok(())
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    function: &'a Function,
}

impl<'a> FunctionVerifier<'a> {
    fn fail<T>(&self, message: String) -> Result<T, LoweringError> {
        Err(LoweringError {
            function: self.function.name.clone(),
            message,
        })
    }

    fn run(&self) -> Result<(), LoweringError> {
        let function = self.function;
        if function.blocks.is_empty() {
            return self.fail("function has no blocks".to_owned());
        }
        let mut defined = HashSet::new();
        for (index, block) in function.blocks.iter().enumerate() {
            self.block(BlockId(index as u32), block, &mut defined)?;
        }
        Ok(())
    }

    fn check_block_id(&self, id: BlockId) -> Result<(), LoweringError> {
        if (id.0 as usize) < self.function.blocks.len() {
            Ok(())
        } else {
            self.fail(format!("branch to missing block {}", id.0))
        }
    }

    fn block(&self, id: BlockId, block: &Block, defined: &mut HashSet<ValueId>) -> Result<(), LoweringError> {
        let function = self.function;
        // Values are block-local, apart from parameters
        let mut local: HashSet<ValueId> = (0..function.params.len() as u32).map(ValueId).collect();
        let use_value = |value: ValueId, local: &HashSet<ValueId>| {
            if local.contains(&value) {
                Ok(())
            } else {
                self.fail(format!("block {} uses %{} before defining it", id.0, value.0))
            }
        };

        for instruction in &block.instructions {
            for operand in instruction.op.operands() {
                use_value(operand, &local)?;
            }
            match &instruction.op {
                Op::Binary(BinaryOp::LogicalAnd | BinaryOp::LogicalOr, ..) => {
                    return self.fail("short-circuit operator left in straight-line code".to_owned())
                }
                Op::Load(place) | Op::Store { place, .. } => {
                    if let PlaceRoot::Resource(r) = place.root {
                        if r.0 >= self.module.resources.len() {
                            return self.fail(format!("unknown resource {}", r.0));
                        }
                    }
                    if self.module.place_type(function, place).is_none() {
                        return self.fail(format!("ill-typed place {:?}", place));
                    }
                }
                Op::Call(callee, args) => {
                    let Some(target) = self.module.functions.get(callee.0) else {
                        return self.fail(format!("call to unknown function {}", callee.0));
                    };
                    if target.params.len() != args.len() {
                        return self.fail(format!("call to '{}' with {} arguments", target.name, args.len()));
                    }
                }
                _ => {}
            }
            match (instruction.result, &instruction.op) {
                (None, Op::Store { .. }) => {}
                (Some(result), op) if !matches!(op, Op::Store { .. }) => {
                    if (result.0 as usize) >= function.value_types.len() {
                        return self.fail(format!("%{} has no type", result.0));
                    }
                    if !defined.insert(result) {
                        return self.fail(format!("%{} is defined twice", result.0));
                    }
                    local.insert(result);
                }
                _ => return self.fail(format!("bad result on {:?}", instruction.op)),
            }
        }

        match block.terminator {
            Terminator::Branch(target) => self.check_block_id(target)?,
            Terminator::CondBranch {
                cond,
                accept,
                reject,
            } => {
                use_value(cond, &local)?;
                self.check_block_id(accept)?;
                self.check_block_id(reject)?;
            }
            Terminator::Return(value) => match (value, function.return_type.is_void()) {
                (None, true) => {}
                (Some(value), false) => use_value(value, &local)?,
                _ => return self.fail(format!("block {} returns the wrong kind of value", id.0)),
            },
            Terminator::Kill | Terminator::Unreachable => {}
        }
        match block.merge {
            Some(Merge::Selection(merge)) => {
                self.check_block_id(merge)?;
                if !matches!(block.terminator, Terminator::CondBranch { .. }) {
                    return self.fail(format!("selection header {} does not branch conditionally", id.0));
                }
            }
            Some(Merge::Loop { merge, continuing }) => {
                self.check_block_id(merge)?;
                self.check_block_id(continuing)?;
                if !block.instructions.is_empty() {
                    return self.fail(format!("loop header {} has instructions", id.0));
                }
            }
            None => {}
        }
        Ok(())
    }
}

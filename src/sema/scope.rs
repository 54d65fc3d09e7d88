//! Lexical scoping as an explicit stack of frames.
//!
//! The module frame holds resources. A function pushes a frame for its parameters and every block pushes its own.
//! Lookups walk from the innermost frame outwards.

use std::collections::HashMap;

use super::tast::{ResourceId, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Resource(ResourceId),
    Local { var: VarId, is_const: bool },
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    module: HashMap<String, Symbol>,
    frames: Vec<HashMap<String, Symbol>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Declare `name` in the innermost frame. Returns the existing symbol if that frame already has one.
    pub fn declare(&mut self, name: &str, symbol: Symbol) -> Result<(), Symbol> {
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.module,
        };
        match frame.get(name) {
            Some(existing) => Err(*existing),
            None => {
                frame.insert(name.to_owned(), symbol);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.module.get(name))
            .copied()
    }
}

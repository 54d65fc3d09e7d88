//! Collision-free identifiers for generated source.

use std::collections::HashSet;

/// Hands out identifiers that avoid each other, the target's reserved words and the writer's own `_eN` value
/// names. Reserved words get a trailing `_`, collisions a numeric suffix.
#[derive(Debug, Clone)]
pub struct Namer {
    used: HashSet<String>,
    reserved: fn(&str) -> bool,
}

/// Names the writer gives SSA values, never handed out here
fn is_value_name(name: &str) -> bool {
    match name.strip_prefix("_e") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

impl Namer {
    pub fn new(reserved: fn(&str) -> bool) -> Self {
        Self {
            used: HashSet::new(),
            reserved,
        }
    }

    pub fn name(&mut self, base: &str) -> String {
        let mut base = if base.is_empty() { "v".to_owned() } else { base.to_owned() };
        if (self.reserved)(&base) || is_value_name(&base) {
            base.push('_');
        }
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.used.contains(&candidate) || (self.reserved)(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

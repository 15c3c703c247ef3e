//! Lexical scope tracking for the lowering walk.
//!
//! [`VarContext`] is a plain stack of declarations. Name lookup walks from
//! the top, so inner bindings shadow outer ones, and pops must mirror pushes
//! exactly. Pending blocks clone the context at their creation point and
//! replay it later, which is why the stack is cheap to clone.

use crate::{
    ir::{ExprId, VarId},
    Error, Result,
};

/// How a variable was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// A function parameter.
    Fun,
    /// A non-recursive local binding.
    Let,
    /// A recursive local binding; the definition may reference the variable.
    Letrec,
}

/// A variable declaration, owned by the [`super::ExprArena`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    /// The source-level name.
    pub name: String,
    /// How the variable was introduced.
    pub kind: VarKind,
    /// The bound definition. `None` for parameters that have not been
    /// rebound yet and for recursive bindings whose definition is still
    /// being translated.
    pub definition: Option<ExprId>,
}

/// The stack of declarations currently in scope.
///
/// Entries carry the declaration name alongside its id so lookups do not
/// need the arena.
#[derive(Debug, Clone, Default)]
pub struct VarContext {
    entries: Vec<(String, VarId)>,
}

impl VarContext {
    /// Creates an empty scope stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of declarations in scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no declaration is in scope.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pushes a declaration onto the stack.
    pub fn push(&mut self, name: impl Into<String>, decl: VarId) {
        self.entries.push((name.into(), decl));
    }

    /// Pops the innermost declaration, verifying it is the one the caller
    /// pushed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeMismatch`] if the top of the stack does not
    /// carry `expected`, or if the stack is empty.
    pub fn pop_expecting(&mut self, expected: &str) -> Result<VarId> {
        match self.entries.last() {
            Some((name, _)) if name == expected => {
                let (_, decl) = self.entries.pop().ok_or(Error::Invariant(
                    "scope stack emptied between inspection and pop",
                ))?;
                Ok(decl)
            }
            Some((name, _)) => Err(Error::ScopeMismatch {
                expected: expected.to_string(),
                found: name.clone(),
            }),
            None => Err(Error::ScopeMismatch {
                expected: expected.to_string(),
                found: String::from("<empty scope>"),
            }),
        }
    }

    /// Returns the entry at `index`, counted from the bottom of the stack.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> (&str, VarId) {
        let (name, decl) = &self.entries[index];
        (name.as_str(), *decl)
    }

    /// Replaces the declaration at `index`, keeping its name.
    ///
    /// Used when a pending block's cloned scope rebinds function parameters
    /// to block phi arguments.
    pub(crate) fn rebind(&mut self, index: usize, decl: VarId) {
        self.entries[index].1 = decl;
    }

    /// Finds the innermost declaration with the given name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|&(_, decl)| decl)
    }
}

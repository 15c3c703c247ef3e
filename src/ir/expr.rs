//! The direct-style expression IR and its owning arena.
//!
//! Every expression node of one compilation unit lives in an [`ExprArena`]
//! and is referenced by [`ExprId`] — an index, not a pointer. The arena also
//! owns every variable declaration ([`super::scope::VarDecl`]), so the whole
//! unit is reclaimed at once when the arena is dropped.
//!
//! Expressions are immutable once constructed, with two narrow exceptions
//! that the lowering pipeline needs:
//!
//! - [`Phi`] operand slots, which grow in lock-step with the predecessor list
//!   of the block that owns them, and
//! - per-node instruction bookkeeping (owning block, instruction id, debug
//!   name), which is written during CFG construction and renumbering.

use std::fmt;

use crate::{
    cfg::{BlockId, Scfg},
    ir::scope::{VarDecl, VarKind},
};

/// A strongly-typed index of an expression node within an [`ExprArena`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(u32);

impl ExprId {
    /// Creates an `ExprId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        ExprId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A strongly-typed index of a variable declaration within an [`ExprArena`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(u32);

impl VarId {
    /// Creates a `VarId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: u32) -> Self {
        VarId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
    /// A signed integer constant.
    Int(i64),
    /// A boolean constant.
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum UnaryOp {
    /// Arithmetic negation.
    #[strum(serialize = "-")]
    Minus,
    /// Bitwise complement.
    #[strum(serialize = "~")]
    BitNot,
    /// Logical negation.
    #[strum(serialize = "!")]
    LogicNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum BinaryOp {
    /// Multiplication.
    #[strum(serialize = "*")]
    Mul,
    /// Division.
    #[strum(serialize = "/")]
    Div,
    /// Remainder.
    #[strum(serialize = "%")]
    Rem,
    /// Addition.
    #[strum(serialize = "+")]
    Add,
    /// Subtraction.
    #[strum(serialize = "-")]
    Sub,
    /// Left shift.
    #[strum(serialize = "<<")]
    Shl,
    /// Right shift.
    #[strum(serialize = ">>")]
    Shr,
    /// Bitwise and.
    #[strum(serialize = "&")]
    BitAnd,
    /// Bitwise exclusive or.
    #[strum(serialize = "^")]
    BitXor,
    /// Bitwise or.
    #[strum(serialize = "|")]
    BitOr,
    /// Equality comparison.
    #[strum(serialize = "==")]
    Eq,
    /// Inequality comparison.
    #[strum(serialize = "!=")]
    Neq,
    /// Less-than comparison.
    #[strum(serialize = "<")]
    Lt,
    /// Less-or-equal comparison.
    #[strum(serialize = "<=")]
    Leq,
    /// Short-circuit logical and.
    #[strum(serialize = "&&")]
    LogicAnd,
    /// Short-circuit logical or.
    #[strum(serialize = "||")]
    LogicOr,
}

/// A block-entry placeholder whose value depends on which predecessor edge
/// was taken.
///
/// A phi keeps one operand slot per predecessor edge of the block that owns
/// it, indexed by predecessor-edge order. Slots start out unset (`None`) and
/// are filled by the jump that creates the corresponding edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phi {
    name: Option<String>,
    values: Vec<Option<ExprId>>,
}

impl Phi {
    /// Creates a phi with no operand slots and no name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the debug name carried by this phi, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Assigns a debug name (usually the function parameter this phi stands
    /// in for).
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Returns the operand slots, one per predecessor edge.
    #[must_use]
    pub fn values(&self) -> &[Option<ExprId>] {
        &self.values
    }

    /// Appends one unset operand slot; called when the owning block gains a
    /// predecessor edge.
    pub(crate) fn push_slot(&mut self) {
        self.values.push(None);
    }

    /// Pre-sizes operand storage for `additional` more slots.
    pub(crate) fn reserve_slots(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    /// Fills the operand slot for the given predecessor-edge index.
    pub(crate) fn set_value(&mut self, edge_index: usize, value: ExprId) {
        self.values[edge_index] = Some(value);
    }
}

/// The body of a code node: a plain expression before lowering, a finished
/// control-flow graph after.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeBody {
    /// Direct-style source body, not yet lowered.
    Source(ExprId),
    /// Lowered, normalized control-flow graph.
    Cfg(Box<Scfg>),
}

/// An expression node, the closed variant set of the direct-style IR.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant.
    Literal(Literal),
    /// A name that has not been resolved against any scope.
    Identifier(String),
    /// A resolved reference to a variable declaration.
    Variable(VarId),
    /// A lambda: one parameter and a body.
    Function {
        /// The parameter declaration.
        param: VarId,
        /// The function body.
        body: ExprId,
    },
    /// A code node: the compiled body of a function.
    Code {
        /// Source expression before lowering, CFG afterwards.
        body: CodeBody,
    },
    /// Application of a function to one argument (curried).
    Apply {
        /// The applied function value.
        callee: ExprId,
        /// The argument.
        arg: ExprId,
    },
    /// A call, forcing evaluation of a fully applied function.
    Call {
        /// The applied function value being invoked.
        target: ExprId,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: ExprId,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: ExprId,
        /// Right operand.
        rhs: ExprId,
    },
    /// Projection of a named field out of a record value.
    Project {
        /// The record value.
        record: ExprId,
        /// The field name.
        field: String,
    },
    /// A conditional expression.
    IfThenElse {
        /// The condition.
        condition: ExprId,
        /// Value when the condition is true.
        then_expr: ExprId,
        /// Value when the condition is false.
        else_expr: ExprId,
    },
    /// A local binding; the declaration carries the bound definition.
    Let {
        /// The bound declaration (kind `Let` or `Letrec`).
        decl: VarId,
        /// The body the binding scopes over.
        body: ExprId,
    },
    /// A block-entry phi placeholder.
    Phi(Phi),
}

/// Per-node bookkeeping written during CFG construction.
#[derive(Debug, Clone)]
struct ExprNode {
    expr: Expr,
    /// The basic block this node was placed into, if it became an
    /// instruction ("stamp" used to deduplicate insertion).
    block: Option<BlockId>,
    /// Sequential instruction id assigned by renumbering; 0 = unnumbered.
    instr_id: u32,
    /// Debug name, usually inherited from a `let` binding.
    name: Option<String>,
}

/// The compilation-scoped arena owning every expression node and variable
/// declaration of one unit.
///
/// Nodes are referenced by [`ExprId`], declarations by [`VarId`]. Dropping
/// the arena reclaims everything at once; there are no individual frees and
/// no ownership cycles, since all cross-references are indices.
///
/// # Examples
///
/// ```rust
/// use cfglower::ir::{BinaryOp, ExprArena, Literal};
///
/// let mut arena = ExprArena::new();
/// let one = arena.alloc_int(1);
/// let two = arena.alloc_int(2);
/// let sum = arena.alloc_binary(BinaryOp::Add, one, two);
///
/// assert_eq!(arena.len(), 3);
/// assert!(matches!(
///     arena.expr(one),
///     cfglower::ir::Expr::Literal(Literal::Int(1))
/// ));
/// let _ = sum;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    decls: Vec<VarDecl>,
}

impl ExprArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of expression nodes allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no expression node was allocated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocates an expression node and returns its id.
    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::new(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(ExprNode {
            expr,
            block: None,
            instr_id: 0,
            name: None,
        });
        id
    }

    /// Returns the expression stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this arena.
    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()].expr
    }

    /// Returns a mutable reference to the expression stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this arena.
    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.index()].expr
    }

    /// Returns the phi stored under `id`, or `None` if the node is not a phi.
    #[must_use]
    pub fn phi(&self, id: ExprId) -> Option<&Phi> {
        match self.expr(id) {
            Expr::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    /// Returns the block this node was placed into as an instruction.
    #[must_use]
    pub fn block_of(&self, id: ExprId) -> Option<BlockId> {
        self.nodes[id.index()].block
    }

    /// Stamps the node with its owning block.
    pub(crate) fn set_block(&mut self, id: ExprId, block: BlockId) {
        self.nodes[id.index()].block = Some(block);
    }

    /// Returns the sequential instruction id of this node (0 = unnumbered).
    #[must_use]
    pub fn instr_id(&self, id: ExprId) -> u32 {
        self.nodes[id.index()].instr_id
    }

    /// Assigns the sequential instruction id.
    pub(crate) fn set_instr_id(&mut self, id: ExprId, instr_id: u32) {
        self.nodes[id.index()].instr_id = instr_id;
    }

    /// Returns the debug name carried by this node, if any.
    #[must_use]
    pub fn name(&self, id: ExprId) -> Option<&str> {
        self.nodes[id.index()].name.as_deref()
    }

    /// Assigns a debug name to this node.
    pub(crate) fn set_name(&mut self, id: ExprId, name: impl Into<String>) {
        self.nodes[id.index()].name = Some(name.into());
    }

    /// Allocates a variable declaration and returns its id.
    pub fn alloc_decl(
        &mut self,
        name: impl Into<String>,
        kind: VarKind,
        definition: Option<ExprId>,
    ) -> VarId {
        let id = VarId::new(u32::try_from(self.decls.len()).unwrap_or(u32::MAX));
        self.decls.push(VarDecl {
            name: name.into(),
            kind,
            definition,
        });
        id
    }

    /// Returns the declaration stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this arena.
    #[must_use]
    pub fn decl(&self, id: VarId) -> &VarDecl {
        &self.decls[id.index()]
    }

    /// Replaces the definition of a declaration.
    ///
    /// Lowering rewrites each bound definition in place, so declarations
    /// resolved through the scope stack always substitute the translated
    /// value. Recursive bindings are patched through here after their
    /// definition has been translated, which closes the knot for pending
    /// blocks that captured the declaration earlier.
    pub(crate) fn set_definition(&mut self, id: VarId, definition: ExprId) {
        self.decls[id.index()].definition = Some(definition);
    }

    /// Takes the definition out of a declaration, leaving `None`.
    pub(crate) fn take_definition(&mut self, id: VarId) -> Option<ExprId> {
        self.decls[id.index()].definition.take()
    }

    // Convenience constructors, mainly for building input trees in tests and
    // front-ends.

    /// Allocates an integer literal.
    pub fn alloc_int(&mut self, value: i64) -> ExprId {
        self.alloc(Expr::Literal(Literal::Int(value)))
    }

    /// Allocates a boolean literal.
    pub fn alloc_bool(&mut self, value: bool) -> ExprId {
        self.alloc(Expr::Literal(Literal::Bool(value)))
    }

    /// Allocates an unresolved identifier.
    pub fn alloc_identifier(&mut self, name: impl Into<String>) -> ExprId {
        self.alloc(Expr::Identifier(name.into()))
    }

    /// Allocates a resolved variable reference.
    pub fn alloc_variable(&mut self, decl: VarId) -> ExprId {
        self.alloc(Expr::Variable(decl))
    }

    /// Allocates a unary operation.
    pub fn alloc_unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.alloc(Expr::Unary { op, operand })
    }

    /// Allocates a binary operation.
    pub fn alloc_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.alloc(Expr::Binary { op, lhs, rhs })
    }

    /// Allocates an application of `callee` to `arg`.
    pub fn alloc_apply(&mut self, callee: ExprId, arg: ExprId) -> ExprId {
        self.alloc(Expr::Apply { callee, arg })
    }

    /// Allocates a call forcing evaluation of `target`.
    pub fn alloc_call(&mut self, target: ExprId) -> ExprId {
        self.alloc(Expr::Call { target })
    }

    /// Allocates a conditional expression.
    pub fn alloc_if(&mut self, condition: ExprId, then_expr: ExprId, else_expr: ExprId) -> ExprId {
        self.alloc(Expr::IfThenElse {
            condition,
            then_expr,
            else_expr,
        })
    }

    /// Allocates a let expression over an existing declaration.
    pub fn alloc_let(&mut self, decl: VarId, body: ExprId) -> ExprId {
        self.alloc(Expr::Let { decl, body })
    }

    /// Allocates a lambda.
    pub fn alloc_function(&mut self, param: VarId, body: ExprId) -> ExprId {
        self.alloc(Expr::Function { param, body })
    }

    /// Allocates a code node over a not-yet-lowered source body.
    pub fn alloc_code(&mut self, body: ExprId) -> ExprId {
        self.alloc(Expr::Code {
            body: CodeBody::Source(body),
        })
    }

    /// Allocates an empty phi node.
    pub fn alloc_phi(&mut self) -> ExprId {
        self.alloc(Expr::Phi(Phi::new()))
    }

    /// Renders a node as a compact operand reference.
    ///
    /// Numbered instructions render as `%N`; pure values render inline.
    #[must_use]
    pub fn operand(&self, id: ExprId) -> String {
        let instr_id = self.instr_id(id);
        if instr_id != 0 {
            if let Some(name) = self.name(id) {
                return format!("%{instr_id}({name})");
            }
            return format!("%{instr_id}");
        }
        match self.expr(id) {
            Expr::Literal(lit) => lit.to_string(),
            Expr::Identifier(name) => format!("?{name}"),
            Expr::Variable(decl) => self.decl(*decl).name.clone(),
            Expr::Phi(phi) => phi.name().map_or_else(|| "phi".to_string(), String::from),
            _ => format!("{id}"),
        }
    }

    /// Renders a node as a one-line instruction summary.
    #[must_use]
    pub fn summary(&self, id: ExprId) -> String {
        let lhs = {
            let instr_id = self.instr_id(id);
            if instr_id != 0 {
                format!("%{instr_id} = ")
            } else {
                String::new()
            }
        };
        let rhs = match self.expr(id) {
            Expr::Unary { op, operand } => format!("{op}{}", self.operand(*operand)),
            Expr::Binary { op, lhs, rhs } => {
                format!("{} {op} {}", self.operand(*lhs), self.operand(*rhs))
            }
            Expr::Call { target } => format!("call {}", self.operand(*target)),
            Expr::Apply { callee, arg } => {
                format!("{} {}", self.operand(*callee), self.operand(*arg))
            }
            Expr::Project { record, field } => format!("{}.{field}", self.operand(*record)),
            Expr::Phi(phi) => {
                let slots: Vec<String> = phi
                    .values()
                    .iter()
                    .map(|v| v.map_or_else(|| "_".to_string(), |id| self.operand(id)))
                    .collect();
                format!("phi({})", slots.join(", "))
            }
            _ => self.operand(id),
        };
        format!("{lhs}{rhs}")
    }
}

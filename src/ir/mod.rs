//! The direct-style expression IR: arena, node variants, opcodes and scopes.
//!
//! This is the input language of the lowering pipeline. Front-ends build an
//! expression tree inside an [`ExprArena`] and hand the root to
//! [`crate::lower::CfgReducer`], which rewrites every [`Expr::Code`] body
//! into a control-flow graph.

mod expr;
pub mod scope;

pub use expr::{
    BinaryOp, CodeBody, Expr, ExprArena, ExprId, Literal, Phi, UnaryOp, VarId,
};
pub use scope::{VarContext, VarDecl, VarKind};

#![deny(missing_docs)]
//! A compiler middle-end that lowers a direct-style expression IR into an
//! SSA-ready control-flow graph.
//!
//! The input language is a small expression IR: literals, lambdas, curried
//! applications, conditionals and possibly-recursive local bindings, with
//! explicit [`ir::Expr::Code`] nodes marking compiled function bodies. The
//! [`lower::CfgReducer`] rewrites each code body into a [`cfg::Scfg`] of
//! basic blocks, turning local functions into blocks with phi arguments and
//! their calls into jumps, then normalizes the graph: final topological and
//! post-topological orders, sequential instruction numbering, and dominator
//! and post-dominator trees with O(1) interval-based queries.
//!
//! Phi operands that flow through explicit jump arguments are filled during
//! lowering; renaming mutable locals into SSA form is delegated to an
//! [`ssa::SsaFinalize`] collaborator invoked once per normalized graph.
//!
//! All types are single-threaded by design; a compilation unit (one
//! [`ir::ExprArena`] and the graphs inside it) is confined to one thread,
//! and parallelism across units is the caller's concern.
//!
//! # Examples
//!
//! ```rust
//! use cfglower::ir::{BinaryOp, CodeBody, Expr, ExprArena, VarKind};
//! use cfglower::lower::CfgReducer;
//!
//! // fun x -> code { if x <= 0 then 0 else x }
//! let mut arena = ExprArena::new();
//! let param = arena.alloc_decl("x", VarKind::Fun, None);
//! let x = arena.alloc_identifier("x");
//! let zero = arena.alloc_int(0);
//! let cond = arena.alloc_binary(BinaryOp::Leq, x, zero);
//! let zero2 = arena.alloc_int(0);
//! let x2 = arena.alloc_identifier("x");
//! let body = arena.alloc_if(cond, zero2, x2);
//! let code = arena.alloc_code(body);
//! let func = arena.alloc_function(param, code);
//!
//! let lowered = CfgReducer::lower(&mut arena, func)?;
//! assert!(lowered.diagnostics.is_empty());
//!
//! let Expr::Function { body, .. } = arena.expr(lowered.expr) else {
//!     unreachable!()
//! };
//! let Expr::Code { body: CodeBody::Cfg(cfg) } = arena.expr(*body) else {
//!     unreachable!()
//! };
//! // entry, then-arm, else-arm, exit; the entry dominates everything.
//! assert_eq!(cfg.topo_order().len(), 4);
//! assert!(cfg.dominates(cfg.entry(), cfg.exit()));
//! # Ok::<(), cfglower::Error>(())
//! ```

pub mod cfg;
pub mod diag;
mod error;
pub mod ir;
pub mod lower;
pub mod ssa;

pub use error::Error;

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;

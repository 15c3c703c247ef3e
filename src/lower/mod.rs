//! Lowering from the direct-style expression IR to control-flow graphs.
//!
//! [`CfgReducer`] walks an expression tree and rewrites every outermost
//! [`Expr::Code`] body into a [`Scfg`]. The walk is a rewriting traversal:
//! nodes whose children did not change are returned as-is, everything else
//! is re-allocated in the same arena.
//!
//! Two pieces of drive state steer the walk:
//!
//! - `current_block` is the block instructions are emitted into; it is
//!   `None` outside a graph and after a jump closes the block.
//! - `continuation` is the block a tail-position value jumps to. It is set
//!   for code bodies, conditional arms and pending-block bodies, and cleared
//!   around every operand position, so "continuation present" is exactly
//!   "tail position".
//!
//! Local functions do not become nested graphs. Each local [`Expr::Code`]
//! is assigned a block whose phi arguments stand in for the function's
//! parameters, and every call to it becomes a jump carrying the arguments.
//! All call sites must therefore return to the same place: the first call
//! fixes the block's continuation, and a later call under a different
//! continuation fails with [`Error::ContinuationMismatch`]. Bodies of these
//! pending blocks are translated after the main body, once their
//! continuation is known; a local function that is never called is dropped.

use std::collections::HashMap;

use crate::{
    cfg::{BlockId, Scfg, Terminator},
    diag::Diagnostics,
    ir::{CodeBody, Expr, ExprArena, ExprId, VarContext, VarId, VarKind},
    ssa::{NoopSsa, SsaFinalize},
    Error, Result,
};

/// A block allocated for a local function whose body has not been
/// translated yet.
///
/// The scope snapshot was taken at the function's definition point, with
/// each parameter rebound to the corresponding block phi. The body is
/// translated once a call site has fixed the continuation.
#[derive(Debug)]
struct PendingBlock {
    block: BlockId,
    body: ExprId,
    scope: VarContext,
    continuation: Option<BlockId>,
    processed: bool,
}

/// The result of lowering one expression tree.
#[derive(Debug)]
pub struct Lowered {
    /// Root of the rewritten tree; every code body it contains is now a
    /// normalized graph.
    pub expr: ExprId,
    /// User-facing reports collected along the way.
    pub diagnostics: Diagnostics,
}

/// The lowering engine.
///
/// # Examples
///
/// ```rust
/// use cfglower::ir::{BinaryOp, CodeBody, Expr, ExprArena, VarKind};
/// use cfglower::lower::CfgReducer;
///
/// let mut arena = ExprArena::new();
/// // fun x -> code { x + 1 }
/// let param = arena.alloc_decl("x", VarKind::Fun, None);
/// let x = arena.alloc_identifier("x");
/// let one = arena.alloc_int(1);
/// let sum = arena.alloc_binary(BinaryOp::Add, x, one);
/// let code = arena.alloc_code(sum);
/// let func = arena.alloc_function(param, code);
///
/// let lowered = CfgReducer::lower(&mut arena, func).unwrap();
/// assert!(lowered.diagnostics.is_empty());
///
/// let Expr::Function { body, .. } = arena.expr(lowered.expr) else {
///     unreachable!()
/// };
/// let Expr::Code { body: CodeBody::Cfg(cfg) } = arena.expr(*body) else {
///     unreachable!()
/// };
/// assert!(cfg.is_normalized());
/// ```
pub struct CfgReducer<'a> {
    ssa: &'a mut dyn SsaFinalize,
    cfg: Option<Scfg>,
    current_block: Option<BlockId>,
    continuation: Option<BlockId>,
    scope: VarContext,
    /// Translated local code node -> index into `pending`.
    code_map: HashMap<ExprId, usize>,
    pending: Vec<PendingBlock>,
    /// Arguments peeled off application chains, consumed by the next call.
    pending_args: Vec<ExprId>,
    /// Scope depth when emission into the current region began; parameter
    /// runs never extend below it.
    scope_base: usize,
    diagnostics: Diagnostics,
}

impl<'a> CfgReducer<'a> {
    /// Lowers the tree rooted at `root`, rewriting every code body into a
    /// normalized graph.
    ///
    /// # Errors
    ///
    /// Returns an error on any structural violation; see [`Error`].
    pub fn lower(arena: &mut ExprArena, root: ExprId) -> Result<Lowered> {
        let mut ssa = NoopSsa;
        Self::lower_with(arena, root, &mut ssa)
    }

    /// Like [`CfgReducer::lower`], additionally running `ssa` once on each
    /// graph after normalization.
    ///
    /// # Errors
    ///
    /// Returns an error on any structural violation, or any error the
    /// finalizer reports.
    pub fn lower_with(
        arena: &mut ExprArena,
        root: ExprId,
        ssa: &mut dyn SsaFinalize,
    ) -> Result<Lowered> {
        let mut reducer = CfgReducer::new(ssa);
        let expr = reducer
            .translate(arena, root)?
            .ok_or(Error::Invariant("top-level expression produced no value"))?;
        Ok(Lowered {
            expr,
            diagnostics: reducer.diagnostics,
        })
    }

    fn new(ssa: &'a mut dyn SsaFinalize) -> Self {
        CfgReducer {
            ssa,
            cfg: None,
            current_block: None,
            continuation: None,
            scope: VarContext::new(),
            code_map: HashMap::new(),
            pending: Vec::new(),
            pending_args: Vec::new(),
            scope_base: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Translates one node. `Ok(None)` means the expression transferred
    /// control instead of producing a value.
    fn translate(&mut self, arena: &mut ExprArena, id: ExprId) -> Result<Option<ExprId>> {
        match arena.expr(id).clone() {
            Expr::Literal(_) | Expr::Phi(_) => Ok(Some(id)),
            Expr::Identifier(name) => self.translate_identifier(arena, id, &name),
            Expr::Variable(decl) => match arena.decl(decl).definition {
                Some(definition) => Ok(Some(definition)),
                None => Ok(Some(id)),
            },
            Expr::Function { param, body } => self.translate_function(arena, id, param, body),
            Expr::Code { body } => self.translate_code(arena, id, body),
            Expr::Apply { callee, arg } => self.translate_apply(arena, id, callee, arg),
            Expr::Call { target } => self.translate_call(arena, id, target),
            Expr::Unary { op, operand } => {
                let new_operand = self.translate_value(arena, operand)?;
                let out = if new_operand == operand {
                    id
                } else {
                    arena.alloc_unary(op, new_operand)
                };
                self.add_instruction(arena, out)?;
                Ok(Some(out))
            }
            Expr::Binary { op, lhs, rhs } => {
                let new_lhs = self.translate_value(arena, lhs)?;
                let new_rhs = self.translate_value(arena, rhs)?;
                let out = if new_lhs == lhs && new_rhs == rhs {
                    id
                } else {
                    arena.alloc_binary(op, new_lhs, new_rhs)
                };
                self.add_instruction(arena, out)?;
                Ok(Some(out))
            }
            Expr::Project { record, field } => {
                let new_record = self.translate_value(arena, record)?;
                let out = if new_record == record {
                    id
                } else {
                    arena.alloc(Expr::Project {
                        record: new_record,
                        field,
                    })
                };
                Ok(Some(out))
            }
            Expr::IfThenElse {
                condition,
                then_expr,
                else_expr,
            } => self.translate_if(arena, id, condition, then_expr, else_expr),
            Expr::Let { decl, body } => self.translate_let(arena, id, decl, body),
        }
    }

    /// Translates a node in operand position: the continuation is cleared
    /// so nothing inside treats itself as a tail expression.
    fn translate_arg(&mut self, arena: &mut ExprArena, id: ExprId) -> Result<Option<ExprId>> {
        let saved = self.continuation.take();
        let result = self.translate(arena, id);
        self.continuation = saved;
        result
    }

    /// Like [`CfgReducer::translate_arg`], but a diverted result is a
    /// structural error.
    fn translate_value(&mut self, arena: &mut ExprArena, id: ExprId) -> Result<ExprId> {
        self.translate_arg(arena, id)?
            .ok_or(Error::Invariant("operand produced no value"))
    }

    /// Translates a tail region: a produced value is routed to the active
    /// continuation with a jump.
    fn translate_tail(&mut self, arena: &mut ExprArena, id: ExprId) -> Result<()> {
        let value = self.translate(arena, id)?;
        if let Some(value) = value {
            if self.current_block.is_some() {
                let k = self
                    .continuation
                    .ok_or(Error::Invariant("tail value with no continuation"))?;
                self.create_goto(arena, k, &[value])?;
            }
        }
        Ok(())
    }

    fn translate_identifier(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        name: &str,
    ) -> Result<Option<ExprId>> {
        match self.scope.lookup(name) {
            Some(decl) => match arena.decl(decl).definition {
                Some(definition) => Ok(Some(definition)),
                // Parameters and in-flight recursive bindings stay symbolic.
                None => Ok(Some(arena.alloc_variable(decl))),
            },
            None => {
                self.diagnostics
                    .error(format!("unresolved identifier '{name}'"));
                Ok(Some(id))
            }
        }
    }

    fn translate_function(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        param: VarId,
        body: ExprId,
    ) -> Result<Option<ExprId>> {
        let name = arena.decl(param).name.clone();
        self.scope.push(name.as_str(), param);
        let new_body = self.translate_value(arena, body);
        self.scope.pop_expecting(&name)?;
        let new_body = new_body?;
        Ok(Some(if new_body == body {
            id
        } else {
            arena.alloc(Expr::Function {
                param,
                body: new_body,
            })
        }))
    }

    fn translate_code(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        body: CodeBody,
    ) -> Result<Option<ExprId>> {
        let CodeBody::Source(body_expr) = body else {
            return Ok(Some(id));
        };
        if self.cfg.is_some() {
            self.defer_code(arena, id, body_expr)?;
            Ok(Some(id))
        } else {
            self.lower_code_body(arena, id, body_expr)
        }
    }

    /// Assigns a block to a local function's code and queues its body.
    ///
    /// The parameters of the lambdas wrapping this code are the innermost
    /// run of unbound parameter declarations on the scope stack; each gets
    /// a phi argument, and the snapshot taken for the pending block rebinds
    /// the parameter to that phi.
    fn defer_code(&mut self, arena: &mut ExprArena, id: ExprId, body: ExprId) -> Result<()> {
        let num_params = self.leading_fun_params(arena);
        let cfg = self
            .cfg
            .as_mut()
            .ok_or(Error::Invariant("no active graph"))?;
        let block = cfg.add_block(arena, num_params);

        let mut scope = self.scope.clone();
        let base = scope.len() - num_params;
        for i in 0..num_params {
            let (name, _) = scope.get(base + i);
            let name = name.to_string();
            let phi_id = cfg.block(block).arguments()[i];
            if let Expr::Phi(phi) = arena.expr_mut(phi_id) {
                phi.set_name(name.as_str());
            }
            let rebound = arena.alloc_decl(name.as_str(), VarKind::Fun, Some(phi_id));
            scope.rebind(base + i, rebound);
        }

        let index = self.pending.len();
        self.pending.push(PendingBlock {
            block,
            body,
            scope,
            continuation: None,
            processed: false,
        });
        self.code_map.insert(id, index);
        Ok(())
    }

    /// Counts the innermost run of parameter declarations without a bound
    /// value. Rebound parameters of an enclosing pending block carry a phi
    /// definition and end the run, as does any `let` binding. Parameters of
    /// the function enclosing the current region stay symbolic and are
    /// excluded by the scope watermark.
    fn leading_fun_params(&self, arena: &ExprArena) -> usize {
        let mut count = 0;
        for index in (self.scope_base..self.scope.len()).rev() {
            let (_, decl) = self.scope.get(index);
            let decl = arena.decl(decl);
            if decl.kind == VarKind::Fun && decl.definition.is_none() {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Lowers an outermost code body into a fresh graph, drains the pending
    /// blocks it spawned, normalizes, and runs the SSA finalizer.
    fn lower_code_body(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        body: ExprId,
    ) -> Result<Option<ExprId>> {
        let cfg = Scfg::new(arena);
        let entry = cfg.entry();
        let exit = cfg.exit();
        self.cfg = Some(cfg);
        self.current_block = Some(entry);
        let saved_continuation = self.continuation.replace(exit);
        let saved_base = std::mem::replace(&mut self.scope_base, self.scope.len());

        self.translate_tail(arena, body)?;
        self.drain_pending(arena)?;

        self.scope_base = saved_base;
        self.continuation = saved_continuation;
        self.current_block = None;
        self.code_map.clear();
        self.pending.clear();
        let mut cfg = self
            .cfg
            .take()
            .ok_or(Error::Invariant("graph vanished during lowering"))?;

        cfg.compute_normal_form(arena)?;
        self.ssa.ssa_transform(&mut cfg, arena)?;

        *arena.expr_mut(id) = Expr::Code {
            body: CodeBody::Cfg(Box::new(cfg)),
        };
        Ok(Some(id))
    }

    /// Translates every pending block whose continuation has been adopted.
    ///
    /// Processing a body can create new pending blocks and adopt
    /// continuations of earlier ones, so the scan repeats until quiescent.
    /// Blocks that never gain a continuation were never called and stay out
    /// of the graph.
    fn drain_pending(&mut self, arena: &mut ExprArena) -> Result<()> {
        loop {
            let next = self
                .pending
                .iter()
                .position(|pb| !pb.processed && pb.continuation.is_some());
            let Some(index) = next else {
                return Ok(());
            };

            let pb = &mut self.pending[index];
            pb.processed = true;
            let block = pb.block;
            let body = pb.body;
            let continuation = pb.continuation;
            let scope = std::mem::take(&mut pb.scope);

            let saved_scope = std::mem::replace(&mut self.scope, scope);
            let saved_continuation =
                std::mem::replace(&mut self.continuation, continuation);
            let saved_base = std::mem::replace(&mut self.scope_base, self.scope.len());
            self.start_block(block)?;
            self.translate_tail(arena, body)?;
            self.scope = saved_scope;
            self.continuation = saved_continuation;
            self.scope_base = saved_base;
            self.current_block = None;
        }
    }

    fn translate_apply(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        callee: ExprId,
        arg: ExprId,
    ) -> Result<Option<ExprId>> {
        let new_callee = self.translate_value(arena, callee)?;
        let new_arg = self.translate_value(arena, arg)?;

        // Inside a graph, applying a known lambda peels one parameter: the
        // argument is held for the upcoming call and the lambda's body
        // (ultimately its code node) stands in for the application.
        if self.cfg.is_some() {
            if let Expr::Function { body, .. } = arena.expr(new_callee) {
                let body = *body;
                if matches!(arena.expr(body), Expr::Code { .. } | Expr::Function { .. }) {
                    self.pending_args.push(new_arg);
                    return Ok(Some(body));
                }
            }
        }

        Ok(Some(if new_callee == callee && new_arg == arg {
            id
        } else {
            arena.alloc_apply(new_callee, new_arg)
        }))
    }

    fn translate_call(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        target: ExprId,
    ) -> Result<Option<ExprId>> {
        let base = self.pending_args.len();
        let new_target = self.translate_value(arena, target)?;
        let args = self.pending_args.split_off(base);

        if self.cfg.is_some() {
            if let Some(&index) = self.code_map.get(&new_target) {
                return self.call_pending(arena, index, &args);
            }
        }

        // A target outside the current graph (a sibling graph's code, an
        // unknown callee) keeps its arguments: re-apply them in order and
        // emit an ordinary call instruction.
        let mut new_target = new_target;
        for arg in args {
            new_target = arena.alloc_apply(new_target, arg);
        }

        let out = if new_target == target {
            id
        } else {
            arena.alloc_call(new_target)
        };
        self.add_instruction(arena, out)?;
        Ok(Some(out))
    }

    /// Turns a call to a block-lowered local function into a jump.
    ///
    /// In tail position the call adopts the active continuation; in operand
    /// position a fresh join block is created and emission resumes there,
    /// with the join's phi as the call's value.
    fn call_pending(
        &mut self,
        arena: &mut ExprArena,
        index: usize,
        args: &[ExprId],
    ) -> Result<Option<ExprId>> {
        match self.continuation {
            Some(k) => {
                self.adopt_continuation(index, k)?;
                let block = self.pending[index].block;
                self.create_goto(arena, block, args)?;
                Ok(None)
            }
            None => {
                let join = self
                    .cfg
                    .as_mut()
                    .ok_or(Error::Invariant("no active graph"))?
                    .add_block(arena, 1);
                self.adopt_continuation(index, join)?;
                let block = self.pending[index].block;
                self.create_goto(arena, block, args)?;
                self.start_block(join)?;
                let phi = self
                    .cfg
                    .as_ref()
                    .ok_or(Error::Invariant("no active graph"))?
                    .block(join)
                    .arguments()[0];
                Ok(Some(phi))
            }
        }
    }

    fn adopt_continuation(&mut self, index: usize, continuation: BlockId) -> Result<()> {
        let pb = &mut self.pending[index];
        match pb.continuation {
            None => {
                pb.continuation = Some(continuation);
                Ok(())
            }
            Some(existing) if existing == continuation => Ok(()),
            Some(_) => Err(Error::ContinuationMismatch { block: pb.block }),
        }
    }

    fn translate_if(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        condition: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    ) -> Result<Option<ExprId>> {
        // Outside a graph the conditional stays a tree node.
        if self.cfg.is_none() {
            let c = self.translate_value(arena, condition)?;
            let t = self.translate_value(arena, then_expr)?;
            let e = self.translate_value(arena, else_expr)?;
            return Ok(Some(
                if c == condition && t == then_expr && e == else_expr {
                    id
                } else {
                    arena.alloc_if(c, t, e)
                },
            ));
        }

        let cond = self.translate_value(arena, condition)?;

        let (then_block, else_block) = {
            let cfg = self
                .cfg
                .as_mut()
                .ok_or(Error::Invariant("no active graph"))?;
            (cfg.add_block(arena, 0), cfg.add_block(arena, 0))
        };
        let (join, fresh_join) = match self.continuation {
            Some(k) => (k, false),
            None => {
                let cfg = self
                    .cfg
                    .as_mut()
                    .ok_or(Error::Invariant("no active graph"))?;
                let join = cfg.add_block(arena, 1);
                // Both arms will jump here.
                cfg.reserve_predecessors(join, 2, arena);
                (join, true)
            }
        };

        self.create_branch(arena, cond, then_block, else_block)?;

        let saved_continuation = self.continuation.replace(join);
        self.start_block(then_block)?;
        self.translate_tail(arena, then_expr)?;
        self.start_block(else_block)?;
        self.translate_tail(arena, else_expr)?;
        self.continuation = saved_continuation;

        if fresh_join {
            self.start_block(join)?;
            let phi = self
                .cfg
                .as_ref()
                .ok_or(Error::Invariant("no active graph"))?
                .block(join)
                .arguments()[0];
            Ok(Some(phi))
        } else {
            self.current_block = None;
            Ok(None)
        }
    }

    fn translate_let(
        &mut self,
        arena: &mut ExprArena,
        id: ExprId,
        decl: VarId,
        body: ExprId,
    ) -> Result<Option<ExprId>> {
        let name = arena.decl(decl).name.clone();
        let kind = arena.decl(decl).kind;
        let definition = arena
            .take_definition(decl)
            .ok_or(Error::Invariant("binding without a definition"))?;

        let value = match kind {
            VarKind::Letrec => {
                // The binding is visible while its own definition is
                // translated; references resolve to the bare declaration
                // and pick up the patched value later.
                self.scope.push(name.as_str(), decl);
                self.translate_value(arena, definition)?
            }
            _ => {
                let value = self.translate_value(arena, definition)?;
                self.scope.push(name.as_str(), decl);
                value
            }
        };
        if arena.name(value).is_none() {
            arena.set_name(value, name.as_str());
        }
        arena.set_definition(decl, value);

        let result = if self.cfg.is_some() {
            // Inside a graph the binding is pure bookkeeping; the body's
            // value is the let's value.
            self.translate(arena, body)
        } else {
            match self.translate_arg(arena, body) {
                Ok(Some(new_body)) => Ok(Some(if new_body == body {
                    id
                } else {
                    arena.alloc_let(decl, new_body)
                })),
                other => other,
            }
        };
        self.scope.pop_expecting(&name)?;
        result
    }

    /// Appends a materializable node to the current block, once.
    ///
    /// Only unary and binary operations and residual calls become block
    /// instructions; everything else is a pure value. A node already
    /// stamped with a block is shared, not re-inserted.
    fn add_instruction(&mut self, arena: &mut ExprArena, id: ExprId) -> Result<()> {
        match arena.expr(id) {
            Expr::Unary { .. } | Expr::Binary { .. } | Expr::Call { .. } => {}
            _ => return Ok(()),
        }
        let Some(cfg) = self.cfg.as_mut() else {
            return Ok(());
        };
        if arena.block_of(id).is_some() {
            return Ok(());
        }
        let current = self
            .current_block
            .ok_or(Error::Invariant("instruction emitted with no open block"))?;
        arena.set_block(id, current);
        cfg.block_mut(current).instructions.push(id);
        Ok(())
    }

    /// Closes the current block with a jump, filling the target's phi
    /// operand slots for the new edge.
    fn create_goto(&mut self, arena: &mut ExprArena, target: BlockId, args: &[ExprId]) -> Result<()> {
        let cfg = self
            .cfg
            .as_mut()
            .ok_or(Error::Invariant("no active graph"))?;
        let current = self
            .current_block
            .take()
            .ok_or(Error::Invariant("jump emitted with no open block"))?;

        let expected = cfg.block(target).arguments().len();
        if args.len() != expected {
            return Err(Error::ArityMismatch {
                target,
                expected,
                supplied: args.len(),
            });
        }

        let edge = cfg.add_predecessor(target, current, arena);
        for (i, &value) in args.iter().enumerate() {
            let phi_id = cfg.block(target).arguments()[i];
            if let Expr::Phi(phi) = arena.expr_mut(phi_id) {
                phi.set_value(edge, value);
            }
        }
        cfg.block_mut(current).terminator = Some(Terminator::Goto {
            target,
            phi_index: edge,
        });
        Ok(())
    }

    /// Closes the current block with a two-way branch. Branch targets take
    /// no phi arguments.
    fn create_branch(
        &mut self,
        arena: &mut ExprArena,
        condition: ExprId,
        then_block: BlockId,
        else_block: BlockId,
    ) -> Result<()> {
        let cfg = self
            .cfg
            .as_mut()
            .ok_or(Error::Invariant("no active graph"))?;
        let current = self
            .current_block
            .take()
            .ok_or(Error::Invariant("branch emitted with no open block"))?;

        if !cfg.block(then_block).arguments().is_empty()
            || !cfg.block(else_block).arguments().is_empty()
        {
            return Err(Error::Invariant("branch target takes phi arguments"));
        }

        cfg.add_predecessor(then_block, current, arena);
        cfg.add_predecessor(else_block, current, arena);
        cfg.block_mut(current).terminator = Some(Terminator::Branch {
            condition,
            then_block,
            else_block,
        });
        Ok(())
    }

    /// Opens a block for emission and makes it part of the graph.
    fn start_block(&mut self, block: BlockId) -> Result<()> {
        let cfg = self
            .cfg
            .as_mut()
            .ok_or(Error::Invariant("no active graph"))?;
        if cfg.block(block).in_graph {
            return Err(Error::Invariant("block started twice"));
        }
        if self.current_block.is_some() {
            return Err(Error::Invariant("block started while another is open"));
        }
        cfg.add_to_graph(block);
        self.current_block = Some(block);
        Ok(())
    }
}

//! End-to-end lowering tests: expression trees in, normalized graphs out.

use cfglower::{
    cfg::{BlockId, Scfg, Terminator},
    ir::{BinaryOp, CodeBody, Expr, ExprArena, ExprId, VarKind},
    lower::CfgReducer,
    Error,
};

/// Builds `fun <param> -> code { <body> }`.
fn function_of(
    arena: &mut ExprArena,
    param: &str,
    make_body: impl FnOnce(&mut ExprArena) -> ExprId,
) -> ExprId {
    let decl = arena.alloc_decl(param, VarKind::Fun, None);
    let body = make_body(arena);
    let code = arena.alloc_code(body);
    arena.alloc_function(decl, code)
}

fn lowered_cfg(arena: &ExprArena, func: ExprId) -> &Scfg {
    let Expr::Function { body, .. } = arena.expr(func) else {
        panic!("expected a function at the root");
    };
    let Expr::Code {
        body: CodeBody::Cfg(cfg),
    } = arena.expr(*body)
    else {
        panic!("expected a lowered code body");
    };
    cfg
}

fn goto_target(cfg: &Scfg, block: BlockId) -> BlockId {
    match cfg.block(block).terminator() {
        Some(Terminator::Goto { target, .. }) => *target,
        other => panic!("expected a goto, found {other:?}"),
    }
}

fn branch_targets(cfg: &Scfg, block: BlockId) -> (BlockId, BlockId) {
    match cfg.block(block).terminator() {
        Some(Terminator::Branch {
            then_block,
            else_block,
            ..
        }) => (*then_block, *else_block),
        other => panic!("expected a branch, found {other:?}"),
    }
}

/// A recursive local function called in tail position becomes a block with
/// a loop back edge, not a nested graph.
#[test]
fn test_recursive_local_function_becomes_loop() {
    let mut arena = ExprArena::new();
    // fun x -> code {
    //   letrec f = fun y -> code { if y <= 0 then y else call (f (y - 1)) }
    //   in call (f x)
    // }
    let root = function_of(&mut arena, "x", |arena| {
        let f_body = {
            let y = arena.alloc_identifier("y");
            let zero = arena.alloc_int(0);
            let cond = arena.alloc_binary(BinaryOp::Leq, y, zero);
            let y2 = arena.alloc_identifier("y");
            let f_ref = arena.alloc_identifier("f");
            let y3 = arena.alloc_identifier("y");
            let one = arena.alloc_int(1);
            let decrement = arena.alloc_binary(BinaryOp::Sub, y3, one);
            let rec_apply = arena.alloc_apply(f_ref, decrement);
            let rec_call = arena.alloc_call(rec_apply);
            arena.alloc_if(cond, y2, rec_call)
        };
        let y_decl = arena.alloc_decl("y", VarKind::Fun, None);
        let inner_code = arena.alloc_code(f_body);
        let f_fn = arena.alloc_function(y_decl, inner_code);
        let f_decl = arena.alloc_decl("f", VarKind::Letrec, Some(f_fn));

        let f_ref = arena.alloc_identifier("f");
        let x = arena.alloc_identifier("x");
        let apply = arena.alloc_apply(f_ref, x);
        let call = arena.alloc_call(apply);
        arena.alloc_let(f_decl, call)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    assert!(lowered.diagnostics.is_empty());
    let cfg = lowered_cfg(&arena, lowered.expr);

    // entry, the block for f, both conditional arms, exit.
    assert_eq!(cfg.in_graph_count(), 5);
    assert!(cfg.is_normalized());

    let f_block = goto_target(cfg, cfg.entry());
    let (then_block, else_block) = branch_targets(cfg, f_block);

    // The recursive tail call is a jump back to f's block.
    assert_eq!(goto_target(cfg, else_block), f_block);
    assert_eq!(goto_target(cfg, then_block), cfg.exit());

    // Two call sites, two predecessor edges, two phi operands.
    assert_eq!(
        cfg.block(f_block).predecessors(),
        &[cfg.entry(), else_block]
    );
    let param_phi = cfg.block(f_block).arguments()[0];
    let phi = arena.phi(param_phi).unwrap();
    assert_eq!(phi.name(), Some("y"));
    assert_eq!(phi.values().len(), 2);
    assert!(phi.values().iter().all(Option::is_some));

    // Only the then arm reaches the exit.
    let exit_phi = cfg.block(cfg.exit()).arguments()[0];
    assert_eq!(arena.phi(exit_phi).unwrap().values().len(), 1);

    // The jump from the else arm is a back edge: its target precedes it in
    // topological order, and the header dominates the arm.
    assert!(cfg.block(f_block).block_id() < cfg.block(else_block).block_id());
    assert!(cfg.dominates(f_block, else_block));
    assert!(cfg.post_dominates(cfg.exit(), f_block));
}

/// One call in operand position is fine: the call borrows a fresh join
/// block and the join's phi is the call's value.
#[test]
fn test_single_call_in_operand_position() {
    let mut arena = ExprArena::new();
    // fun x -> code { let f = fun y -> code { y } in (call (f x)) + 1 }
    let root = function_of(&mut arena, "x", |arena| {
        let y_decl = arena.alloc_decl("y", VarKind::Fun, None);
        let y = arena.alloc_identifier("y");
        let inner_code = arena.alloc_code(y);
        let f_fn = arena.alloc_function(y_decl, inner_code);
        let f_decl = arena.alloc_decl("f", VarKind::Let, Some(f_fn));

        let f_ref = arena.alloc_identifier("f");
        let x = arena.alloc_identifier("x");
        let apply = arena.alloc_apply(f_ref, x);
        let call = arena.alloc_call(apply);
        let one = arena.alloc_int(1);
        let sum = arena.alloc_binary(BinaryOp::Add, call, one);
        arena.alloc_let(f_decl, sum)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    let cfg = lowered_cfg(&arena, lowered.expr);

    // entry, f's block, the join, exit.
    assert_eq!(cfg.in_graph_count(), 4);

    let f_block = goto_target(cfg, cfg.entry());
    let join = goto_target(cfg, f_block);
    assert_eq!(goto_target(cfg, join), cfg.exit());

    // The addition lives in the join and consumes the join's phi.
    let join_phi = cfg.block(join).arguments()[0];
    let sum = cfg.block(join).instructions()[0];
    assert!(matches!(
        arena.expr(sum),
        Expr::Binary { op: BinaryOp::Add, lhs, .. } if *lhs == join_phi
    ));
}

/// Two calls to the same local function from different operand positions
/// would need two different return points; that cannot be expressed as
/// jumps.
#[test]
fn test_two_non_tail_calls_are_rejected() {
    let mut arena = ExprArena::new();
    // fun x -> code { let f = fun y -> code { y } in
    //                 (call (f 1)) + (call (f 2)) }
    let root = function_of(&mut arena, "x", |arena| {
        let y_decl = arena.alloc_decl("y", VarKind::Fun, None);
        let y = arena.alloc_identifier("y");
        let inner_code = arena.alloc_code(y);
        let f_fn = arena.alloc_function(y_decl, inner_code);
        let f_decl = arena.alloc_decl("f", VarKind::Let, Some(f_fn));

        let call_f = |arena: &mut ExprArena, value: i64| {
            let f_ref = arena.alloc_identifier("f");
            let lit = arena.alloc_int(value);
            let apply = arena.alloc_apply(f_ref, lit);
            arena.alloc_call(apply)
        };
        let first = call_f(arena, 1);
        let second = call_f(arena, 2);
        let sum = arena.alloc_binary(BinaryOp::Add, first, second);
        arena.alloc_let(f_decl, sum)
    });

    let err = CfgReducer::lower(&mut arena, root).unwrap_err();
    assert!(matches!(err, Error::ContinuationMismatch { .. }));
    let message = err.to_string();
    assert!(message.contains("cannot express call"));
    assert!(message.contains("tail call"));
}

/// Calling a function that was lowered into its own graph is not a jump:
/// the peeled argument is re-applied to the callee and the call stays an
/// ordinary call instruction in the calling graph.
#[test]
fn test_call_into_sibling_graph_is_ordinary_call() {
    let mut arena = ExprArena::new();
    // let g = fun y -> code { y } in fun x -> code { call (g x) }
    let y_decl = arena.alloc_decl("y", VarKind::Fun, None);
    let y = arena.alloc_identifier("y");
    let g_code = arena.alloc_code(y);
    let g_fn = arena.alloc_function(y_decl, g_code);
    let g_decl = arena.alloc_decl("g", VarKind::Let, Some(g_fn));
    let outer = function_of(&mut arena, "x", |arena| {
        let g_ref = arena.alloc_identifier("g");
        let x = arena.alloc_identifier("x");
        let apply = arena.alloc_apply(g_ref, x);
        arena.alloc_call(apply)
    });
    let root = arena.alloc_let(g_decl, outer);

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    assert!(lowered.diagnostics.is_empty());

    // g got its own normalized graph.
    assert!(matches!(
        arena.expr(g_code),
        Expr::Code { body: CodeBody::Cfg(cfg) } if cfg.is_normalized()
    ));

    // The outer graph holds one call instruction whose target applies g's
    // code to the argument.
    let cfg = lowered_cfg(&arena, outer);
    assert_eq!(cfg.in_graph_count(), 2);
    assert_eq!(cfg.block(cfg.entry()).instructions().len(), 1);
    let call = cfg.block(cfg.entry()).instructions()[0];
    let Expr::Call { target } = arena.expr(call) else {
        panic!("expected a call instruction");
    };
    assert!(matches!(
        arena.expr(*target),
        Expr::Apply { callee, .. } if *callee == g_code
    ));
    let exit_phi = cfg.block(cfg.exit()).arguments()[0];
    assert_eq!(arena.phi(exit_phi).unwrap().values(), &[Some(call)]);
}

/// A conditional in operand position gets its own join block; the arm
/// values meet in the join's phi.
#[test]
fn test_conditional_in_operand_position_gets_fresh_join() {
    let mut arena = ExprArena::new();
    // fun c -> code { (if c then 1 else 2) + 10 }
    let root = function_of(&mut arena, "c", |arena| {
        let c = arena.alloc_identifier("c");
        let one = arena.alloc_int(1);
        let two = arena.alloc_int(2);
        let if_expr = arena.alloc_if(c, one, two);
        let ten = arena.alloc_int(10);
        arena.alloc_binary(BinaryOp::Add, if_expr, ten)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    let cfg = lowered_cfg(&arena, lowered.expr);

    // entry, then, else, join, exit.
    assert_eq!(cfg.in_graph_count(), 5);

    let (then_block, else_block) = branch_targets(cfg, cfg.entry());
    let join = goto_target(cfg, then_block);
    assert_eq!(goto_target(cfg, else_block), join);
    assert_ne!(join, cfg.exit());

    // The join's phi carries the two literal arm values.
    let join_phi = cfg.block(join).arguments()[0];
    let slots: Vec<ExprId> = arena
        .phi(join_phi)
        .unwrap()
        .values()
        .iter()
        .map(|slot| slot.expect("both slots filled"))
        .collect();
    let rendered: Vec<String> = slots.iter().map(|&s| arena.operand(s)).collect();
    assert_eq!(rendered, ["1", "2"]);

    // The addition consumes the phi and feeds the exit.
    let sum = cfg.block(join).instructions()[0];
    assert!(matches!(
        arena.expr(sum),
        Expr::Binary { op: BinaryOp::Add, lhs, .. } if *lhs == join_phi
    ));
    let exit_phi = cfg.block(cfg.exit()).arguments()[0];
    assert_eq!(arena.phi(exit_phi).unwrap().values(), &[Some(sum)]);
}

/// Bindings are bookkeeping only: nothing of the `let` survives in the
/// graph, and shadowing resolves innermost-first.
#[test]
fn test_lets_are_eliminated_with_shadowing() {
    let mut arena = ExprArena::new();
    // fun x -> code { let y = x + 1 in let y = y * 2 in y - 3 }
    let root = function_of(&mut arena, "x", |arena| {
        let x = arena.alloc_identifier("x");
        let one = arena.alloc_int(1);
        let sum = arena.alloc_binary(BinaryOp::Add, x, one);
        let outer_y = arena.alloc_decl("y", VarKind::Let, Some(sum));

        let y1 = arena.alloc_identifier("y");
        let two = arena.alloc_int(2);
        let product = arena.alloc_binary(BinaryOp::Mul, y1, two);
        let inner_y = arena.alloc_decl("y", VarKind::Let, Some(product));

        let y2 = arena.alloc_identifier("y");
        let three = arena.alloc_int(3);
        let difference = arena.alloc_binary(BinaryOp::Sub, y2, three);
        let inner_let = arena.alloc_let(inner_y, difference);
        arena.alloc_let(outer_y, inner_let)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    let cfg = lowered_cfg(&arena, lowered.expr);

    assert_eq!(cfg.in_graph_count(), 2);
    let entry = cfg.block(cfg.entry());
    assert_eq!(entry.instructions().len(), 3);
    for &instr in entry.instructions() {
        assert!(matches!(arena.expr(instr), Expr::Binary { .. }));
    }

    // Each binding named the instruction it bound; the chain threads
    // through the shadowed values in order.
    let (sum, product, difference) = (
        entry.instructions()[0],
        entry.instructions()[1],
        entry.instructions()[2],
    );
    assert_eq!(arena.name(sum), Some("y"));
    assert_eq!(arena.name(product), Some("y"));
    assert!(matches!(
        arena.expr(product),
        Expr::Binary { lhs, .. } if *lhs == sum
    ));
    assert!(matches!(
        arena.expr(difference),
        Expr::Binary { lhs, .. } if *lhs == product
    ));

    // Instruction numbering is sequential in topological order.
    assert_eq!(arena.instr_id(sum), 1);
    assert_eq!(arena.instr_id(product), 2);
    assert_eq!(arena.instr_id(difference), 3);
    assert_eq!(arena.instr_id(cfg.exit_phi()), 4);
    assert_eq!(arena.summary(difference), "%3 = %2(y) - 3");
}

/// Unresolved names are reported and stand in for themselves; lowering
/// carries on.
#[test]
fn test_unresolved_identifiers_are_collected() {
    let mut arena = ExprArena::new();
    let root = function_of(&mut arena, "x", |arena| {
        let ghost = arena.alloc_identifier("ghost");
        let phantom = arena.alloc_identifier("phantom");
        arena.alloc_binary(BinaryOp::Add, ghost, phantom)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    assert_eq!(lowered.diagnostics.error_count(), 2);
    let rendered = lowered.diagnostics.to_string();
    assert!(rendered.contains("error: unresolved identifier 'ghost'\n"));
    assert!(rendered.contains("error: unresolved identifier 'phantom'\n"));

    let cfg = lowered_cfg(&arena, lowered.expr);
    assert!(cfg.is_normalized());
    let sum = cfg.block(cfg.entry()).instructions()[0];
    assert!(matches!(
        arena.expr(sum),
        Expr::Binary { lhs, .. } if matches!(arena.expr(*lhs), Expr::Identifier(n) if n == "ghost")
    ));
}

/// A lowered graph renders to DOT with one node per started block.
#[test]
fn test_dot_export_of_lowered_graph() {
    let mut arena = ExprArena::new();
    let root = function_of(&mut arena, "x", |arena| {
        let x = arena.alloc_identifier("x");
        let one = arena.alloc_int(1);
        arena.alloc_binary(BinaryOp::Add, x, one)
    });

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    let cfg = lowered_cfg(&arena, lowered.expr);

    let dot = cfg.to_dot(&arena);
    assert!(dot.starts_with("digraph cfg {"));
    assert!(dot.contains("b0"));
    assert!(dot.contains("->"));
    assert!(dot.contains("return"));
    assert!(dot.trim_end().ends_with('}'));
}

/// Two sibling functions lower into two independent graphs.
#[test]
fn test_sibling_functions_get_independent_graphs() {
    let mut arena = ExprArena::new();
    let first = function_of(&mut arena, "a", |arena| {
        let a = arena.alloc_identifier("a");
        let one = arena.alloc_int(1);
        arena.alloc_binary(BinaryOp::Add, a, one)
    });
    let second = function_of(&mut arena, "b", |arena| {
        let b = arena.alloc_identifier("b");
        let two = arena.alloc_int(2);
        arena.alloc_binary(BinaryOp::Mul, b, two)
    });
    // Tie them together under a pair of bindings returning the second.
    let first_decl = arena.alloc_decl("first", VarKind::Let, Some(first));
    let second_decl = arena.alloc_decl("second", VarKind::Let, Some(second));
    let second_ref = arena.alloc_identifier("second");
    let inner = arena.alloc_let(second_decl, second_ref);
    let root = arena.alloc_let(first_decl, inner);

    let lowered = CfgReducer::lower(&mut arena, root).unwrap();
    assert!(lowered.diagnostics.is_empty());

    let first_cfg = lowered_cfg(&arena, first);
    let second_cfg = lowered_cfg(&arena, second);
    assert!(first_cfg.is_normalized());
    assert!(second_cfg.is_normalized());
    assert_eq!(first_cfg.in_graph_count(), 2);
    assert_eq!(second_cfg.in_graph_count(), 2);
}

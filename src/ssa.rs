//! The seam between lowering and SSA finalization.
//!
//! Lowering leaves every phi operand that is not routed through an explicit
//! jump argument unset; renaming local variables into SSA form is the job of
//! a separate collaborator. [`SsaFinalize`] is the narrow interface that
//! collaborator implements. The reducer invokes it exactly once per graph,
//! after normalization, so implementations can rely on final block order,
//! instruction numbering and both dominator trees.

use crate::{
    cfg::Scfg,
    ir::ExprArena,
    Result,
};

/// An SSA finalization pass applied to each normalized graph.
pub trait SsaFinalize {
    /// Transforms one normalized graph in place.
    ///
    /// # Errors
    ///
    /// Implementations return an error to abort lowering of the whole unit.
    fn ssa_transform(&mut self, cfg: &mut Scfg, arena: &mut ExprArena) -> Result<()>;
}

impl<T: SsaFinalize + ?Sized> SsaFinalize for &mut T {
    fn ssa_transform(&mut self, cfg: &mut Scfg, arena: &mut ExprArena) -> Result<()> {
        (**self).ssa_transform(cfg, arena)
    }
}

/// The do-nothing finalizer used when no collaborator is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSsa;

impl SsaFinalize for NoopSsa {
    fn ssa_transform(&mut self, _cfg: &mut Scfg, _arena: &mut ExprArena) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(usize);

    impl SsaFinalize for Counting {
        fn ssa_transform(&mut self, _cfg: &mut Scfg, _arena: &mut ExprArena) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn test_noop_and_by_ref_impls() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);

        NoopSsa.ssa_transform(&mut cfg, &mut arena).unwrap();

        let mut counting = Counting(0);
        let mut by_ref: &mut Counting = &mut counting;
        by_ref.ssa_transform(&mut cfg, &mut arena).unwrap();
        assert_eq!(counting.0, 1);
    }
}

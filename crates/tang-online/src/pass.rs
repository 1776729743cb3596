//! Pass tracking.
//!
//! The controller owns the current pass number. An example from a different
//! pass opens a [`PassBoundary`]; the learner runs its sync steps and then
//! hands the boundary back through [`PassController::complete`], which
//! decays the learning rate and advances the counter.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassBoundary {
    pub from: u64,
    pub to: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassController {
    current: u64,
}

impl PassController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// `Some` when `pass` differs from the current pass.
    pub fn observe(&self, pass: u64) -> Option<PassBoundary> {
        (pass != self.current).then_some(PassBoundary {
            from: self.current,
            to: pass,
        })
    }

    /// Close a boundary: `eta *= decay`, then move to the new pass.
    pub fn complete(&mut self, boundary: PassBoundary, eta: &mut f32, decay: f32) {
        debug_assert_eq!(boundary.from, self.current);
        *eta *= decay;
        self.current = boundary.to;
    }

    /// Jump to a pass without decaying, e.g. after a restore.
    pub fn reset(&mut self, pass: u64) {
        self.current = pass;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_only_on_change() {
        let mut c = PassController::new();
        assert_eq!(c.observe(0), None);
        let b = c.observe(1).unwrap();
        assert_eq!(b, PassBoundary { from: 0, to: 1 });

        let mut eta = 0.5;
        c.complete(b, &mut eta, 0.5);
        assert_eq!(eta, 0.25);
        assert_eq!(c.current(), 1);
        assert_eq!(c.observe(1), None);
    }

    #[test]
    fn observing_does_not_advance() {
        let c = PassController::new();
        assert!(c.observe(3).is_some());
        assert!(c.observe(3).is_some());
        assert_eq!(c.current(), 0);
    }
}

use std::fmt;

use z3::ast::Bool;
use z3::{Context, Model, Params, SatResult, Solver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Sat,
    Unsat,
    Timeout,
    Unknown,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Sat => write!(f, "SAT"),
            SolverStatus::Unsat => write!(f, "UNSAT"),
            SolverStatus::Timeout => write!(f, "TIMEOUT"),
            SolverStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

pub struct Z3Integration<'ctx> {
    ctx: &'ctx Context,
    timeout_ms: u32,
}

impl<'ctx> Z3Integration<'ctx> {
    // A zero timeout means no limit
    pub fn new(ctx: &'ctx Context, timeout_secs: u64) -> Self {
        let timeout_ms = timeout_secs.saturating_mul(1000).min(u32::MAX as u64) as u32;
        Z3Integration { ctx, timeout_ms }
    }

    fn solver(&self, formula: &Bool<'ctx>) -> Solver<'ctx> {
        let solver = Solver::new(self.ctx);
        if self.timeout_ms > 0 {
            let mut params = Params::new(self.ctx);
            params.set_u32("timeout", self.timeout_ms);
            solver.set_params(&params);
        }
        solver.assert(formula);
        solver
    }

    pub fn get_model(&self, formula: &Bool<'ctx>) -> (SolverStatus, Option<Model<'ctx>>) {
        let solver = self.solver(formula);
        match solver.check() {
            SatResult::Sat => (SolverStatus::Sat, solver.get_model()),
            SatResult::Unsat => (SolverStatus::Unsat, None),
            SatResult::Unknown => {
                let reason = solver.get_reason_unknown().unwrap_or_default();
                if reason.contains("timeout") || reason.contains("canceled") {
                    (SolverStatus::Timeout, None)
                } else {
                    (SolverStatus::Unknown, None)
                }
            }
        }
    }

    // SMT-LIB text of the query, as sent to the solver
    pub fn to_smt2(&self, formula: &Bool<'ctx>) -> String {
        let solver = Solver::new(self.ctx);
        solver.assert(formula);
        format!("(set-logic QF_AUFBV)\n{}(check-sat)\n(get-model)", solver)
    }
}

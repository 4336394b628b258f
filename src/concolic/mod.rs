pub mod actions;
pub mod blacklist;
pub mod concolic_var;
pub mod executor;
pub mod executor_branch;
pub mod executor_int;
pub mod instruction;
pub mod oracle;
pub mod path_constraint;
pub mod solver;
pub mod symbolic_var;
pub mod taint;
pub mod tracer;
pub mod z3_integration;

pub use concolic_var::ConcolicVar;
pub use executor::Engine;
pub use instruction::Instruction;
pub use solver::Input;
pub use symbolic_var::SymbolicVariable;

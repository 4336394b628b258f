pub mod concolic;
pub mod debugger;
pub mod state;
pub mod target_info;

pub use concolic::{executor, solver, tracer};

#[macro_use]
extern crate lazy_static;

pub mod explain;
pub mod model;
pub mod parser;
pub mod state;

pub use model::{PlanDocument, Resource};
pub use parser::parse_plan;
pub use state::{PlanEffect, PlanRow, PlanTree};

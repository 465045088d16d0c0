#[macro_use]
mod macros;

pub mod model;
pub mod snowflake;
pub mod util;

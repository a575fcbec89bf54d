//! Parser tests, split by area.

mod ctes;
mod errors;
mod expressions;

pub mod consolidate;
pub mod evaluate;
pub mod package;
pub mod splits;

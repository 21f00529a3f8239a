pub mod recalc;
pub mod system;

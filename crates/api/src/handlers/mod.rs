pub mod generations;
pub mod sweep;

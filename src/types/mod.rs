pub mod models;
pub mod raw;
pub mod tokens;

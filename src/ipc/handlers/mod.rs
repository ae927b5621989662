pub mod core;
pub mod import;
pub mod rows;
pub mod setup;
pub mod tables;

pub mod billing;
pub mod classes;
pub mod core;
pub mod payroll;
pub mod promotion;
pub mod results;
pub mod scores;
pub mod settings;
pub mod students;

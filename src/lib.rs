pub mod aggregate;
pub mod db;
pub mod error;
pub mod grade;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod payroll;
pub mod promotion;
pub mod ranking;
pub mod report;
pub mod settings;

pub use error::EngineError;

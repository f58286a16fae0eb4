pub mod discovery;
pub mod report;
pub mod traits;

pub mod deadline;
pub mod watchdog;

pub mod helper;
pub mod protocol;
pub mod traits;

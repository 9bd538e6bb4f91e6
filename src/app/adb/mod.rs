pub mod device;
pub mod locator;
pub mod monitor;
pub mod parse;
pub mod paths;
pub mod runner;
pub mod transfer;

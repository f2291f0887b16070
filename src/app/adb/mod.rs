pub mod locator;
pub mod logcat;
pub mod parse;
pub mod runner;

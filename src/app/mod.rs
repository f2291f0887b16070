pub mod adb;
pub mod build;
pub mod cleanup;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod models;

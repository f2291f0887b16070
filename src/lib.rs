pub mod app;

pub use app::driver::{AndroidTestDriver, TestDriver};
pub use app::error::AppError;
pub use app::logging::init_logging;

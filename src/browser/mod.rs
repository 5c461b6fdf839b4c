pub mod chrome;
pub mod driver;

pub use chrome::{ChromeDriver, ChromeOptions};
pub use driver::BrowserDriver;

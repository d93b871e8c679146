pub mod app;
pub mod command;
pub mod config;
pub mod counter;
pub mod domain;
pub mod encounters;
pub mod error;
pub mod fetcher;
pub mod harvest;
pub mod imaging;
pub mod output;
pub mod scraper;
pub mod shutdown;
pub mod store;
pub mod throttle;

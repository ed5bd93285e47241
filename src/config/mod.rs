pub mod etl_config;

pub use etl_config::*;

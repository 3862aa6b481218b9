pub mod nodes;
pub mod scenario;
pub mod topology;

pub use testing_framework_config::adjust_timeout;

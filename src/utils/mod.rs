pub mod logging;

pub use logging::{init as init_logging, truncate_text};

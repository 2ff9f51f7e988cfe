pub mod commands;
pub mod handlers;

pub use commands::{CLAP_STYLING, command_argument_builder};
pub use handlers::{batch_options_from_args, expand_path, init_logging, log_levels};

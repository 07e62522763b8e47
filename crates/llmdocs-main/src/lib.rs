pub mod commands;
pub mod config;
pub mod logging;

pub use commands::{
    complete_doc, format_model_line, list_models, new_doc, new_resolver, picker_preferences,
    resolve_model, NewDocOptions,
};
pub use config::{load_config, parse_config, resolve_conf_dir, LlmDocsConfig, LogConfig};
pub use logging::init_tracing;

pub mod error;
pub mod loader;
pub mod paths;

pub use error::ConfigError;
pub use loader::{
    config_exists, init_store, read_config, read_config_with_env, validate_config, write_config,
};
pub use paths::{find_store_root, resolve_paths, Paths};

//! Configuration system
//!
//! Sections are declared with `config_struct!` in `schemas`, loaded from TOML
//! by `utils`. The resulting `Config` is passed explicitly into the wallet
//! context; nothing here is global.

mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::*;
pub use utils::{load_config_from_path, load_config_from_str, validate_config, CONFIG_FILE_PATH};

//! Centralized command-line flag access
//!
//! Debug output is switched on per subsystem with `--debug-<tag>` flags
//! (e.g. `--debug-discovery`, `--debug-cache`). The arguments are captured
//! once; binaries and tests may override them with `set_cmd_args`.
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Replace the captured command-line arguments
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        // Poisoned mutex: fall back to the process arguments
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value following a flag, if any
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

/// `--debug-<key>` flag check
pub fn is_debug_flag_enabled(key: &str) -> bool {
    has_arg(&format!("--debug-{}", key))
}

/// `--verbose-<key>` flag check
pub fn is_verbose_flag_enabled(key: &str) -> bool {
    has_arg(&format!("--verbose-{}", key))
}

/// Global `--verbose` flag
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Discovery worker debug mode
pub fn is_debug_discovery_enabled() -> bool {
    is_debug_flag_enabled("discovery")
}

/// Query cache debug mode
pub fn is_debug_cache_enabled() -> bool {
    is_debug_flag_enabled("cache")
}

/// Pending transaction reconciler debug mode
pub fn is_debug_pending_enabled() -> bool {
    is_debug_flag_enabled("pending")
}

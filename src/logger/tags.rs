//! Subsystem tags attached to every log line

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Gateway,
    Discovery,
    Cache,
    Balances,
    Worth,
    Pending,
    Persistence,
    Wallet,
}

impl LogTag {
    /// Key used by `--debug-<key>` flags and the `logging.debug_tags` setting
    pub fn to_debug_key(&self) -> String {
        self.as_key().to_string()
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Gateway => "gateway",
            LogTag::Discovery => "discovery",
            LogTag::Cache => "cache",
            LogTag::Balances => "balances",
            LogTag::Worth => "worth",
            LogTag::Pending => "pending",
            LogTag::Persistence => "persistence",
            LogTag::Wallet => "wallet",
        }
    }

    /// Uppercase label without colors, used for the log file
    pub fn to_plain_string(&self) -> String {
        self.as_key().to_uppercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

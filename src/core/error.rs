use thiserror::Error;

/// Core error types for nftban
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// A single address token could not be parsed
    #[error("Malformed address '{input}': {reason}")]
    MalformedAddress { input: String, reason: String },

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedAddress {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of nftables error patterns and their translations
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an error message against known patterns and returns a translation
    /// suitable for an operator reading the sidecar's log.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify ban sets")
                .with_suggestion("Run nftban as root or grant CAP_NET_ADMIN")
                .with_suggestion("Or select an elevation method: --elevation sudo|run0");
        }

        if lower.contains("cache initialization failed") {
            return ErrorTranslation::new(
                "Failed to initialize nftables cache - insufficient privileges",
            )
            .with_suggestion("This usually means nft was started without root privileges");
        }

        // nft reports a missing set or table as ENOENT on the rule it could not process
        if lower.contains("could not process rule") && lower.contains("no such file") {
            return ErrorTranslation::new("Ban set or table does not exist")
                .with_suggestion("The bootstrap script has not been applied yet")
                .with_suggestion("Check --ipv4-set/--ipv6-set match the sets in the table");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("nftables is not installed or not found in PATH")
                .with_suggestion("Install nftables: sudo apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install nftables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S nftables  (Arch)");
        }

        if lower.contains("set") && lower.contains("does not exist") {
            return ErrorTranslation::new("Ban set does not exist")
                .with_suggestion("The bootstrap script has not been applied yet")
                .with_suggestion("Check --ipv4-set/--ipv6-set match the sets in the table");
        }

        if lower.contains("table") && lower.contains("does not exist") {
            return ErrorTranslation::new("Firewall table does not exist")
                .with_suggestion("Enable nftables so the bootstrap script creates the table");
        }

        if lower.contains("could not process rule") || lower.contains("syntax error") {
            return ErrorTranslation::new("Invalid nftables command syntax")
                .with_suggestion("Ensure IP addresses and network masks are valid")
                .with_suggestion("Check the set names for stray characters");
        }

        if lower.contains("interval overlaps") || lower.contains("conflicting intervals") {
            return ErrorTranslation::new("Ban entry overlaps an existing interval")
                .with_suggestion("A covering subnet is already present in the set");
        }

        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: sudo modprobe nf_tables");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: sudo nft list ruleset")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Error types for the sweep pipeline
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SweepError {
    // Startup errors
    Config(String),
    NoValidAccounts,
    WalletFile(String),

    // Remote node errors
    /// Timeouts, transport resets, "not found yet" races
    RpcTransient(String),
    /// The chain validated and refused the request (malformed tx, nonce conflict, ...)
    RpcRejection(String),

    // Local errors
    Signing(String),
    /// The worker running this account died before reporting
    TaskAborted(String),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::NoValidAccounts => write!(f, "No valid accounts to sweep"),
            Self::WalletFile(msg) => write!(f, "Wallet file error: {}", msg),
            Self::RpcTransient(msg) => write!(f, "Transient RPC error: {}", msg),
            Self::RpcRejection(msg) => write!(f, "RPC rejected request: {}", msg),
            Self::Signing(msg) => write!(f, "Signing failed: {}", msg),
            Self::TaskAborted(msg) => write!(f, "Worker task aborted: {}", msg),
        }
    }
}

impl std::error::Error for SweepError {}

impl SweepError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::NoValidAccounts => "NO_VALID_ACCOUNTS",
            Self::WalletFile(_) => "WALLET_FILE_ERROR",
            Self::RpcTransient(_) => "RPC_TRANSIENT",
            Self::RpcRejection(_) => "RPC_REJECTION",
            Self::Signing(_) => "SIGNING_FAILED",
            Self::TaskAborted(_) => "TASK_ABORTED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RpcTransient(_))
    }

    /// Startup-class errors abort the whole run; everything else stays with one account.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::NoValidAccounts | Self::WalletFile(_))
    }
}

/// Message fragments that mark a node-side error as a race or overload rather than a verdict.
const TRANSIENT_HINTS: &[&str] = &[
    "not found",
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "busy",
    "try again",
];

/// JSON-RPC codes that are always a verdict: method not found, invalid params.
const REJECTION_CODES: &[i64] = &[-32601, -32602];

/// Classifies a JSON-RPC error response returned by the node.
pub fn classify_node_error(code: i64, message: &str) -> SweepError {
    if REJECTION_CODES.contains(&code) {
        return SweepError::RpcRejection(message.to_string());
    }
    classify_node_message(message)
}

/// Classifies an error message returned by the node.
pub fn classify_node_message(message: &str) -> SweepError {
    let lower = message.to_lowercase();
    if TRANSIENT_HINTS.iter().any(|hint| lower.contains(hint)) {
        SweepError::RpcTransient(message.to_string())
    } else {
        SweepError::RpcRejection(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SweepError::RpcTransient("timeout".into()).is_retryable());
        assert!(!SweepError::RpcRejection("nonce too low".into()).is_retryable());
        assert!(!SweepError::Signing("bad key".into()).is_retryable());
        assert!(!SweepError::NoValidAccounts.is_retryable());
    }

    #[test]
    fn test_startup_errors() {
        assert!(SweepError::Config("x".into()).is_startup());
        assert!(SweepError::NoValidAccounts.is_startup());
        assert!(!SweepError::RpcTransient("x".into()).is_startup());
    }

    #[test]
    fn test_classify_node_message() {
        assert!(matches!(
            classify_node_message("header not found"),
            SweepError::RpcTransient(_)
        ));
        assert!(matches!(
            classify_node_message("Too Many Requests"),
            SweepError::RpcTransient(_)
        ));
        assert!(matches!(
            classify_node_message("nonce too low"),
            SweepError::RpcRejection(_)
        ));
        assert!(matches!(
            classify_node_message("insufficient funds for gas * price + value"),
            SweepError::RpcRejection(_)
        ));
    }

    #[test]
    fn test_method_not_found_is_rejection() {
        assert!(matches!(
            classify_node_error(-32601, "the method eth_maxPriorityFeePerGas does not exist/is not available"),
            SweepError::RpcRejection(_)
        ));
        assert!(matches!(
            classify_node_error(-32601, "Method not found"),
            SweepError::RpcRejection(_)
        ));
        assert!(matches!(
            classify_node_error(-32000, "header not found"),
            SweepError::RpcTransient(_)
        ));
    }

    #[test]
    fn test_display_and_code() {
        let err = SweepError::RpcRejection("intrinsic gas too low".into());
        assert_eq!(err.to_string(), "RPC rejected request: intrinsic gas too low");
        assert_eq!(err.error_code(), "RPC_REJECTION");
    }
}

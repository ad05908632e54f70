//! Action result classification
//!
//! Maps a dispatched action's outcome onto the closed [`ErrorType`]
//! vocabulary and picks the remediation hint recorded with each retry.

use tracing::debug;

use crate::domain::{ActionResult, ErrorType, RetryStrategy};

const TIMEOUT: &[&str] = &["timeout"];
const PERMISSION: &[&str] = &["permission", "access denied"];
const NETWORK: &[&str] = &["network", "connection", "unreachable"];
const RESOURCE: &[&str] = &["memory", "out of memory", "heap"];
const SYNTAX: &[&str] = &["syntax", "parse", "invalid"];
const MISSING: &[&str] = &["not found", "missing", "does not exist"];

/// Classify an action result; first matching rule wins
pub fn classify(result: &ActionResult) -> ErrorType {
    let error_type = classify_inner(result);
    debug!(status = result.status, %error_type, "classify: called");
    error_type
}

fn classify_inner(result: &ActionResult) -> ErrorType {
    let stderr = result.text("stderr");
    let error = result.text("error");
    let stdout = result.text("stdout");
    let diagnostic = format!("{}\n{}", stderr, error);

    let mentions = |needles: &[&str]| needles.iter().any(|n| diagnostic.contains(n));

    if result.status == 408 || mentions(TIMEOUT) {
        return ErrorType::Timeout;
    }
    if mentions(PERMISSION) {
        return ErrorType::Permission;
    }
    if mentions(NETWORK) {
        return ErrorType::Network;
    }
    // allocators report exhaustion on stdout too
    if mentions(RESOURCE) || RESOURCE.iter().any(|n| stdout.contains(n)) {
        return ErrorType::Resource;
    }
    if mentions(SYNTAX) {
        return ErrorType::Syntax;
    }
    if mentions(MISSING) {
        return ErrorType::MissingDependency;
    }
    if result.status >= 500 {
        return ErrorType::ServerError;
    }
    if result.status >= 400 {
        return ErrorType::ClientError;
    }
    if result.exit_code().is_some_and(|code| code != 0) {
        return ErrorType::NonzeroExit;
    }
    if result.has_truthy("error") {
        return ErrorType::ErrorFlag;
    }
    ErrorType::Unknown
}

/// Fixed remediation lookup
pub fn retry_strategy_for(error_type: ErrorType) -> RetryStrategy {
    match error_type {
        ErrorType::Timeout => RetryStrategy::WaitLonger,
        ErrorType::Permission => RetryStrategy::EscalatePrivileges,
        ErrorType::Network => RetryStrategy::RetryConnection,
        ErrorType::Resource => RetryStrategy::ReduceLoad,
        ErrorType::Syntax => RetryStrategy::FixSyntax,
        ErrorType::MissingDependency => RetryStrategy::InstallDependency,
        ErrorType::ServerError
        | ErrorType::ClientError
        | ErrorType::NonzeroExit
        | ErrorType::ErrorFlag
        | ErrorType::Unknown => RetryStrategy::DebugApproach,
    }
}

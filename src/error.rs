//! Centralized error types and handling

use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network state error: {0}")]
    Network(#[from] NetworkError),

    #[error("Route management error: {0}")]
    Route(#[from] RouteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event processing error: {0}")]
    Event(#[from] EventError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the link/route/rule tracker
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Link not found: {link}")]
    LinkNotFound { link: String },

    #[error("Gateway not found for link ifindex={index}")]
    GatewayNotFound { index: u32 },

    #[error("Failed to acquire link information: {0}")]
    AcquireLinks(String),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Kernel route and policy rule errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Failed to add route: {0}")]
    AddRoute(String),

    #[error("Failed to remove route: {0}")]
    RemoveRoute(String),

    #[error("Route already exists: {0}")]
    RouteExists(String),

    #[error("Failed to add routing policy rule: {0}")]
    AddRule(String),

    #[error("Failed to remove routing policy rule: {0}")]
    RemoveRule(String),

    #[error("No such kernel object: {0}")]
    NotFound(String),

    #[error("Netlink query failed: {0}")]
    Query(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Event subscription errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Failed to subscribe to events: {0}")]
    SubscribeFailed(String),

    #[error("Event stream error: {0}")]
    StreamError(String),
}

/// DBus client errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to connect to system bus: {0}")]
    ConnectionFailed(String),

    #[error("DBus call {method} failed: {reason}")]
    CallFailed { method: String, reason: String },

    #[error("Unexpected DBus payload: {0}")]
    InvalidPayload(String),
}

/// External script execution errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to create script directory {path}: {reason}")]
    CreateDir { path: String, reason: String },

    #[error("Failed to read script directory {path}: {reason}")]
    ReadDir { path: String, reason: String },

    #[error("Failed to spawn script {path}: {reason}")]
    Spawn { path: String, reason: String },

    #[error("Script {path} exited with {status}")]
    Failed { path: String, status: String },
}

//! Server startup errors.

use std::fmt;

/// Errors that prevent the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded.
    Config(config::ConfigError),
    /// The database pool could not be created or migrations failed.
    Database(String),
    /// OIDC provider discovery failed.
    Discovery(String),
    /// The listen address could not be bound.
    Bind(std::io::Error),
    /// The server exited with an error.
    Serve(std::io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "failed to load configuration: {err}"),
            Self::Database(msg) => write!(f, "database setup failed: {msg}"),
            Self::Discovery(msg) => write!(f, "OIDC provider discovery failed: {msg}"),
            Self::Bind(err) => write!(f, "failed to bind listen address: {err}"),
            Self::Serve(err) => write!(f, "server error: {err}"),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Bind(err) | Self::Serve(err) => Some(err),
            Self::Database(_) | Self::Discovery(_) => None,
        }
    }
}

impl From<config::ConfigError> for StartupError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_error_display() {
        let err = StartupError::Database("connection refused".to_string());
        assert!(err.to_string().contains("database setup failed"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn config_error_carries_source() {
        use std::error::Error;
        let err = StartupError::Config(config::ConfigError::NotFound("database_url".to_string()));
        assert!(err.source().is_some());
    }
}

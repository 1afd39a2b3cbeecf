use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Error surface for `vidrelay`.
///
/// Subsystems carry their own enums; glue code inside the binary stays on
/// `anyhow` and converts at the boundaries where a caller wants to match.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Transport / Channel ─────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Ephemeral file server ───────────────────────────────────────────
    #[error("publish: {0}")]
    Publish(#[from] PublishError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load config: {0}")]
    Load(String),

    #[error("could not save config: {0}")]
    Save(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {channel} connection lost: {reason}")]
    Lost { channel: String, reason: String },

    #[error("channel {channel} could not deliver: {reason}")]
    Delivery { channel: String, reason: String },
}

// ─── Publish errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("port {0} is unavailable")]
    PortUnavailable(u16),

    #[error("no free port in {start}-{end}")]
    PortRangeExhausted { start: u16, end: u16 },

    #[error("file missing before publish: {0}")]
    FileMissing(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Port unavailability is an internal fault; everything else is a
    /// publish failure proper.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::PortUnavailable(_) | Self::PortRangeExhausted { .. } => ErrorCode::Internal,
            Self::FileMissing(_) | Self::Io(_) => ErrorCode::PublishFailed,
        }
    }
}

// ─── Outcome codes ──────────────────────────────────────────────────────────

/// Numeric outcome codes surfaced in user-facing replies. `Busy` is the one
/// code that is never surfaced: a rejected trigger gets no reply at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Busy,
    DownloadTimeout,
    DownloadFailed,
    PublishFailed,
    Internal,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Busy => 100,
            Self::DownloadTimeout => 101,
            Self::DownloadFailed => 102,
            Self::PublishFailed => 103,
            Self::Internal => 110,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ERROR {}", self.code())
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_carry_their_subsystem_prefix() {
        let err = RelayError::Config(ConfigError::Validation("missing bot token".into()));
        assert_eq!(err.to_string(), "config: validation failed: missing bot token");
    }

    #[test]
    fn transport_errors_name_the_channel() {
        let err = TransportError::Lost {
            channel: "discord".into(),
            reason: "socket closed".into(),
        };
        assert!(err.to_string().contains("discord"));
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn anyhow_values_pass_through_transparently() {
        let relay_err: RelayError = anyhow::anyhow!("scratch dir vanished").into();
        assert_eq!(relay_err.to_string(), "scratch dir vanished");
    }

    #[test]
    fn port_errors_map_to_internal_code() {
        assert_eq!(
            PublishError::PortUnavailable(8080).error_code().code(),
            110
        );
        assert_eq!(
            PublishError::PortRangeExhausted {
                start: 8000,
                end: 8999
            }
            .error_code()
            .code(),
            110
        );
    }

    #[test]
    fn serve_errors_map_to_publish_code() {
        let err = PublishError::Io(std::io::Error::other("boom"));
        assert_eq!(err.error_code().code(), 103);
    }

    #[test]
    fn codes_match_reply_contract() {
        assert_eq!(ErrorCode::Busy.code(), 100);
        assert_eq!(ErrorCode::DownloadTimeout.code(), 101);
        assert_eq!(ErrorCode::DownloadFailed.code(), 102);
        assert_eq!(ErrorCode::PublishFailed.code(), 103);
        assert_eq!(ErrorCode::Internal.code(), 110);
        assert_eq!(ErrorCode::DownloadTimeout.to_string(), "ERROR 101");
    }
}

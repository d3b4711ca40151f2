use std::io;

/// Errors surfaced by the probing engine.
///
/// A lost probe is not an error: it is reported as [`crate::probe::Outcome::Timeout`].
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Host is neither a valid dotted quad nor resolvable to an IPv4 address
    #[error("unknown host {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Raw socket creation was denied by the OS
    #[error(
        "permission denied opening {kind} socket: {source} - \
         raw sockets can only be used by processes running as root/administrator"
    )]
    Permission {
        kind: &'static str,
        #[source]
        source: io::Error,
    },

    /// Socket-level failure while sending or receiving
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A readable buffer could not be decoded
    #[error("malformed packet: got {len} bytes, need at least {needed}")]
    MalformedPacket { len: usize, needed: usize },

    /// Payload would overflow the 16-bit IPv4 total length field
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// `run` was called on a session that already produced its result
    #[error("session already finished")]
    SessionFinished,
}

impl ProbeError {
    /// True for errors that need elevated privilege to fix
    pub fn is_permission(&self) -> bool {
        matches!(self, ProbeError::Permission { .. })
    }

    /// Resolution and permission errors abort a whole session; everything else
    /// only ends the current attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Resolution { .. }
                | ProbeError::Permission { .. }
                | ProbeError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_message_names_root() {
        let err = ProbeError::Permission {
            kind: "ICMP",
            source: io::Error::from_raw_os_error(libc::EPERM),
        };
        assert!(err.is_permission());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("root/administrator"));
    }

    #[test]
    fn test_transport_is_not_fatal() {
        let err = ProbeError::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(!err.is_permission());
        assert!(!err.is_fatal());
    }
}

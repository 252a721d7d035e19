//! Delivery-outcome classification.
//!
//! Session delivery is total: it never raises to the broadcast engine or the
//! coordinators. Instead every attempt resolves to one of three outcomes, and
//! the caller decides whether the recipient stays registered.

/// Outcome of delivering one message to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message was handed to the session's outbound channel.
    Ok,
    /// The delivery failed but the session may recover (e.g. a full
    /// outbound queue). Logged; the recipient stays registered.
    Transient(String),
    /// The session can never be used again (disposed handle or closed
    /// channel). The recipient must be evicted exactly once.
    Dead(String),
}

impl Delivery {
    /// True when the message was accepted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Delivery::Ok)
    }

    /// True when the session is unusable and the owner must be evicted.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, Delivery::Dead(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Delivery::Ok.is_ok());
        assert!(!Delivery::Ok.is_dead());
        assert!(Delivery::Dead("disposed handle".into()).is_dead());
        assert!(!Delivery::Transient("queue full".into()).is_dead());
    }
}

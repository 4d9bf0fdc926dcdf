//! Session and credential state

use crate::crypto::SessionKey;
use crate::wire::FLAG_PASSWORD_LOADED;

/// Where the channel stands with its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No password loaded; traffic is plaintext
    Insecure,
    /// Password loaded, no valid session key
    AwaitingSync,
    /// Session key agreed
    Secure,
}

/// Password and session key
#[derive(Debug, Default)]
pub struct Session {
    password: Option<Vec<u8>>,
    key: Option<SessionKey>,
}

impl Session {
    /// Create session for an optional password
    pub fn new(password: Option<Vec<u8>>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
            key: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        match (&self.password, &self.key) {
            (None, _) => SessionState::Insecure,
            (Some(_), None) => SessionState::AwaitingSync,
            (Some(_), Some(_)) => SessionState::Secure,
        }
    }

    /// Whether a password is loaded
    #[inline]
    pub fn password_loaded(&self) -> bool {
        self.password.is_some()
    }

    /// Header flags advertising this end's mode
    #[inline]
    pub fn flags(&self) -> u8 {
        if self.password_loaded() {
            FLAG_PASSWORD_LOADED
        } else {
            0
        }
    }

    /// Loaded password
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    /// Activate a new password
    pub fn set_password(&mut self, password: Vec<u8>) {
        self.password = Some(password);
    }

    /// Key for framing, when the session is valid
    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Whether a session key is usable
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.key.is_some()
    }

    /// Start using a freshly agreed key
    pub fn establish(&mut self, key: SessionKey) {
        self.key = Some(key);
    }

    /// Drop the key; the peer must SYNC again
    pub fn invalidate(&mut self) {
        self.key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{build_new_session_key, client_init};
    use rand::rngs::OsRng;

    #[test]
    fn test_state_transitions() {
        let mut session = Session::new(None);
        assert_eq!(session.state(), SessionState::Insecure);
        assert_eq!(session.flags(), 0);

        session.set_password(b"secret".to_vec());
        assert_eq!(session.state(), SessionState::AwaitingSync);
        assert_eq!(session.flags(), FLAG_PASSWORD_LOADED);

        let (a, _) = client_init(b"secret", &mut OsRng).unwrap();
        session.establish(build_new_session_key(&a, &a));
        assert_eq!(session.state(), SessionState::Secure);

        session.invalidate();
        assert_eq!(session.state(), SessionState::AwaitingSync);
    }

    #[test]
    fn test_empty_password_is_insecure() {
        assert!(!Session::new(Some(Vec::new())).password_loaded());
    }
}

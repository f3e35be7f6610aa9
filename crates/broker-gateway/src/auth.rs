//! Authentication State Machine
//!
//! ```text
//! Disconnected ─connect─▶ Connecting ─login url─▶ AwaitingUserLogin ─verify─▶ Verifying
//!      ▲                       │                        ▲     ▲                  │
//!      │                  handshake failed               │     └── placeholder ───┤
//!      └───────────────────────┘                 login   │                        ▼
//!                                        Expired ◀─token expired── Authenticated ◀┘
//! ```
//!
//! Any state returns to `Disconnected` on logout. Only `Authenticated`
//! permits chat and tool requests.

use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingUserLogin { login_url: String },
    Verifying { login_url: String },
    Authenticated,
    Expired,
}

/// Inputs that drive [`AuthState`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    Connect,
    ConnectFailed,
    LoginIssued { login_url: String },
    Verify,
    Verified,
    VerificationFailed,
    Expire,
    Disconnect,
}

impl AuthState {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingUserLogin { .. } => "awaiting_user_login",
            Self::Verifying { .. } => "verifying",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        }
    }

    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn login_url(&self) -> Option<&str> {
        match self {
            Self::AwaitingUserLogin { login_url } | Self::Verifying { login_url } => Some(login_url),
            _ => None,
        }
    }

    /// What the caller must do before the broker accepts requests
    pub const fn next_step(&self) -> &'static str {
        match self {
            Self::Disconnected => "connect to the broker",
            Self::Connecting => "wait for the connection to finish, then log in",
            Self::AwaitingUserLogin { .. } => "complete the login in your browser, then verify",
            Self::Verifying { .. } => "wait for verification to finish",
            Self::Authenticated => "none",
            Self::Expired => "log in again",
        }
    }

    /// The state reached from `self` on `event`, or `None` when the event is
    /// not valid here.
    pub fn on(&self, event: &AuthEvent) -> Option<Self> {
        use AuthEvent as E;

        let next = match (self, event) {
            (_, E::Disconnect) => Self::Disconnected,
            (Self::Disconnected | Self::Expired, E::Connect) => Self::Connecting,
            (Self::Connecting, E::ConnectFailed) => Self::Disconnected,
            (
                Self::Connecting | Self::AwaitingUserLogin { .. } | Self::Verifying { .. } | Self::Expired,
                E::LoginIssued { login_url },
            ) => Self::AwaitingUserLogin {
                login_url: login_url.clone(),
            },
            // A verification left behind by a cancelled request may be retried
            (Self::AwaitingUserLogin { login_url } | Self::Verifying { login_url }, E::Verify) => Self::Verifying {
                login_url: login_url.clone(),
            },
            (Self::Verifying { .. }, E::Verified) => Self::Authenticated,
            (Self::Verifying { login_url }, E::VerificationFailed) => Self::AwaitingUserLogin {
                login_url: login_url.clone(),
            },
            (Self::Authenticated, E::Expire) => Self::Expired,
            _ => return None,
        };
        Some(next)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(url: &str) -> AuthEvent {
        AuthEvent::LoginIssued { login_url: url.into() }
    }

    #[test]
    fn test_happy_path() {
        let state = AuthState::default();
        let state = state.on(&AuthEvent::Connect).unwrap();
        let state = state.on(&login("https://broker/login")).unwrap();
        assert_eq!(state.login_url(), Some("https://broker/login"));

        let state = state.on(&AuthEvent::Verify).unwrap();
        let state = state.on(&AuthEvent::Verified).unwrap();
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_failed_verification_returns_to_awaiting() {
        let state = AuthState::Verifying {
            login_url: "https://broker/login".into(),
        };
        let state = state.on(&AuthEvent::VerificationFailed).unwrap();
        assert_eq!(state.label(), "awaiting_user_login");
        assert!(!state.is_authenticated());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        assert_eq!(AuthState::Disconnected.on(&AuthEvent::Verify), None);
        assert_eq!(AuthState::Disconnected.on(&AuthEvent::Verified), None);
        assert_eq!(AuthState::Authenticated.on(&AuthEvent::Connect), None);
    }

    #[test]
    fn test_stale_verification_can_be_retried_or_reissued() {
        let stale = AuthState::Verifying {
            login_url: "https://x/l".into(),
        };
        assert!(matches!(stale.on(&AuthEvent::Verify), Some(AuthState::Verifying { .. })));
        assert_eq!(
            stale.on(&login("https://x/new")),
            Some(AuthState::AwaitingUserLogin {
                login_url: "https://x/new".into()
            })
        );
    }

    #[test]
    fn test_expiry_and_relogin() {
        let state = AuthState::Authenticated.on(&AuthEvent::Expire).unwrap();
        assert_eq!(state, AuthState::Expired);
        assert_eq!(state.next_step(), "log in again");
        assert!(matches!(state.on(&login("https://x/l")), Some(AuthState::AwaitingUserLogin { .. })));
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        for state in [AuthState::Connecting, AuthState::Authenticated, AuthState::Expired] {
            assert_eq!(state.on(&AuthEvent::Disconnect), Some(AuthState::Disconnected));
        }
    }

    #[test]
    fn test_serializes_with_tag() {
        let json = serde_json::to_value(AuthState::AwaitingUserLogin { login_url: "u".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "awaiting_user_login", "login_url": "u"}));
    }
}

use std::fmt;

/// The starter's control-session lifecycle (§3 "Control session"). Unlike
/// the redirector, which stays in `Listening` forever between sessions,
/// the starter cycles `Dialing -> Authenticating -> Established ->
/// TearingDown -> Dialing` on every reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarterState {
    Dialing,
    Authenticating,
    Established,
    TearingDown,
}

impl fmt::Display for StarterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StarterState::Dialing => "Dialing",
            StarterState::Authenticating => "Authenticating",
            StarterState::Established => "Established",
            StarterState::TearingDown => "TearingDown",
        };
        write!(f, "{s}")
    }
}

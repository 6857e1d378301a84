use std::fmt;

/// The redirector's control-session state machine (§4.3). Transitions are
/// driven by the control loop in [`super::control`]; this type exists so
/// the transitions can be logged uniformly rather than inferred from call
/// sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectorState {
    Listening,
    Authenticating,
    Established,
    TearingDown,
}

impl fmt::Display for RedirectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedirectorState::Listening => "Listening",
            RedirectorState::Authenticating => "Authenticating",
            RedirectorState::Established => "Established",
            RedirectorState::TearingDown => "TearingDown",
        };
        write!(f, "{s}")
    }
}

//! Inbound media actions.
//!
//! Action tokens arrive from the rendered surface, from the platform media
//! session or from external signals (media buttons, audio route changes).
//! They are parsed here and resolved against the current snapshot before
//! being forwarded to the producer's listener.

use std::fmt;
use std::time::Duration;

/// The fixed set of action kinds a producer can advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Play,
    Pause,
    Stop,
    SkipPrevious,
    SkipNext,
    SeekForward,
    SeekBackward,
    SeekTo,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Play,
        ActionKind::Pause,
        ActionKind::Stop,
        ActionKind::SkipPrevious,
        ActionKind::SkipNext,
        ActionKind::SeekForward,
        ActionKind::SeekBackward,
        ActionKind::SeekTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Play => "play",
            ActionKind::Pause => "pause",
            ActionKind::Stop => "stop",
            ActionKind::SkipPrevious => "skip_previous",
            ActionKind::SkipNext => "skip_next",
            ActionKind::SeekForward => "seek_forward",
            ActionKind::SeekBackward => "seek_backward",
            ActionKind::SeekTo => "seek_to",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action delivered to the producer's listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaAction {
    Play,
    Pause,
    Stop,
    SkipPrevious,
    SkipNext,
    SeekForward,
    SeekBackward,
    SeekTo(Duration),
}

impl MediaAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            MediaAction::Play => ActionKind::Play,
            MediaAction::Pause => ActionKind::Pause,
            MediaAction::Stop => ActionKind::Stop,
            MediaAction::SkipPrevious => ActionKind::SkipPrevious,
            MediaAction::SkipNext => ActionKind::SkipNext,
            MediaAction::SeekForward => ActionKind::SeekForward,
            MediaAction::SeekBackward => ActionKind::SeekBackward,
            MediaAction::SeekTo(_) => ActionKind::SeekTo,
        }
    }
}

/// Where an action came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionSource {
    /// A button on the rendered notification.
    Notification,
    /// The platform media session (lock screen, watch, car...).
    Session,
    /// Headset buttons, audio route changes and similar signals.
    ExternalSignal,
}

impl ActionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionSource::Notification => "from-notification",
            ActionSource::Session => "from-session",
            ActionSource::ExternalSignal => "from-external-signal",
        }
    }
}

impl fmt::Display for ActionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionToken {
    Action(MediaAction),
    /// Media button toggle.
    PlayPause,
    /// Audio output is about to become audible to the room (headphones
    /// unplugged).
    BecomingNoisy,
}

impl ActionToken {
    /// Parses a raw token. Unknown or malformed tokens yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().to_ascii_lowercase();

        if let Some(millis) = token.strip_prefix("seek_to:") {
            return millis
                .trim()
                .parse::<u64>()
                .ok()
                .map(|ms| ActionToken::Action(MediaAction::SeekTo(Duration::from_millis(ms))));
        }

        let token = match token.as_str() {
            "play" => ActionToken::Action(MediaAction::Play),
            "pause" => ActionToken::Action(MediaAction::Pause),
            "stop" => ActionToken::Action(MediaAction::Stop),
            "skip_previous" => ActionToken::Action(MediaAction::SkipPrevious),
            "skip_next" => ActionToken::Action(MediaAction::SkipNext),
            "seek_forward" => ActionToken::Action(MediaAction::SeekForward),
            "seek_backward" => ActionToken::Action(MediaAction::SeekBackward),
            "play_pause" => ActionToken::PlayPause,
            "becoming_noisy" => ActionToken::BecomingNoisy,
            _ => return None,
        };
        Some(token)
    }

    /// Resolves the token against the paused flag of the current snapshot.
    ///
    /// A pause coming from the media session while already paused means the
    /// session's view of the player is out of sync: it is turned into a play
    /// request. This only applies to [`ActionSource::Session`].
    pub fn resolve(self, source: ActionSource, is_paused: bool) -> Option<(MediaAction, ActionSource)> {
        match self {
            ActionToken::PlayPause => {
                let action = if is_paused {
                    MediaAction::Play
                } else {
                    MediaAction::Pause
                };
                Some((action, source))
            }
            ActionToken::BecomingNoisy => {
                (!is_paused).then_some((MediaAction::Pause, ActionSource::ExternalSignal))
            }
            ActionToken::Action(MediaAction::Pause)
                if source == ActionSource::Session && is_paused =>
            {
                Some((MediaAction::Play, source))
            }
            ActionToken::Action(action) => Some((action, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tokens() {
        assert_eq!(ActionToken::parse("play"), Some(ActionToken::Action(MediaAction::Play)));
        assert_eq!(ActionToken::parse(" PAUSE "), Some(ActionToken::Action(MediaAction::Pause)));
        assert_eq!(
            ActionToken::parse("skip_next"),
            Some(ActionToken::Action(MediaAction::SkipNext))
        );
        assert_eq!(
            ActionToken::parse("seek_to:1500"),
            Some(ActionToken::Action(MediaAction::SeekTo(Duration::from_millis(1500))))
        );
        assert_eq!(ActionToken::parse("play_pause"), Some(ActionToken::PlayPause));
        assert_eq!(ActionToken::parse("becoming_noisy"), Some(ActionToken::BecomingNoisy));
    }

    #[test]
    fn test_parse_unknown_tokens() {
        assert_eq!(ActionToken::parse(""), None);
        assert_eq!(ActionToken::parse("rewind"), None);
        assert_eq!(ActionToken::parse("seek_to:"), None);
        assert_eq!(ActionToken::parse("seek_to:-4"), None);
        assert_eq!(ActionToken::parse("seek_to:abc"), None);
    }

    #[test]
    fn test_session_pause_while_paused_becomes_play() {
        let pause = ActionToken::Action(MediaAction::Pause);
        assert_eq!(
            pause.resolve(ActionSource::Session, true),
            Some((MediaAction::Play, ActionSource::Session))
        );
        assert_eq!(
            pause.resolve(ActionSource::Session, false),
            Some((MediaAction::Pause, ActionSource::Session))
        );
    }

    #[test]
    fn test_pause_reinterpretation_is_session_only() {
        let pause = ActionToken::Action(MediaAction::Pause);
        assert_eq!(
            pause.resolve(ActionSource::Notification, true),
            Some((MediaAction::Pause, ActionSource::Notification))
        );
        assert_eq!(
            pause.resolve(ActionSource::ExternalSignal, true),
            Some((MediaAction::Pause, ActionSource::ExternalSignal))
        );
    }

    #[test]
    fn test_play_pause_toggles() {
        assert_eq!(
            ActionToken::PlayPause.resolve(ActionSource::ExternalSignal, true),
            Some((MediaAction::Play, ActionSource::ExternalSignal))
        );
        assert_eq!(
            ActionToken::PlayPause.resolve(ActionSource::ExternalSignal, false),
            Some((MediaAction::Pause, ActionSource::ExternalSignal))
        );
    }

    #[test]
    fn test_becoming_noisy() {
        assert_eq!(
            ActionToken::BecomingNoisy.resolve(ActionSource::Session, false),
            Some((MediaAction::Pause, ActionSource::ExternalSignal))
        );
        assert_eq!(ActionToken::BecomingNoisy.resolve(ActionSource::Session, true), None);
    }

    #[test]
    fn test_action_kind_mapping() {
        assert_eq!(MediaAction::SeekTo(Duration::ZERO).kind(), ActionKind::SeekTo);
        assert_eq!(MediaAction::SkipPrevious.kind(), ActionKind::SkipPrevious);
        assert_eq!(ActionSource::Session.as_str(), "from-session");
    }
}

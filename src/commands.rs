use serde::{Deserialize, Serialize};

/// Lowest resistance level the bike accepts
pub const MIN_RESISTANCE: u8 = 1;
/// Highest resistance level the bike accepts
pub const MAX_RESISTANCE: u8 = 15;

/// Clamp a requested resistance into the bike's range
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn clamp_resistance(requested: i16) -> u8 {
    if requested < MIN_RESISTANCE as i16 {
        MIN_RESISTANCE
    } else if requested > MAX_RESISTANCE as i16 {
        MAX_RESISTANCE
    } else {
        requested as u8
    }
}

/// Command requested by the UI or the virtual device bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingCommand {
    /// Change resistance; clamped when applied
    SetResistance(i16),
    /// Start or resume the session
    Start,
    /// Pause the session
    Pause,
    /// Stop the session
    Stop,
}

/// Session command waiting for the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Start or resume
    Start,
    /// Pause
    Pause,
    /// Stop
    Stop,
}

/// Commands taken from the queue on one tick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrainedCommands {
    /// Clamped resistance level to write
    pub resistance: Option<u8>,
    /// Session transitions to apply, oldest first
    pub session: Vec<SessionCommand>,
}

/// Holds the latest unconsumed request per command kind
///
/// Resistance, start, pause and stop each have one slot. Session requests
/// are drained in the order they were last made, so a stop followed by a
/// start before the next tick applies both. A stop discards any resistance
/// requested before it.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    resistance: Option<i16>,
    session: Vec<SessionCommand>,
}

impl CommandQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request, replacing any pending one of the same kind
    pub fn push(&mut self, command: PendingCommand) {
        let session = match command {
            PendingCommand::SetResistance(level) => {
                self.resistance = Some(level);
                return;
            }
            PendingCommand::Start => SessionCommand::Start,
            PendingCommand::Pause => SessionCommand::Pause,
            PendingCommand::Stop => {
                self.resistance = None;
                SessionCommand::Stop
            }
        };

        self.session.retain(|pending| *pending != session);
        self.session.push(session);
    }

    /// Pending resistance request, unclamped
    #[must_use]
    pub const fn pending_resistance(&self) -> Option<i16> {
        self.resistance
    }

    /// Pending session requests, oldest first
    #[must_use]
    pub fn pending_session(&self) -> &[SessionCommand] {
        &self.session
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resistance.is_none() && self.session.is_empty()
    }

    /// Take everything pending
    pub fn drain(&mut self) -> DrainedCommands {
        DrainedCommands {
            resistance: self.resistance.take().map(clamp_resistance),
            session: std::mem::take(&mut self.session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_resistance() {
        assert_eq!(clamp_resistance(0), 1);
        assert_eq!(clamp_resistance(25), 15);
        assert_eq!(clamp_resistance(7), 7);
        assert_eq!(clamp_resistance(-3), 1);
        assert_eq!(clamp_resistance(1), 1);
        assert_eq!(clamp_resistance(15), 15);
    }

    #[test]
    fn test_last_write_wins() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::SetResistance(4));
        queue.push(PendingCommand::SetResistance(9));
        queue.push(PendingCommand::Start);

        assert_eq!(queue.pending_resistance(), Some(9));

        let drained = queue.drain();
        assert_eq!(drained.resistance, Some(9));
        assert_eq!(drained.session, vec![SessionCommand::Start]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_clamps_resistance() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::SetResistance(40));
        assert_eq!(queue.drain().resistance, Some(15));

        queue.push(PendingCommand::SetResistance(0));
        assert_eq!(queue.drain().resistance, Some(1));
    }

    #[test]
    fn test_stop_discards_resistance() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::SetResistance(5));
        queue.push(PendingCommand::Stop);

        let drained = queue.drain();
        assert_eq!(drained.resistance, None);
        assert_eq!(drained.session, vec![SessionCommand::Stop]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_resistance_after_stop_survives() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::Stop);
        queue.push(PendingCommand::SetResistance(6));

        assert_eq!(queue.drain().resistance, Some(6));
    }

    #[test]
    fn test_stop_and_start_both_kept() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::Stop);
        queue.push(PendingCommand::Start);

        assert_eq!(
            queue.pending_session(),
            &[SessionCommand::Stop, SessionCommand::Start]
        );
    }

    #[test]
    fn test_repeated_kind_moves_to_back() {
        let mut queue = CommandQueue::new();
        queue.push(PendingCommand::Stop);
        queue.push(PendingCommand::Start);
        queue.push(PendingCommand::Pause);
        queue.push(PendingCommand::Stop);
        queue.push(PendingCommand::Stop);

        assert_eq!(
            queue.drain().session,
            vec![SessionCommand::Start, SessionCommand::Pause, SessionCommand::Stop]
        );
    }

    #[test]
    fn test_empty_drain() {
        let mut queue = CommandQueue::new();
        assert_eq!(queue.drain(), DrainedCommands::default());
    }
}

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use thiserror::Error;

use crate::{bluos::BluOsClient, dispatch::GestureHandler, error::DeviceError, gesture::Gesture};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Play,
    Pause,
    NextTrack,
    PreviousTrack,
    VolumeUp,
    VolumeDown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::NextTrack => "next_track",
            Command::PreviousTrack => "previous_track",
            Command::VolumeUp => "volume_up",
            Command::VolumeDown => "volume_down",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(Command::Play),
            "pause" => Ok(Command::Pause),
            "next" | "next_track" | "skip" => Ok(Command::NextTrack),
            "previous" | "previous_track" | "back" => Ok(Command::PreviousTrack),
            "volume_up" => Ok(Command::VolumeUp),
            "volume_down" => Ok(Command::VolumeDown),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

/// Anything that can carry out a playback command.
pub trait Player: Send + Sync + 'static {
    fn execute(&self, command: Command, volume_step: u8) -> Result<(), DeviceError>;
}

impl Player for BluOsClient {
    fn execute(&self, command: Command, volume_step: u8) -> Result<(), DeviceError> {
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::NextTrack => self.next_track(),
            Command::PreviousTrack => self.previous_track(),
            Command::VolumeUp => self.increase_volume(volume_step),
            Command::VolumeDown => self.decrease_volume(volume_step),
        }
    }
}

pub fn default_bindings() -> HashMap<Gesture, Command> {
    HashMap::from([
        (Gesture::OpenPalm, Command::Play),
        (Gesture::ClosedFist, Command::Pause),
    ])
}

/// Builds the gesture handler that forwards bound gestures to `player`.
/// Gestures without a binding are ignored.
pub fn gesture_handler<P: Player>(
    player: Arc<P>,
    bindings: HashMap<Gesture, Command>,
    volume_step: u8,
) -> GestureHandler {
    Box::new(move |gesture| {
        let Some(command) = bindings.get(&gesture).copied() else {
            log::trace!("no command bound to {gesture}");
            return Ok(());
        };
        log::debug!("{gesture} -> {command}");
        player.execute(command, volume_step)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingPlayer {
        commands: Mutex<Vec<(Command, u8)>>,
    }

    impl Player for RecordingPlayer {
        fn execute(&self, command: Command, volume_step: u8) -> Result<(), DeviceError> {
            self.commands.lock().unwrap().push((command, volume_step));
            Ok(())
        }
    }

    #[test]
    fn default_bindings_play_and_pause() {
        let player = Arc::new(RecordingPlayer::default());
        let handler = gesture_handler(Arc::clone(&player), default_bindings(), 5);

        handler(Gesture::OpenPalm).unwrap();
        handler(Gesture::ClosedFist).unwrap();
        handler(Gesture::Victory).unwrap();

        assert_eq!(
            *player.commands.lock().unwrap(),
            vec![(Command::Play, 5), (Command::Pause, 5)]
        );
    }

    #[test]
    fn custom_bindings_pass_volume_step() {
        let player = Arc::new(RecordingPlayer::default());
        let bindings = HashMap::from([(Gesture::ThumbUp, Command::VolumeUp)]);
        let handler = gesture_handler(Arc::clone(&player), bindings, 10);

        handler(Gesture::ThumbUp).unwrap();
        handler(Gesture::OpenPalm).unwrap();

        assert_eq!(*player.commands.lock().unwrap(), vec![(Command::VolumeUp, 10)]);
    }

    #[test]
    fn parses_command_aliases() {
        assert_eq!("Skip".parse::<Command>(), Ok(Command::NextTrack));
        assert_eq!("previous".parse::<Command>(), Ok(Command::PreviousTrack));
        assert_eq!(" VOLUME_DOWN ".parse::<Command>(), Ok(Command::VolumeDown));
        assert!("shuffle".parse::<Command>().is_err());
    }
}

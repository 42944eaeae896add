use std::{fmt, str::FromStr};

use thiserror::Error;

/// Gesture categories produced by the recognizer.
///
/// `Unrecognized` is the "None" category the model reports when a hand is
/// visible but matches nothing in the vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gesture {
    ClosedFist,
    OpenPalm,
    PointingUp,
    ThumbDown,
    ThumbUp,
    Victory,
    ILoveYou,
    Unrecognized,
}

pub const SENTINEL_CATEGORY: &str = "None";

impl Gesture {
    pub const ALL: [Gesture; 8] = [
        Gesture::ClosedFist,
        Gesture::OpenPalm,
        Gesture::PointingUp,
        Gesture::ThumbDown,
        Gesture::ThumbUp,
        Gesture::Victory,
        Gesture::ILoveYou,
        Gesture::Unrecognized,
    ];

    pub fn category_name(&self) -> &'static str {
        match self {
            Gesture::ClosedFist => "Closed_Fist",
            Gesture::OpenPalm => "Open_Palm",
            Gesture::PointingUp => "Pointing_Up",
            Gesture::ThumbDown => "Thumb_Down",
            Gesture::ThumbUp => "Thumb_Up",
            Gesture::Victory => "Victory",
            Gesture::ILoveYou => "ILoveYou",
            Gesture::Unrecognized => SENTINEL_CATEGORY,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Gesture::Unrecognized)
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown gesture category `{0}`")]
pub struct UnknownGesture(pub String);

impl FromStr for Gesture {
    type Err = UnknownGesture;

    /// Case-insensitive, since config keys arrive lowercased.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Gesture::ALL
            .iter()
            .copied()
            .find(|g| g.category_name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownGesture(s.to_string()))
    }
}

/// Collapses the HaGRID classifier classes onto the recognizer vocabulary.
///
/// Class order: call, dislike, fist, four, grabbing, grip, hand_heart,
/// hand_heart2, holy, like, little_finger, middle_finger, mute, no_gesture,
/// ok, one, palm, peace, peace_inverted, point, rock, stop, stop_inverted,
/// take_picture, three, three2, three3, three_gun, thumb_index, thumb_index2,
/// timeout, two_up, two_up_inverted, xsign
pub fn gesture_for_class(class_index: usize) -> Gesture {
    match class_index {
        1 => Gesture::ThumbDown,
        2 => Gesture::ClosedFist,
        9 => Gesture::ThumbUp,
        15 => Gesture::PointingUp,
        16 | 21 => Gesture::OpenPalm,
        17 | 31 => Gesture::Victory,
        20 => Gesture::ILoveYou,
        _ => Gesture::Unrecognized,
    }
}

pub const CLASSIFIER_CLASSES: usize = 34;

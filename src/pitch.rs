//! Tonal pitch class spelling and MIDI helpers.
//!
//! Tonal pitch classes are positions on the line of fifths, normalized so
//! that F = -1, C = 0, G = 1 (MuseScore's own encoding minus 14).

const PITCH_NAMES: [&str; 7] = ["F", "C", "G", "D", "A", "E", "B"];

/// Spell a tonal pitch class, e.g. 0 -> "C", -1 -> "F", -2 -> "Bb", 6 -> "F#".
pub fn spell_tpc(tpc: i32) -> String {
    let t = tpc + 1; // lowest name F becomes 0 instead of -1
    let name = PITCH_NAMES[t.rem_euclid(7) as usize];
    let fifths = t.div_euclid(7);
    let accidentals = if fifths < 0 {
        "b".repeat(fifths.unsigned_abs() as usize)
    } else {
        "#".repeat(fifths as usize)
    };
    format!("{}{}", name, accidentals)
}

/// Octave of a MIDI pitch: returns 4 for values 60-71 and correspondingly
/// for other notes.
pub fn midi_to_octave(midi: u8) -> i64 {
    midi as i64 / 12 - 1
}

/// MIDI pitch class 0-11.
pub fn pitch_class(midi: u8) -> u8 {
    midi % 12
}

//! Per-voice event traversal emitting one row per note head.

use std::collections::BTreeSet;

use fraction::Fraction;
use log::error;
use num_traits::{One, Zero};
use roxmltree::Node;

use crate::duration::{dot_scalar, duration_from_name, Q};

/// Tags that turn a chord into a grace note: zero duration, no pointer
/// advancement.
pub const GRACE_TAGS: &[&str] = &[
    "grace4",
    "grace4after",
    "grace8",
    "grace8after",
    "grace16",
    "grace16after",
    "grace32",
    "grace32after",
    "grace64",
    "grace64after",
    "appoggiatura",
    "acciaccatura",
];

/// One note head with its temporal position and pitch features.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub mc: usize,
    pub mn: i64,
    /// Onset within the voice, from the start of the measure node.
    pub onset: Q,
    /// Scaled duration; 0 for grace notes.
    pub duration: Q,
    pub gracenote: Option<String>,
    pub nominal_duration: Q,
    /// Combined tuplet and dot scalar applied to the nominal duration.
    pub scalar: Q,
    /// -1 tie end, 1 tie start, 0 both; `None` when untied.
    pub tied: Option<i8>,
    /// Tonal pitch class, normalized so that C = 0, F = -1, G = 1.
    pub tpc: i32,
    pub midi: u8,
    pub staff: usize,
    pub voice: usize,
    pub volta: Option<usize>,
    pub articulation: Option<String>,
}

/// Static per-measure context for the walk.
#[derive(Debug, Clone, Copy)]
pub struct MeasureContext {
    pub mc: usize,
    pub mn: i64,
    pub volta: Option<usize>,
}

/// Walk one `<voice>` of one measure, appending a row per note head.
/// Maintains the onset pointer and the tuplet scalar stack; collects every
/// descendant tag name of the walked events into `tagtypes`.
pub fn parse_voice(
    voice_node: Node,
    ctx: MeasureContext,
    staff: usize,
    voice: usize,
    with_articulation: bool,
    notes: &mut Vec<Note>,
    tagtypes: &mut BTreeSet<String>,
) {
    let mut pointer = Q::zero();
    let mut scalar = Q::one();
    let mut scalar_stack: Vec<Q> = Vec::new();

    for event in voice_node.children().filter(|n| n.is_element()) {
        let name = event.tag_name().name();
        match name {
            "Tuplet" => {
                collect_tags(event, tagtypes);
                let normal = child_int(event, "normalNotes");
                let actual = child_int(event, "actualNotes");
                match (normal, actual) {
                    (Some(normal), Some(actual)) if normal > 0 && actual > 0 => {
                        scalar_stack.push(scalar);
                        scalar *= Fraction::new(normal as u64, actual as u64);
                    }
                    _ => error!(
                        "Tuplet in MC {} is missing normalNotes/actualNotes.",
                        ctx.mc
                    ),
                }
            }
            "endTuplet" => {
                collect_tags(event, tagtypes);
                match scalar_stack.pop() {
                    Some(restored) => scalar = restored,
                    None => error!("endTuplet without an open Tuplet in MC {}.", ctx.mc),
                }
            }
            "Chord" | "Rest" => {
                collect_tags(event, tagtypes);
                let nominal = match event
                    .children()
                    .find(|n| n.has_tag_name("durationType"))
                    .and_then(|n| n.text())
                    .and_then(|t| duration_from_name(t.trim()))
                {
                    Some(q) => q,
                    None => {
                        error!("{} without a readable durationType in MC {}.", name, ctx.mc);
                        continue;
                    }
                };
                let dots = event
                    .children()
                    .find(|n| n.has_tag_name("dots"))
                    .and_then(|n| n.text())
                    .and_then(|t| t.trim().parse::<u32>().ok());
                let dotscalar = match dots {
                    Some(d) => dot_scalar(d) * scalar,
                    None => scalar,
                };
                let duration = nominal * dotscalar;

                if name == "Rest" {
                    pointer += duration;
                    continue;
                }

                let gracenote = event
                    .children()
                    .find(|n| GRACE_TAGS.contains(&n.tag_name().name()))
                    .map(|n| n.tag_name().name().to_string());
                let articulation = if with_articulation {
                    event
                        .children()
                        .find(|n| n.has_tag_name("Articulation"))
                        .and_then(|a| a.children().find(|c| c.has_tag_name("subtype")))
                        .and_then(|s| s.text())
                        .map(str::to_string)
                } else {
                    None
                };

                for note in event.children().filter(|n| n.has_tag_name("Note")) {
                    let tpc = match child_int(note, "tpc") {
                        Some(v) => v as i32 - 14,
                        None => {
                            error!("Note without a tpc value in MC {}.", ctx.mc);
                            continue;
                        }
                    };
                    let midi = match child_int(note, "pitch") {
                        Some(v) if (0..=127).contains(&v) => v as u8,
                        _ => {
                            error!("Note without a MIDI pitch in MC {}.", ctx.mc);
                            continue;
                        }
                    };
                    let tied = note
                        .children()
                        .find(|n| {
                            n.has_tag_name("Spanner") && n.attribute("type") == Some("Tie")
                        })
                        .map(|tie| {
                            let mut t: i8 = 0;
                            if tie.children().any(|c| c.has_tag_name("prev")) {
                                t -= 1;
                            }
                            if tie.children().any(|c| c.has_tag_name("next")) {
                                t += 1;
                            }
                            t
                        });
                    notes.push(Note {
                        mc: ctx.mc,
                        mn: ctx.mn,
                        onset: pointer,
                        duration: if gracenote.is_some() {
                            Q::zero()
                        } else {
                            duration
                        },
                        gracenote: gracenote.clone(),
                        nominal_duration: nominal,
                        scalar: dotscalar,
                        tied,
                        tpc,
                        midi,
                        staff,
                        voice,
                        volta: ctx.volta,
                        articulation: articulation.clone(),
                    });
                }
                if gracenote.is_none() {
                    pointer += duration;
                }
            }
            _ => {}
        }
    }
}

/// Sort a section's rows by measure count, then onset, then MIDI pitch.
pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        a.mc.cmp(&b.mc)
            .then_with(|| a.onset.cmp(&b.onset))
            .then_with(|| a.midi.cmp(&b.midi))
    });
}

fn child_int(node: Node, name: &str) -> Option<i64> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse::<i64>().ok())
}

fn collect_tags(event: Node, tagtypes: &mut BTreeSet<String>) {
    for node in event.descendants().filter(|n| n.is_element()) {
        tagtypes.insert(node.tag_name().name().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(xml: &str) -> (Vec<Note>, BTreeSet<String>) {
        let doc = roxmltree::Document::parse(xml).unwrap();
        let voice = doc
            .descendants()
            .find(|n| n.has_tag_name("voice"))
            .unwrap();
        let mut notes = Vec::new();
        let mut tagtypes = BTreeSet::new();
        let ctx = MeasureContext {
            mc: 0,
            mn: 1,
            volta: None,
        };
        parse_voice(voice, ctx, 1, 1, false, &mut notes, &mut tagtypes);
        (notes, tagtypes)
    }

    #[test]
    fn test_triplet_scaling() {
        let xml = r#"<Measure><voice>
            <Tuplet><normalNotes>2</normalNotes><actualNotes>3</actualNotes></Tuplet>
            <Chord><durationType>eighth</durationType><Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
            <Chord><durationType>eighth</durationType><Note><pitch>62</pitch><tpc>16</tpc></Note></Chord>
            <Chord><durationType>eighth</durationType><Note><pitch>64</pitch><tpc>18</tpc></Note></Chord>
            <endTuplet/>
            <Chord><durationType>quarter</durationType><Note><pitch>65</pitch><tpc>13</tpc></Note></Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes.len(), 4);
        let third = Fraction::new(2u64, 3u64);
        for note in &notes[..3] {
            assert_eq!(note.scalar, third);
            assert_eq!(note.duration, Fraction::new(1u64, 12u64));
            assert_eq!(note.nominal_duration, Fraction::new(1u64, 8u64));
        }
        // three triplet eighths advance the pointer by a quarter in total
        assert_eq!(notes[3].onset, Fraction::new(1u64, 4u64));
        assert_eq!(notes[3].scalar, Fraction::new(1u64, 1u64));
    }

    #[test]
    fn test_dotted_duration() {
        let xml = r#"<Measure><voice>
            <Chord><durationType>quarter</durationType><dots>1</dots>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
            <Chord><durationType>eighth</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes[0].duration, Fraction::new(3u64, 8u64));
        assert_eq!(notes[0].scalar, Fraction::new(3u64, 2u64));
        assert_eq!(notes[1].onset, Fraction::new(3u64, 8u64));
    }

    #[test]
    fn test_rest_advances_pointer_without_rows() {
        let xml = r#"<Measure><voice>
            <Rest><durationType>half</durationType></Rest>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>67</pitch><tpc>15</tpc></Note></Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].onset, Fraction::new(1u64, 2u64));
        assert_eq!(notes[0].tpc, 1);
    }

    #[test]
    fn test_grace_note_takes_no_time() {
        let xml = r#"<Measure><voice>
            <Chord><acciaccatura/><durationType>eighth</durationType>
              <Note><pitch>59</pitch><tpc>19</tpc></Note></Chord>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].gracenote.as_deref(), Some("acciaccatura"));
        assert_eq!(notes[0].duration, Q::zero());
        assert_eq!(notes[1].onset, Q::zero());
    }

    #[test]
    fn test_tie_directions() {
        let xml = r#"<Measure><voice>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc>
                <Spanner type="Tie"><next><location/></next></Spanner>
              </Note></Chord>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc>
                <Spanner type="Tie"><prev><location/></prev><next><location/></next></Spanner>
              </Note></Chord>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc>
                <Spanner type="Tie"><prev><location/></prev></Spanner>
              </Note></Chord>
            <Chord><durationType>quarter</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(
            notes.iter().map(|n| n.tied).collect::<Vec<_>>(),
            vec![Some(1), Some(0), Some(-1), None]
        );
    }

    #[test]
    fn test_chord_emits_one_row_per_note_head() {
        let xml = r#"<Measure><voice>
            <Chord><durationType>half</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note>
              <Note><pitch>64</pitch><tpc>18</tpc></Note>
              <Note><pitch>67</pitch><tpc>15</tpc></Note>
            </Chord>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().all(|n| n.onset == Q::zero()));
        assert_eq!(notes[0].midi, 60);
        assert_eq!(notes[2].midi, 67);
    }

    #[test]
    fn test_nested_tuplets() {
        let xml = r#"<Measure><voice>
            <Tuplet><normalNotes>2</normalNotes><actualNotes>3</actualNotes></Tuplet>
            <Tuplet><normalNotes>2</normalNotes><actualNotes>3</actualNotes></Tuplet>
            <Chord><durationType>eighth</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
            <endTuplet/>
            <Chord><durationType>eighth</durationType>
              <Note><pitch>60</pitch><tpc>14</tpc></Note></Chord>
            <endTuplet/>
        </voice></Measure>"#;
        let (notes, _) = walk(xml);
        assert_eq!(notes[0].scalar, Fraction::new(4u64, 9u64));
        assert_eq!(notes[1].scalar, Fraction::new(2u64, 3u64));
    }

    fn plain_note(mc: usize, onset: Q, midi: u8) -> Note {
        Note {
            mc,
            mn: 1,
            onset,
            duration: Fraction::new(1u64, 4u64),
            gracenote: None,
            nominal_duration: Fraction::new(1u64, 4u64),
            scalar: Q::one(),
            tied: None,
            tpc: 14,
            midi,
            staff: 1,
            voice: 1,
            volta: None,
            articulation: None,
        }
    }

    #[test]
    fn test_sort_notes_orders_by_mc_onset_midi() {
        let quarter = Fraction::new(1u64, 4u64);
        let mut notes = vec![
            plain_note(4, Q::zero(), 48),
            plain_note(3, quarter, 72),
            plain_note(3, quarter, 60),
            plain_note(3, Q::zero(), 67),
        ];
        sort_notes(&mut notes);
        let keys: Vec<(usize, u8)> = notes.iter().map(|n| (n.mc, n.midi)).collect();
        assert_eq!(keys, vec![(3, 67), (3, 60), (3, 72), (4, 48)]);
    }
}

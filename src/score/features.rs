//! Extraction of typed structural features from the tags of a `<Measure>`.

use log::{error, warn};
use roxmltree::Node;
use strum::{Display, EnumString};

use crate::duration::{parse_fraction, Q};

/// XML tags of the MuseScore 3 format that this parser takes care of.
/// Anything else encountered inside a walked event is reported at debug
/// level, once per measure.
pub const TREATED_TAGS: &[&str] = &[
    "acciaccatura",
    "accidental", // within <KeySig>
    "Accidental", // within <Note>, ignored
    "actualNotes", // within <Tuplet>
    "appoggiatura",
    "Articulation",
    "baseNote", // within <Tuplet>, ignored
    "BarLine",
    "Chord",
    "dots",
    "durationType",
    "endRepeat",
    "endTuplet",
    "fractions", // within <Volta>'s <location>
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
    "irregular", // measure excluded from bar count
    "LayoutBreak",
    "location", // within <Volta>
    "Measure",
    "measures", // within <next> within <Volta>
    "next",     // within <Volta>
    "noOffset", // value to add to bar count from here on
    "normalNotes", // within <Tuplet>
    "Note",     // within <Chord>
    "Number",   // within <Tuplet>, ignored
    "pitch",
    "prev", // within <Volta>, ignored
    "Rest",
    "Slur", // ignored
    "Spanner",
    "startRepeat",
    "subtype", // as part of <Articulation> or <BarLine>
    "Tie",
    "TimeSig",
    "tpc", // tonal pitch class, MuseScore encoding minus 14
    "Tuplet",
    "visible", // ignored
    "voice",
    "Volta",
];

/// Structural mark stored in the `repeats` column of a measure row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum RepeatMark {
    #[strum(serialize = "startRepeat")]
    StartRepeat,
    #[strum(serialize = "endRepeat")]
    EndRepeat,
    #[strum(serialize = "firstMeasure")]
    FirstMeasure,
    #[strum(serialize = "lastMeasure")]
    LastMeasure,
    #[strum(serialize = "newSection")]
    NewSection,
}

/// Additional note-row features the caller can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ScoreFeature {
    #[strum(serialize = "articulation")]
    Articulation,
}

/// Raw structural row extracted from one `<Measure>` of one staff.
/// One row per measure count; reconciled across staves into the master table.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct McInfo {
    pub keysig: Option<i32>,
    pub timesig: Option<String>,
    pub act_dur: Option<Q>,
    pub voices: usize,
    pub repeats: Option<RepeatMark>,
    pub volta: Option<usize>,
    pub barline: Option<String>,
    pub numbering_offset: Option<i64>,
    pub dont_count: bool,
}

/// Treat one `<Measure>` node and return its info row. `new_section` is the
/// carry flag set by a preceding section `LayoutBreak`: the measure after the
/// break receives a `newSection` mark unless an explicit repeat mark
/// overrides it.
pub fn measure_info(measure: Node, new_section: &mut bool) -> McInfo {
    let mut info = McInfo::default();
    if *new_section {
        info.repeats = Some(RepeatMark::NewSection);
        *new_section = false;
    }
    if let Some(len) = measure.attribute("len") {
        match parse_fraction(len) {
            Some(q) => info.act_dur = Some(q),
            None => warn!("Unreadable len attribute {:?} on a <Measure>.", len),
        }
    }

    // Group the interesting descendants by tag name, in first-occurrence
    // order; a later tag writing to the same column overwrites an earlier one.
    let mut groups: Vec<(&str, Vec<Node>)> = Vec::new();
    for node in measure.descendants().skip(1).filter(|n| n.is_element()) {
        let name = node.tag_name().name();
        let interesting = match name {
            "voice" => node.parent() == Some(measure),
            "accidental" | "TimeSig" | "startRepeat" | "endRepeat" | "LayoutBreak" | "Volta"
            | "BarLine" | "noOffset" | "irregular" => true,
            _ => false,
        };
        if !interesting {
            continue;
        }
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, nodes)) => nodes.push(node),
            None => groups.push((name, vec![node])),
        }
    }

    for (name, nodes) in &groups {
        match *name {
            "LayoutBreak" => {
                let subtype = nodes[0]
                    .children()
                    .find(|n| n.has_tag_name("subtype"))
                    .and_then(|n| n.text());
                if subtype == Some("section") {
                    *new_section = true;
                }
                continue;
            }
            "voice" => {
                info.voices = nodes.len();
                continue;
            }
            _ => {}
        }
        if nodes.len() > 1 {
            warn!("{} {}-nodes in one <Measure>.", nodes.len(), name);
        }
        let node = nodes[0];
        match *name {
            "accidental" => info.keysig = int_from_text(node, name).map(|v| v as i32),
            "noOffset" => info.numbering_offset = int_from_text(node, name),
            "irregular" => info.dont_count = int_from_text(node, name).is_some(),
            "TimeSig" => info.timesig = convert_timesig(node),
            "startRepeat" => info.repeats = Some(RepeatMark::StartRepeat),
            "endRepeat" => info.repeats = Some(RepeatMark::EndRepeat),
            "Volta" => info.volta = Some(volta_length(node)),
            "BarLine" => info.barline = Some(barline_subtype(node)),
            _ => {}
        }
    }
    info
}

fn int_from_text(node: Node, tag: &str) -> Option<i64> {
    match node.text().map(str::trim).and_then(|t| t.parse::<i64>().ok()) {
        Some(v) => Some(v),
        None => {
            warn!("Could not read an integer from a <{}> tag.", tag);
            None
        }
    }
}

/// Turn a `<TimeSig>` tag into its "N/D" string. A missing `sigN`/`sigD`
/// child is a soft error yielding `None`.
pub fn convert_timesig(tag: Node) -> Option<String> {
    let n = match tag
        .children()
        .find(|c| c.has_tag_name("sigN"))
        .and_then(|c| c.text())
    {
        Some(t) => t,
        None => {
            error!("TimeSig tag has no sigN tag.");
            return None;
        }
    };
    let d = match tag
        .children()
        .find(|c| c.has_tag_name("sigD"))
        .and_then(|c| c.text())
    {
        Some(t) => t,
        None => {
            error!("TimeSig tag has no sigD tag.");
            return None;
        }
    };
    Some(format!("{}/{}", n.trim(), d.trim()))
}

/// Length of a volta in measures, taken from the `measures` child of the
/// spanner's `next/location`. Only a `fractions` child (a volta ending
/// mid-measure) yields 0, which is reported as a soft error.
fn volta_length(volta: Node) -> usize {
    let location = volta
        .children()
        .chain(volta.next_siblings())
        .find(|n| n.has_tag_name("next"))
        .and_then(|n| n.children().find(|c| c.has_tag_name("location")));
    let measures = location
        .and_then(|loc| loc.children().find(|c| c.has_tag_name("measures")))
        .and_then(|m| m.text())
        .and_then(|t| t.trim().parse::<usize>().ok());
    let val = measures.unwrap_or(0);
    if val == 0 {
        error!("Length of a volta was not specified.");
    }
    val
}

fn barline_subtype(barline: Node) -> String {
    barline
        .children()
        .find(|n| n.has_tag_name("subtype"))
        .and_then(|n| n.text())
        .unwrap_or("other")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraction::Fraction;

    fn first_measure<'a>(doc: &'a roxmltree::Document<'a>) -> Node<'a, 'a> {
        doc.descendants()
            .find(|n| n.has_tag_name("Measure"))
            .unwrap()
    }

    #[test]
    fn test_measure_info_basics() {
        let xml = r#"<Staff id="1"><Measure len="1/4">
            <irregular>1</irregular>
            <voice>
              <KeySig><accidental>-2</accidental></KeySig>
              <TimeSig><sigN>3</sigN><sigD>4</sigD></TimeSig>
            </voice>
            <voice/>
        </Measure></Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let info = measure_info(first_measure(&doc), &mut flag);
        assert_eq!(info.keysig, Some(-2));
        assert_eq!(info.timesig.as_deref(), Some("3/4"));
        assert_eq!(info.act_dur, Some(Fraction::new(1u64, 4u64)));
        assert_eq!(info.voices, 2);
        assert!(info.dont_count);
        assert_eq!(info.repeats, None);
    }

    #[test]
    fn test_repeats_and_barline() {
        let xml = r#"<Staff><Measure>
            <startRepeat/>
            <voice><BarLine><subtype>double</subtype></BarLine></voice>
        </Measure></Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let info = measure_info(first_measure(&doc), &mut flag);
        assert_eq!(info.repeats, Some(RepeatMark::StartRepeat));
        assert_eq!(info.barline.as_deref(), Some("double"));
    }

    #[test]
    fn test_layout_break_marks_next_measure() {
        let xml = r#"<Staff>
            <Measure><voice/><LayoutBreak><subtype>section</subtype></LayoutBreak></Measure>
            <Measure><voice/></Measure>
        </Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let measures: Vec<Node> = doc
            .descendants()
            .filter(|n| n.has_tag_name("Measure"))
            .collect();
        let first = measure_info(measures[0], &mut flag);
        assert_eq!(first.repeats, None);
        assert!(flag);
        let second = measure_info(measures[1], &mut flag);
        assert_eq!(second.repeats, Some(RepeatMark::NewSection));
        assert!(!flag);
    }

    #[test]
    fn test_volta_length_from_spanner() {
        let xml = r#"<Staff><Measure><voice>
            <Spanner type="Volta">
              <Volta><endings>1</endings></Volta>
              <next><location><measures>2</measures></location></next>
            </Spanner>
        </voice></Measure></Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let info = measure_info(first_measure(&doc), &mut flag);
        assert_eq!(info.volta, Some(2));
    }

    #[test]
    fn test_volta_with_fractions_only_has_length_zero() {
        let xml = r#"<Staff><Measure><voice>
            <Spanner type="Volta">
              <Volta><endings>2</endings></Volta>
              <next><location><fractions>1/2</fractions></location></next>
            </Spanner>
        </voice></Measure></Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let info = measure_info(first_measure(&doc), &mut flag);
        assert_eq!(info.volta, Some(0));
    }

    #[test]
    fn test_missing_sig_child_is_soft_error() {
        let xml = r#"<Staff><Measure><voice>
            <TimeSig><sigN>6</sigN></TimeSig>
        </voice></Measure></Staff>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let mut flag = false;
        let info = measure_info(first_measure(&doc), &mut flag);
        assert_eq!(info.timesig, None);
    }
}

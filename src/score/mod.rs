//! Structural model of a MuseScore 3 score: master measure table, sections
//! with their note lists, and the playback successor relation.

mod features;
mod measures;
mod notes;
mod query;
mod sections;
mod structure;

pub use features::{McInfo, RepeatMark, ScoreFeature, TREATED_TAGS};
pub use measures::Measure;
pub use notes::{Note, GRACE_TAGS};
pub use query::{BeatSize, Filter, FilterValue, NoteColumn, NoteEntry, NoteQuery, NoteTable, SectionSelector};
pub use sections::{Section, SectionBreak};
pub use structure::VoltaGroup;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::{debug, error, info, warn};
use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{Error, Result};

/// Newest MuseScore 3 release this parser knows about. Scores written by
/// any other version are parsed with a warning.
pub const NEWEST_MUSESCORE: &str = "3.3.0";

/// Caller-supplied parse configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    /// Additional note-row features to extract.
    pub score_features: Vec<ScoreFeature>,
    /// Barline subtypes that split a section into subsections.
    pub separating_barlines: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            score_features: Vec::new(),
            separating_barlines: vec!["double".to_string()],
        }
    }
}

/// Parsed score: the reconciled master table plus the section partition.
#[derive(Debug)]
pub struct Score {
    pub filename: String,
    /// Master table, one row per measure count.
    pub measures: Vec<Measure>,
    pub sections: Vec<Section>,
    /// Section ids in playback order, repeats expanded.
    pub section_order: Vec<usize>,
    /// Groups of section ids sharing one repetition bracket.
    pub super_sections: Vec<Vec<usize>>,
    pub super_section_order: Vec<usize>,
    pub last_mc: usize,
}

impl Score {
    /// Parse the MSCX file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Score> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!("Attempting to parse {}", filename);
        let xml = fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Score::from_xml(&xml, &filename, options)
    }

    /// Parse an MSCX document already loaded into memory. The XML is not
    /// retained; the returned model owns all of its data.
    pub fn from_xml(xml: &str, filename: &str, options: ParseOptions) -> Result<Score> {
        let opt = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc =
            Document::parse_with_options(xml, opt).map_err(|e| Error::Xml(e.to_string()))?;

        let version = doc
            .descendants()
            .find(|n| n.has_tag_name("programVersion"))
            .and_then(|n| n.text())
            .ok_or(Error::MissingElement("programVersion"))?;
        if version.split('.').next() != Some("3") {
            return Err(Error::WrongVersion(version.to_string()));
        }
        if version != NEWEST_MUSESCORE {
            warn!(
                "{} was created with MuseScore {}. Auto-conversion will be implemented in the future.",
                filename, version
            );
        }

        // A <Part> is followed by its content <Staff> siblings.
        let part = doc
            .descendants()
            .find(|n| n.has_tag_name("Part"))
            .ok_or(Error::MissingElement("Part"))?;
        let mut staves: Vec<(usize, Node)> = Vec::new();
        for staff in part.next_siblings().filter(|n| n.has_tag_name("Staff")) {
            let id = staff
                .attribute("id")
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| {
                    Error::BadStaffId(staff.attribute("id").unwrap_or_default().to_string())
                })?;
            debug!("Stored staff with ID {}.", id);
            staves.push((id, staff));
        }
        if staves.is_empty() {
            return Err(Error::MissingElement("Staff"));
        }

        // Per-staff raw tables and measure nodes.
        let mut staff_tables: Vec<(usize, Vec<McInfo>)> = Vec::new();
        let mut measure_nodes: Vec<Vec<Node>> = Vec::new();
        for (staff_id, staff) in &staves {
            let mut rows = Vec::new();
            let mut nodes = Vec::new();
            let mut new_section = false;
            for (i, measure) in staff
                .children()
                .filter(|n| n.has_tag_name("Measure"))
                .enumerate()
            {
                debug!("Stored the {}th measure of staff {}.", i, staff_id);
                rows.push(features::measure_info(measure, &mut new_section));
                nodes.push(measure);
            }
            staff_tables.push((*staff_id, rows));
            measure_nodes.push(nodes);
        }

        let counts: Vec<usize> = staff_tables.iter().map(|(_, rows)| rows.len()).collect();
        if counts.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::StaffMeasureMismatch(counts));
        }

        measures::log_staff_divergence(&staff_tables);
        for (staff_id, rows) in staff_tables.iter_mut() {
            measures::complete_staff_table(*staff_id, rows)?;
        }
        let last_mc = counts[0] - 1;

        let tables: Vec<Vec<McInfo>> = staff_tables.into_iter().map(|(_, rows)| rows).collect();
        let (mut master_rows, identical) = measures::reconcile(&tables);
        if identical {
            debug!("The master table and the first staff's table were identical before aggregation.");
        } else {
            warn!(
                "The master table and the first staff's table were not identical before aggregation. This means that lower staves contain information that's missing in the first staff."
            );
        }

        // Displayed measure numbers.
        let mns = measures::compute_mn(&master_rows);

        // Volta groups; their ordinal within the group is written back.
        let volta_structure = structure::get_volta_structure(&master_rows);
        for group in &volta_structure {
            for (i, volta_range) in group.iter().enumerate() {
                for &mc in volta_range {
                    master_rows[mc].volta = Some(i + 1);
                }
            }
        }

        let repeat_pairs = structure::compute_repeat_structure(&master_rows);

        let mut master: Vec<Measure> = master_rows
            .into_iter()
            .enumerate()
            .map(|(mc, row)| measures::into_measure(mc, row, mns[mc]))
            .collect();

        let mut layout =
            sections::build_layout(&master, &repeat_pairs, &options.separating_barlines);

        // Walk the notes of every section.
        let with_articulation = options
            .score_features
            .contains(&ScoreFeature::Articulation);
        for section in layout.sections.iter_mut() {
            let mut section_notes = Vec::new();
            for mc in section.first_mc..=section.last_mc {
                let ctx = notes::MeasureContext {
                    mc,
                    mn: master[mc].mn,
                    volta: master[mc].volta,
                };
                for (staff_pos, nodes) in measure_nodes.iter().enumerate() {
                    parse_measure(
                        nodes[mc],
                        ctx,
                        staff_pos + 1,
                        with_articulation,
                        &mut section_notes,
                    );
                }
            }
            notes::sort_notes(&mut section_notes);
            section.notes = section_notes;
        }

        sections::assign_voltas(&mut layout, volta_structure);

        for (s, &(fro, to)) in layout.section_structure.iter().enumerate() {
            for mc in fro..=to {
                master[mc].section = Some(s);
            }
        }
        if master.iter().any(|m| m.section.is_none()) {
            error!("Not all measure nodes have been assigned to a section.");
        }

        check_measure_boundaries(&layout.sections, &master);

        for section in layout.sections.iter_mut() {
            section.first_mn = master[section.first_mc].mn;
            section.last_mn = master[section.last_mc].mn;
        }

        sections::compute_next(&mut master, &layout);
        sections::compute_offsets(&mut master);

        info!("Done parsing {}", filename);
        Ok(Score {
            filename: filename.to_string(),
            measures: master,
            sections: layout.sections,
            section_order: layout.section_order,
            super_sections: layout.super_sections,
            super_section_order: layout.super_section_order,
            last_mc,
        })
    }

    /// Tabular projection of note rows; see [`NoteQuery`]. Pure and
    /// non-mutating; invalid selectors degrade to an empty table with a
    /// warning.
    pub fn get_notes(&self, query: &NoteQuery) -> NoteTable {
        query::get_notes(self, query)
    }
}

/// Walk one measure of one staff: every `<voice>` child is traversed and
/// tags outside the treated vocabulary are reported at debug level.
fn parse_measure(
    measure: Node,
    ctx: notes::MeasureContext,
    staff: usize,
    with_articulation: bool,
    out: &mut Vec<Note>,
) {
    let mut nodetypes: BTreeSet<String> = BTreeSet::new();
    for child in measure.children().filter(|n| n.is_element()) {
        nodetypes.insert(child.tag_name().name().to_string());
    }
    let mut tagtypes: BTreeSet<String> = BTreeSet::new();
    let voices: Vec<Node> = measure
        .children()
        .filter(|n| n.has_tag_name("voice"))
        .collect();
    if voices.is_empty() {
        error!("Measure without <voice> tag.");
    }
    for (v, voice_node) in voices.iter().enumerate() {
        notes::parse_voice(
            *voice_node,
            ctx,
            staff,
            v + 1,
            with_articulation,
            out,
            &mut tagtypes,
        );
    }
    let remaining: Vec<&str> = nodetypes
        .iter()
        .chain(tagtypes.iter())
        .map(String::as_str)
        .filter(|name| !TREATED_TAGS.contains(name))
        .collect();
    if !remaining.is_empty() {
        debug!("The following tags have not been treated: {:?}", remaining);
    }
}

/// Check that no note surpasses the barline of its measure and log warnings.
fn check_measure_boundaries(sections: &[Section], master: &[Measure]) {
    let mut ok = true;
    for section in sections {
        for (ix, note) in section.notes.iter().enumerate() {
            if note.onset + note.duration > master[note.mc].act_dur {
                ok = false;
                warn!(
                    "Event {} in MC {} has duration {} and starts on {}, surpassing the measure length of {}",
                    ix, note.mc, note.duration, note.onset, master[note.mc].act_dur
                );
            }
        }
    }
    if ok {
        debug!("Measure boundaries checked: No errors.");
    }
}

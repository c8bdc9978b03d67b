//! The `get_notes` query surface: section selection, derived columns and
//! row filters over the parsed note lists.

use std::collections::BTreeMap;
use std::fmt;

use fraction::Fraction;
use log::{info, warn};
use num_traits::Zero;

use crate::duration::{default_beat_size, floor_div, rem, Q};
use crate::pitch::{midi_to_octave, pitch_class, spell_tpc};
use crate::score::notes::Note;
use crate::score::Score;

/// Which sections a query includes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SectionSelector {
    /// All sections in score order.
    #[default]
    All,
    /// One section; negative indices count from the end.
    Index(i64),
    /// Inclusive range of sections, reversed when the second bound is
    /// smaller.
    Range(i64, i64),
    /// Exactly these sections in the given order; repeated ids yield
    /// repeated note blocks.
    List(Vec<i64>),
}

/// Beat size used for the `beats` column.
#[derive(Debug, Clone, PartialEq)]
pub enum BeatSize {
    /// The default map from time signature to beat size.
    Auto,
    /// Entries overriding or extending the default map.
    Map(BTreeMap<String, Q>),
    /// One fixed beat size for all time signatures.
    Fixed(Q),
}

/// A value a filter compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Frac(Q),
    Str(String),
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<Q> for FilterValue {
    fn from(v: Q) -> Self {
        FilterValue::Frac(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Str(v.to_string())
    }
}

/// Selector applied to one column of the note list.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Keep rows where the column equals the value.
    Equals(FilterValue),
    /// Keep rows where the column has a value at all. On the `tied` column
    /// this keeps only tie starts and middles.
    NotNone,
    /// Inclusive range.
    Between(FilterValue, FilterValue),
    /// Membership.
    In(Vec<FilterValue>),
}

/// Note-list columns addressable by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteColumn {
    Mc,
    Mn,
    Onset,
    Duration,
    Gracenote,
    NominalDuration,
    Scalar,
    Tied,
    Tpc,
    Midi,
    Staff,
    Voice,
    Volta,
    Articulation,
    Octaves,
    NoteNames,
    Pcs,
    Beats,
    /// Per-block row ordinal.
    N,
}

/// Parameters of one `get_notes` call. Filtering on a derived column
/// (octaves, note names, pitch classes, beats) activates that column.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteQuery {
    pub section: SectionSelector,
    /// When true (the default), rendered rows are indexed by
    /// `(section, row)`; otherwise by a single running index.
    pub multiindex: bool,
    pub beatsize: Option<BeatSize>,
    pub octaves: bool,
    pub note_names: bool,
    pub pcs: bool,
    pub filters: Vec<(NoteColumn, Filter)>,
}

impl Default for NoteQuery {
    fn default() -> Self {
        NoteQuery {
            section: SectionSelector::All,
            multiindex: true,
            beatsize: None,
            octaves: false,
            note_names: false,
            pcs: false,
            filters: Vec::new(),
        }
    }
}

impl NoteQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, selector: SectionSelector) -> Self {
        self.section = selector;
        self
    }

    pub fn multiindex(mut self, flag: bool) -> Self {
        self.multiindex = flag;
        self
    }

    pub fn beatsize(mut self, beatsize: BeatSize) -> Self {
        self.beatsize = Some(beatsize);
        self
    }

    pub fn octaves(mut self, flag: bool) -> Self {
        self.octaves = flag;
        self
    }

    pub fn note_names(mut self, flag: bool) -> Self {
        self.note_names = flag;
        self
    }

    pub fn pcs(mut self, flag: bool) -> Self {
        self.pcs = flag;
        self
    }

    pub fn filter(mut self, column: NoteColumn, filter: Filter) -> Self {
        self.filters.push((column, filter));
        self
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEntry {
    pub section: usize,
    /// Block label; repeated selections of one section get suffixes
    /// "3a", "3b", ...
    pub block: String,
    /// Row ordinal within the block.
    pub n: usize,
    pub note: Note,
    pub octave: Option<i64>,
    pub note_name: Option<String>,
    pub pc: Option<u8>,
    pub beat: Option<String>,
}

/// Tabular projection of note rows returned by `get_notes`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteTable {
    pub multiindex: bool,
    pub entries: Vec<NoteEntry>,
}

pub(crate) fn get_notes(score: &Score, query: &NoteQuery) -> NoteTable {
    let n_sections = score.sections.len();
    let selected: Vec<(usize, String)> = match &query.section {
        SectionSelector::All => (0..n_sections).map(|s| (s, s.to_string())).collect(),
        SectionSelector::Index(i) => match treat_section_index(*i, n_sections) {
            Some(s) => vec![(s, s.to_string())],
            None => Vec::new(),
        },
        SectionSelector::Range(a, b) => {
            if n_sections == 0 {
                Vec::new()
            } else {
                let fro = treat_section_index(*a, n_sections).unwrap_or_else(|| {
                    warn!("Replaced {} by first section 0.", a);
                    0
                });
                let to = treat_section_index(*b, n_sections).unwrap_or_else(|| {
                    warn!("Replaced {} by last section {}.", b, n_sections - 1);
                    n_sections - 1
                });
                let ids: Vec<usize> = if to >= fro {
                    (fro..=to).collect()
                } else {
                    (to..=fro).rev().collect()
                };
                label_blocks(ids)
            }
        }
        SectionSelector::List(list) => {
            let ids: Vec<usize> = list
                .iter()
                .filter_map(|&i| treat_section_index(i, n_sections))
                .collect();
            label_blocks(ids)
        }
    };

    let has_filter =
        |col: NoteColumn| query.filters.iter().any(|(c, _)| *c == col);
    let want_octaves = query.octaves || has_filter(NoteColumn::Octaves);
    let want_names = query.note_names || has_filter(NoteColumn::NoteNames);
    let want_pcs = query.pcs || has_filter(NoteColumn::Pcs);
    let want_beats = query.beatsize.is_some() || has_filter(NoteColumn::Beats);
    let beatsize = query.beatsize.clone().unwrap_or(BeatSize::Auto);

    let mut entries = Vec::new();
    for (id, block) in selected {
        for (row, note) in score.sections[id].notes.iter().enumerate() {
            let mut entry = NoteEntry {
                section: id,
                block: block.clone(),
                n: row,
                note: note.clone(),
                octave: None,
                note_name: None,
                pc: None,
                beat: None,
            };
            if want_octaves {
                entry.octave = Some(midi_to_octave(note.midi));
            }
            if want_names {
                entry.note_name = Some(spell_tpc(note.tpc));
            }
            if want_pcs {
                entry.pc = Some(pitch_class(note.midi));
            }
            if want_beats {
                entry.beat = Some(compute_beat(score, note, &beatsize));
            }
            entries.push(entry);
        }
    }

    entries.retain(|entry| {
        query
            .filters
            .iter()
            .all(|(col, filter)| row_matches(entry, *col, filter))
    });

    if entries.is_empty() {
        info!("No notes exist for this selection.");
    }
    NoteTable {
        multiindex: query.multiindex,
        entries,
    }
}

/// Normalize a possibly negative section index; out of range yields `None`
/// with a warning.
fn treat_section_index(i: i64, n: usize) -> Option<usize> {
    let n = n as i64;
    let treated = if i < 0 { n + i } else { i };
    if treated < 0 || treated >= n {
        warn!("Section {} does not exist.", i);
        None
    } else {
        Some(treated as usize)
    }
}

/// Attach disambiguating suffixes to sections selected more than once.
fn label_blocks(ids: Vec<usize>) -> Vec<(usize, String)> {
    let mut total: BTreeMap<usize, usize> = BTreeMap::new();
    for &id in &ids {
        *total.entry(id).or_default() += 1;
    }
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    ids.into_iter()
        .map(|id| {
            let label = if total[&id] > 1 {
                let k = seen.entry(id).or_default();
                let suffix = (b'a' + *k as u8) as char;
                *k += 1;
                format!("{}{}", id, suffix)
            } else {
                id.to_string()
            };
            (id, label)
        })
        .collect()
}

fn compute_beat(score: &Score, note: &Note, beatsize: &BeatSize) -> String {
    let measure = &score.measures[note.mc];
    let size = match beatsize {
        BeatSize::Fixed(q) => *q,
        BeatSize::Map(map) => map
            .get(&measure.timesig)
            .copied()
            .unwrap_or_else(|| default_beat_size(&measure.timesig)),
        BeatSize::Auto => default_beat_size(&measure.timesig),
    };
    let onset = note.onset + measure.offset;
    let beat = floor_div(onset, size) + 1;
    let subbeat = rem(onset, size);
    if subbeat.is_zero() {
        beat.to_string()
    } else {
        format!("{}.{}", beat, subbeat / size)
    }
}

enum Cell {
    Int(i64),
    Frac(Q),
    Str(String),
    None,
}

fn cell(entry: &NoteEntry, col: NoteColumn) -> Cell {
    let note = &entry.note;
    match col {
        NoteColumn::Mc => Cell::Int(note.mc as i64),
        NoteColumn::Mn => Cell::Int(note.mn),
        NoteColumn::Onset => Cell::Frac(note.onset),
        NoteColumn::Duration => Cell::Frac(note.duration),
        NoteColumn::Gracenote => note.gracenote.clone().map_or(Cell::None, Cell::Str),
        NoteColumn::NominalDuration => Cell::Frac(note.nominal_duration),
        NoteColumn::Scalar => Cell::Frac(note.scalar),
        NoteColumn::Tied => note.tied.map_or(Cell::None, |t| Cell::Int(t as i64)),
        NoteColumn::Tpc => Cell::Int(note.tpc as i64),
        NoteColumn::Midi => Cell::Int(note.midi as i64),
        NoteColumn::Staff => Cell::Int(note.staff as i64),
        NoteColumn::Voice => Cell::Int(note.voice as i64),
        NoteColumn::Volta => note.volta.map_or(Cell::None, |v| Cell::Int(v as i64)),
        NoteColumn::Articulation => note.articulation.clone().map_or(Cell::None, Cell::Str),
        NoteColumn::Octaves => Cell::Int(midi_to_octave(note.midi)),
        NoteColumn::NoteNames => Cell::Str(spell_tpc(note.tpc)),
        NoteColumn::Pcs => Cell::Int(pitch_class(note.midi) as i64),
        NoteColumn::Beats => entry.beat.clone().map_or(Cell::None, Cell::Str),
        NoteColumn::N => Cell::Int(entry.n as i64),
    }
}

fn row_matches(entry: &NoteEntry, col: NoteColumn, filter: &Filter) -> bool {
    let value = cell(entry, col);
    match filter {
        Filter::NotNone => match col {
            NoteColumn::Tied => matches!(entry.note.tied, Some(0) | Some(1)),
            _ => !matches!(value, Cell::None),
        },
        Filter::Equals(want) => cell_eq(&value, want),
        Filter::In(list) => list.iter().any(|want| cell_eq(&value, want)),
        Filter::Between(lo, hi) => match (as_q(&value), q_of(lo), q_of(hi)) {
            (Some(v), Some(l), Some(h)) => l <= v && v <= h,
            _ => match (&value, lo, hi) {
                (Cell::Str(s), FilterValue::Str(l), FilterValue::Str(h)) => l <= s && s <= h,
                _ => false,
            },
        },
    }
}

fn as_q(value: &Cell) -> Option<Q> {
    match value {
        Cell::Int(i) => Some(int_to_q(*i)),
        Cell::Frac(q) => Some(*q),
        _ => None,
    }
}

fn q_of(value: &FilterValue) -> Option<Q> {
    match value {
        FilterValue::Int(i) => Some(int_to_q(*i)),
        FilterValue::Frac(q) => Some(*q),
        FilterValue::Str(_) => None,
    }
}

fn int_to_q(i: i64) -> Q {
    if i < 0 {
        Q::zero() - Fraction::new(i.unsigned_abs(), 1u64)
    } else {
        Fraction::new(i as u64, 1u64)
    }
}

fn cell_eq(value: &Cell, want: &FilterValue) -> bool {
    match (as_q(value), q_of(want)) {
        (Some(a), Some(b)) => a == b,
        _ => match (value, want) {
            (Cell::Str(s), FilterValue::Str(w)) => s == w,
            _ => false,
        },
    }
}

impl fmt::Display for NoteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show_articulation = self.entries.iter().any(|e| e.note.articulation.is_some());
        let show_octaves = self.entries.iter().any(|e| e.octave.is_some());
        let show_names = self.entries.iter().any(|e| e.note_name.is_some());
        let show_pcs = self.entries.iter().any(|e| e.pc.is_some());
        let show_beats = self.entries.iter().any(|e| e.beat.is_some());

        let mut header: Vec<&str> = if self.multiindex {
            vec!["section", "ix"]
        } else {
            vec!["ix"]
        };
        header.extend([
            "mc",
            "mn",
            "onset",
            "duration",
            "gracenote",
            "nominal_duration",
            "scalar",
            "tied",
            "tpc",
            "midi",
            "staff",
            "voice",
            "volta",
        ]);
        if show_articulation {
            header.push("articulation");
        }
        if show_octaves {
            header.push("octaves");
        }
        if show_names {
            header.push("note_names");
        }
        if show_pcs {
            header.push("pcs");
        }
        if show_beats {
            header.push("beats");
        }
        writeln!(f, "{}", header.join("\t"))?;

        for (i, entry) in self.entries.iter().enumerate() {
            let note = &entry.note;
            let mut fields: Vec<String> = if self.multiindex {
                vec![entry.block.clone(), entry.n.to_string()]
            } else {
                vec![i.to_string()]
            };
            fields.push(note.mc.to_string());
            fields.push(note.mn.to_string());
            fields.push(note.onset.to_string());
            fields.push(note.duration.to_string());
            fields.push(note.gracenote.clone().unwrap_or_default());
            fields.push(note.nominal_duration.to_string());
            fields.push(note.scalar.to_string());
            fields.push(note.tied.map(|t| t.to_string()).unwrap_or_default());
            fields.push(note.tpc.to_string());
            fields.push(note.midi.to_string());
            fields.push(note.staff.to_string());
            fields.push(note.voice.to_string());
            fields.push(note.volta.map(|v| v.to_string()).unwrap_or_default());
            if show_articulation {
                fields.push(note.articulation.clone().unwrap_or_default());
            }
            if show_octaves {
                fields.push(entry.octave.map(|o| o.to_string()).unwrap_or_default());
            }
            if show_names {
                fields.push(entry.note_name.clone().unwrap_or_default());
            }
            if show_pcs {
                fields.push(entry.pc.map(|p| p.to_string()).unwrap_or_default());
            }
            if show_beats {
                fields.push(entry.beat.clone().unwrap_or_default());
            }
            writeln!(f, "{}", fields.join("\t"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{ParseOptions, Score};

    fn test_score() -> Score {
        // two sections: a repeated first half and a plain second half
        let xml = r#"<museScore version="3.01">
  <programVersion>3.3.0</programVersion>
  <Score>
    <Part><Staff id="1"/></Part>
    <Staff id="1">
      <Measure>
        <startRepeat/>
        <voice>
          <TimeSig><sigN>4</sigN><sigD>4</sigD></TimeSig>
          <Chord><durationType>half</durationType>
            <Note><pitch>60</pitch><tpc>14</tpc>
              <Spanner type="Tie"><next><location/></next></Spanner>
            </Note></Chord>
          <Chord><durationType>quarter</durationType>
            <Note><pitch>60</pitch><tpc>14</tpc>
              <Spanner type="Tie"><prev><location/></prev></Spanner>
            </Note></Chord>
          <Chord><durationType>eighth</durationType>
            <Note><pitch>62</pitch><tpc>16</tpc></Note></Chord>
          <Chord><durationType>eighth</durationType>
            <Note><pitch>64</pitch><tpc>18</tpc></Note></Chord>
        </voice>
      </Measure>
      <Measure>
        <endRepeat>2</endRepeat>
        <voice>
          <Chord><durationType>whole</durationType>
            <Note><pitch>65</pitch><tpc>13</tpc></Note></Chord>
        </voice>
      </Measure>
      <Measure>
        <voice>
          <Chord><durationType>whole</durationType>
            <Note><pitch>70</pitch><tpc>12</tpc></Note></Chord>
        </voice>
      </Measure>
    </Staff>
  </Score>
</museScore>"#;
        Score::from_xml(xml, "test.mscx", ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_all_sections() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new());
        assert_eq!(table.entries.len(), 6);
        assert!(table.multiindex);
        assert_eq!(table.entries[0].block, "0");
        assert_eq!(table.entries[5].section, 1);
    }

    #[test]
    fn test_negative_index_counts_from_end() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().section(SectionSelector::Index(-1)),
        );
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].note.midi, 70);
    }

    #[test]
    fn test_out_of_range_index_degrades_to_empty() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new().section(SectionSelector::Index(7)));
        assert!(table.entries.is_empty());
    }

    #[test]
    fn test_reversed_range() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().section(SectionSelector::Range(1, 0)),
        );
        assert_eq!(table.entries[0].section, 1);
        assert_eq!(table.entries.last().unwrap().section, 0);
    }

    #[test]
    fn test_repeated_sections_get_suffixes() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().section(SectionSelector::List(vec![0, 0, 1])),
        );
        assert_eq!(table.entries[0].block, "0a");
        let blocks: Vec<&str> = table
            .entries
            .iter()
            .map(|e| e.block.as_str())
            .collect();
        assert!(blocks.contains(&"0b"));
        assert!(blocks.contains(&"1"));
        assert_eq!(table.entries.len(), 11);
    }

    #[test]
    fn test_equality_and_membership_filters() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().filter(NoteColumn::Midi, Filter::Equals(60.into())),
        );
        assert_eq!(table.entries.len(), 2);

        let table = score.get_notes(&NoteQuery::new().filter(
            NoteColumn::Midi,
            Filter::In(vec![62.into(), 64.into()]),
        ));
        assert_eq!(table.entries.len(), 2);
    }

    #[test]
    fn test_range_filter_on_duration() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new().filter(
            NoteColumn::Duration,
            Filter::Between(
                Fraction::new(1u64, 4u64).into(),
                Fraction::new(1u64, 2u64).into(),
            ),
        ));
        assert_eq!(table.entries.len(), 2);
    }

    #[test]
    fn test_tied_true_keeps_starts_and_middles_only() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new().filter(NoteColumn::Tied, Filter::NotNone));
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].note.tied, Some(1));
    }

    #[test]
    fn test_derived_columns() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new()
                .octaves(true)
                .note_names(true)
                .pcs(true)
                .section(SectionSelector::Index(0)),
        );
        let first = &table.entries[0];
        assert_eq!(first.octave, Some(4));
        assert_eq!(first.note_name.as_deref(), Some("C"));
        assert_eq!(first.pc, Some(0));
        // Bb spelled from tpc -2
        let last = score.get_notes(
            &NoteQuery::new()
                .note_names(true)
                .section(SectionSelector::Index(1)),
        );
        assert_eq!(last.entries[0].note_name.as_deref(), Some("Bb"));
    }

    #[test]
    fn test_filter_on_derived_column_activates_it() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new().filter(
            NoteColumn::NoteNames,
            Filter::In(vec!["D".into(), "E".into()]),
        ));
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].note.midi, 62);
    }

    #[test]
    fn test_beats_column() {
        let score = test_score();
        let table = score.get_notes(&NoteQuery::new().beatsize(BeatSize::Auto));
        let beats: Vec<&str> = table
            .entries
            .iter()
            .map(|e| e.beat.as_deref().unwrap())
            .collect();
        // onsets 0, 1/2, 3/4, 7/8 in 4/4 -> quarter beats 1, 3, 4, 4.1/2
        assert_eq!(beats[..4].to_vec(), vec!["1", "3", "4", "4.1/2"]);
    }

    #[test]
    fn test_fixed_beatsize() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().beatsize(BeatSize::Fixed(Fraction::new(1u64, 2u64))),
        );
        assert_eq!(table.entries[1].beat.as_deref(), Some("2"));
    }

    #[test]
    fn test_n_filter_limits_rows_per_block() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new().filter(NoteColumn::N, Filter::Between(0.into(), 1.into())),
        );
        // two rows from section 0, one row from section 1's single-note list
        assert_eq!(table.entries.len(), 3);
    }

    #[test]
    fn test_display_flat_index() {
        let score = test_score();
        let table = score.get_notes(
            &NoteQuery::new()
                .multiindex(false)
                .section(SectionSelector::Index(1)),
        );
        let rendered = table.to_string();
        let mut lines = rendered.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("ix\tmc\tmn"));
        assert!(!header.contains("section"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("0\t2\t3"));
    }
}

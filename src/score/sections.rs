//! Partitioning of the score into sections and subsections, the playback
//! order over them, and the successor relation between measures.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, error, info, warn};
use num_traits::Zero;

use crate::score::features::RepeatMark;
use crate::score::measures::Measure;
use crate::score::notes::Note;
use crate::score::structure::VoltaGroup;

/// What causes a section boundary on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionBreak {
    StartRepeat,
    StartNormal,
    EndRepeat,
    EndNormal,
    NewSection,
    FirstMeasure,
    LastMeasure,
    /// An interior separating barline, labeled by its subtype.
    Barline(String),
}

impl From<RepeatMark> for SectionBreak {
    fn from(mark: RepeatMark) -> Self {
        match mark {
            RepeatMark::StartRepeat => SectionBreak::StartRepeat,
            RepeatMark::EndRepeat => SectionBreak::EndRepeat,
            RepeatMark::FirstMeasure => SectionBreak::FirstMeasure,
            RepeatMark::LastMeasure => SectionBreak::LastMeasure,
            RepeatMark::NewSection => SectionBreak::NewSection,
        }
    }
}

impl fmt::Display for SectionBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionBreak::StartRepeat => write!(f, "startRepeat"),
            SectionBreak::StartNormal => write!(f, "startNormal"),
            SectionBreak::EndRepeat => write!(f, "endRepeat"),
            SectionBreak::EndNormal => write!(f, "endNormal"),
            SectionBreak::NewSection => write!(f, "newSection"),
            SectionBreak::FirstMeasure => write!(f, "firstMeasure"),
            SectionBreak::LastMeasure => write!(f, "lastMeasure"),
            SectionBreak::Barline(subtype) => write!(f, "{}_barline", subtype),
        }
    }
}

/// A contiguous range of measures played as a unit, together with its notes.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub index: usize,
    pub first_mc: usize,
    pub last_mc: usize,
    pub first_mn: i64,
    pub last_mn: i64,
    pub repeated: bool,
    pub start_break: SectionBreak,
    pub end_break: SectionBreak,
    /// The volta group assigned to this section, one mc list per volta.
    pub voltas: VoltaGroup,
    /// Super-section id when this section was carved out by a separating
    /// barline.
    pub subsection_of: Option<usize>,
    pub previous_section: Option<usize>,
    pub next_section: Option<usize>,
    pub notes: Vec<Note>,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}ection from MC {} ({}) to MC {} ({}), {} voltas.",
            if self.repeated { "Repeated s" } else { "S" },
            if self.subsection_of.is_some() { "ubs" } else { "" },
            self.first_mc,
            self.start_break,
            self.last_mc,
            self.end_break,
            if self.voltas.is_empty() {
                "without".to_string()
            } else {
                format!("with {}", self.voltas.len())
            }
        )
    }
}

/// The section partition of a score together with its playback orders.
#[derive(Debug, Default)]
pub struct SectionLayout {
    pub sections: Vec<Section>,
    /// Inclusive mc boundaries per section id.
    pub section_structure: Vec<(usize, usize)>,
    /// Section ids in the order they are played (repeats expanded).
    pub section_order: Vec<usize>,
    /// Groups of section ids sharing one repetition bracket.
    pub super_sections: Vec<Vec<usize>>,
    pub super_section_order: Vec<usize>,
}

impl SectionLayout {
    fn push_section(
        &mut self,
        fro: usize,
        to: usize,
        repeated: bool,
        start_break: SectionBreak,
        end_break: SectionBreak,
    ) -> usize {
        let index = self.sections.len();
        self.sections.push(Section {
            index,
            first_mc: fro,
            last_mc: to,
            first_mn: 0,
            last_mn: 0,
            repeated,
            start_break,
            end_break,
            voltas: Vec::new(),
            subsection_of: None,
            previous_section: index.checked_sub(1),
            next_section: None,
            notes: Vec::new(),
        });
        self.section_structure.push((fro, to));
        index
    }

    /// Emit one section covering `fro..=to`, splitting it into subsections
    /// at interior separating barlines.
    fn create_section(
        &mut self,
        master: &[Measure],
        fro: usize,
        to: usize,
        repeated: bool,
        separating_barlines: &[String],
    ) {
        let start_break = match master[fro].repeats {
            Some(mark) => SectionBreak::from(mark),
            None if repeated => SectionBreak::StartRepeat,
            None => SectionBreak::StartNormal,
        };
        let end_break = match master[to].repeats {
            Some(mark) => SectionBreak::from(mark),
            None if repeated => SectionBreak::EndRepeat,
            None => SectionBreak::EndNormal,
        };

        // separating barlines strictly inside the range trigger subsections
        let splits: Vec<(usize, String)> = ((fro + 1)..to)
            .filter_map(|mc| {
                master[mc]
                    .barline
                    .as_ref()
                    .filter(|b| separating_barlines.contains(b))
                    .map(|b| (mc, b.clone()))
            })
            .collect();

        let mut subsections = Vec::new();
        if splits.is_empty() {
            subsections.push(self.push_section(fro, to, repeated, start_break, end_break));
        } else {
            let mut bounds = vec![fro];
            let mut reasons = vec![start_break];
            for (mc, subtype) in &splits {
                bounds.push(*mc);
                bounds.push(mc + 1);
                let label = SectionBreak::Barline(subtype.clone());
                reasons.push(label.clone());
                reasons.push(label);
            }
            bounds.push(to);
            reasons.push(end_break);
            if reasons.len() != bounds.len() {
                error!("Implementation error in the subsection boundary count.");
            }
            for i in 0..bounds.len() / 2 {
                subsections.push(self.push_section(
                    bounds[2 * i],
                    bounds[2 * i + 1],
                    repeated,
                    reasons[2 * i].clone(),
                    reasons[2 * i + 1].clone(),
                ));
            }
        }

        let super_id = self.super_sections.len();
        if subsections.len() > 1 {
            for &s in &subsections {
                self.sections[s].subsection_of = Some(super_id);
            }
        }
        let plays = if repeated { 2 } else { 1 };
        for _ in 0..plays {
            self.section_order.extend(subsections.iter().copied());
            self.super_section_order.push(super_id);
        }
        self.super_sections.push(subsections);
        debug!(
            "Created {}section from {} to {}.",
            if repeated { "repeated " } else { "" },
            fro,
            to
        );
    }
}

/// Build the section partition from the repeat pairs: every gap between
/// repeated spans becomes an unrepeated section, covering all measures
/// exactly once.
pub fn build_layout(
    master: &[Measure],
    repeat_pairs: &[(usize, usize)],
    separating_barlines: &[String],
) -> SectionLayout {
    let last_mc = master.len() - 1;
    let mut layout = SectionLayout::default();
    let mut last_to: i64 = -1;
    let mut to = 0usize;
    for &(fro, pair_to) in repeat_pairs {
        if fro as i64 != last_to + 1 {
            layout.create_section(
                master,
                (last_to + 1) as usize,
                fro - 1,
                false,
                separating_barlines,
            );
        }
        layout.create_section(master, fro, pair_to, true, separating_barlines);
        last_to = pair_to as i64;
        to = pair_to;
    }
    if to != last_mc || repeat_pairs.is_empty() {
        let fro = if repeat_pairs.is_empty() { 0 } else { to + 1 };
        layout.create_section(master, fro, last_mc, false, separating_barlines);
    }

    let count = layout.sections.len();
    for section in layout.sections.iter_mut() {
        if section.index + 1 < count {
            section.next_section = Some(section.index + 1);
        }
    }
    layout
}

/// Assign every volta group to the section whose range contains it.
pub fn assign_voltas(layout: &mut SectionLayout, volta_structure: Vec<VoltaGroup>) {
    let mut s = 0;
    for group in volta_structure {
        let mcs: Vec<usize> = group.iter().flatten().copied().collect();
        while s < layout.sections.len()
            && mcs.iter().any(|&mc| mc > layout.section_structure[s].1)
        {
            s += 1;
        }
        match layout.sections.get_mut(s) {
            Some(section) => section.voltas = group,
            None => warn!("Volta group {:?} lies outside all section ranges.", group),
        }
    }
}

/// Fill the `next` column: which measure counts follow each measure under
/// full playback expansion of repeats and voltas.
pub fn compute_next(master: &mut [Measure], layout: &SectionLayout) {
    let last_mc = master.len() - 1;
    let mut before_volta: Vec<(usize, Vec<usize>)> = Vec::new();
    for section in &layout.sections {
        let (fro, to) = (section.first_mc, section.last_mc);
        let volta_mcs: BTreeSet<usize> = section.voltas.iter().flatten().copied().collect();
        let mut normal: Vec<usize> = Vec::new();
        let mut repeat_last = false;
        if volta_mcs.is_empty() {
            normal.extend(fro..=to);
            repeat_last = section.repeated;
        } else {
            normal.extend((fro..=to).filter(|mc| !volta_mcs.contains(mc)));
            let n_voltas = section.voltas.len();
            for (i, group) in section.voltas.iter().rev().enumerate() {
                if i < n_voltas - 1 {
                    // all voltas except the first must be excluded from the
                    // bar count
                    let not_excluded: Vec<usize> = group
                        .iter()
                        .copied()
                        .filter(|&mc| {
                            !master[mc].dont_count && master[mc].numbering_offset.is_none()
                        })
                        .collect();
                    if !not_excluded.is_empty() {
                        warn!(
                            "MC{} {:?} in volta {:?} ha{} not been excluded from barcount.",
                            if not_excluded.len() > 1 { "s" } else { "" },
                            not_excluded,
                            group,
                            if not_excluded.len() > 1 { "ve" } else { "s" }
                        );
                    }
                }
                if i == 0 {
                    // final volta: played through, no jump back
                    normal.extend(group.iter().copied());
                    if group.iter().any(|&mc| {
                        matches!(
                            master[mc].repeats,
                            Some(RepeatMark::StartRepeat) | Some(RepeatMark::EndRepeat)
                        )
                    }) {
                        warn!("Final volta with MC {:?} contains a repeat sign.", group);
                    }
                } else {
                    for (j, &mc) in group.iter().rev().enumerate() {
                        if j == 0 {
                            // once played, jump back to the section start
                            master[mc].next = vec![fro];
                            if master[mc].repeats != Some(RepeatMark::EndRepeat) {
                                warn!("Volta with MC {:?} is missing the endRepeat.", group);
                            }
                        } else {
                            normal.push(mc);
                        }
                    }
                }
            }
            if let Some(first_mc) = section.voltas.first().and_then(|g| g.first().copied()) {
                if first_mc > 0 {
                    let firsts: Vec<usize> = section
                        .voltas
                        .iter()
                        .filter_map(|g| g.first().copied())
                        .collect();
                    before_volta.push((first_mc - 1, firsts));
                }
            }
        }
        for &mc in &normal {
            master[mc].next = vec![mc + 1];
        }
        if repeat_last {
            master[to].next.push(fro);
        }
    }
    for (mc, firsts) in before_volta {
        master[mc].next = firsts;
    }
    if let Some(last) = master.last_mut() {
        last.next.retain(|&n| n != last_mc + 1);
    }
}

/// Derive onset offsets for pickup and split measures, and reconcile
/// irregular measure lengths against their successors.
pub fn compute_offsets(master: &mut [Measure]) {
    for ix in 0..master.len() {
        let act = master[ix].act_dur;
        let nominal = master[ix].nominal_dur;
        let is_end_repeat = master[ix].repeats == Some(RepeatMark::EndRepeat);
        if act == nominal && !is_end_repeat {
            continue;
        }
        if act > nominal {
            info!("MC {} is longer than its nominal value.", ix);
        } else if act == nominal {
            // an endRepeat of regular length jumping into irregular measures
            let irregular: Vec<usize> = master[ix]
                .next
                .iter()
                .copied()
                .filter(|&n| {
                    master
                        .get(n)
                        .map(|m| m.act_dur != m.nominal_dur)
                        .unwrap_or(false)
                })
                .collect();
            if !irregular.is_empty() {
                let values = irregular
                    .iter()
                    .map(|&n| master[n].act_dur.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let plural = irregular.len() > 1;
                warn!(
                    "The endRepeat in MC {} ({}) is not adapted to the irregular measure length{} in MC{} {:?} ({})",
                    ix,
                    act,
                    if plural { "s" } else { "" },
                    if plural { "s" } else { "" },
                    irregular,
                    values
                );
            }
        } else if ix == 0 {
            // anacrusis
            master[0].offset = nominal - act;
            if !excluded_from_count(&master[0]) {
                warn!("MC 0 seems to be a pickup measure but has not been excluded from bar count!");
            }
        } else if master[ix].offset.is_zero() {
            // beginning of an incomplete (split) measure
            let missing = nominal - act;
            let nexts = master[ix].next.clone();
            for n in nexts {
                let follower_act = match master.get(n) {
                    Some(m) => m.act_dur,
                    None => continue,
                };
                if follower_act == missing {
                    master[n].offset = act;
                    if !excluded_from_count(&master[n]) {
                        warn!(
                            "MC {} is completing MC {} but has not been excluded from bar count!",
                            n, ix
                        );
                    }
                } else {
                    warn!(
                        "MC {} ({}) and MC {} ({}) don't add up to {}.",
                        ix, act, n, follower_act, nominal
                    );
                }
            }
        }
    }
}

fn excluded_from_count(measure: &Measure) -> bool {
    measure.dont_count || measure.numbering_offset.is_some()
}

//! Per-staff measure tables, their reconciliation into the master table,
//! and the computation of displayed measure numbers.

use fraction::Fraction;
use log::{debug, error, warn};

use crate::duration::{parse_fraction, Q};
use crate::error::{Error, Result};
use crate::score::features::{McInfo, RepeatMark};
use num_traits::Zero;

/// One reconciled row of the master table, with all derived columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub mc: usize,
    pub keysig: i32,
    pub timesig: String,
    /// Length declared by the time signature.
    pub nominal_dur: Q,
    /// Actual length; shorter than nominal for pickups and split measures.
    pub act_dur: Q,
    /// Voice streams summed over all staves.
    pub voices: usize,
    pub repeats: Option<RepeatMark>,
    /// After volta analysis: ordinal of the alternative ending (1, 2, ...).
    pub volta: Option<usize>,
    pub barline: Option<String>,
    pub numbering_offset: Option<i64>,
    pub dont_count: bool,
    /// Displayed measure number; 0 only for an anacrusis.
    pub mn: i64,
    /// Beat position within the logical measure at which this node begins.
    pub offset: Q,
    pub section: Option<usize>,
    /// Measure counts this measure jumps to after playback.
    pub next: Vec<usize>,
}

/// Normalize one staff's raw table in place: default key signature, required
/// starting time signature, first/last sentinels, forward fill.
pub fn complete_staff_table(staff: usize, rows: &mut [McInfo]) -> Result<()> {
    let last = match rows.len().checked_sub(1) {
        Some(last) => last,
        None => return Err(Error::EmptyStaff(staff)),
    };
    if rows[0].keysig.is_none() {
        rows[0].keysig = Some(0);
        debug!("Key signature has been set to C major.");
    }
    if rows[0].timesig.is_none() {
        return Err(Error::MissingTimeSig(staff));
    }
    let last_unmarked = rows[last].repeats.is_none();
    if let Some(mark) = rows[0].repeats {
        warn!(
            "First measure of staff {} has a {} tag. Information overwritten by 'firstMeasure'",
            staff, mark
        );
    }
    rows[0].repeats = Some(RepeatMark::FirstMeasure);
    if last_unmarked {
        rows[last].repeats = Some(RepeatMark::LastMeasure);
    }

    let mut keysig = rows[0].keysig;
    let mut timesig = rows[0].timesig.clone();
    for row in rows.iter_mut() {
        match row.keysig {
            Some(k) => keysig = Some(k),
            None => row.keysig = keysig,
        }
        match &row.timesig {
            Some(t) => timesig = Some(t.clone()),
            None => row.timesig = timesig.clone(),
        }
    }
    Ok(())
}

/// Log structural values present in a lower staff but absent from (or in
/// conflict with) staff 1. Runs on the raw tables, before completion.
pub fn log_staff_divergence(tables: &[(usize, Vec<McInfo>)]) {
    let (_, first) = &tables[0];
    for (staff_id, rows) in &tables[1..] {
        let mut diverging: Vec<String> = Vec::new();
        for (mc, (a, b)) in first.iter().zip(rows.iter()).enumerate() {
            if b.keysig.is_some() && b.keysig != a.keysig {
                diverging.push(format!("mc {} keysig {:?}", mc, b.keysig));
            }
            if b.timesig.is_some() && b.timesig != a.timesig {
                diverging.push(format!("mc {} timesig {:?}", mc, b.timesig));
            }
            if b.act_dur.is_some() && b.act_dur != a.act_dur {
                diverging.push(format!("mc {} act_dur {:?}", mc, b.act_dur));
            }
            if b.repeats.is_some() && b.repeats != a.repeats {
                diverging.push(format!("mc {} repeats {:?}", mc, b.repeats));
            }
            if b.volta.is_some() && b.volta != a.volta {
                diverging.push(format!("mc {} volta {:?}", mc, b.volta));
            }
            if b.barline.is_some() && b.barline != a.barline {
                diverging.push(format!("mc {} barline {:?}", mc, b.barline));
            }
            if b.numbering_offset.is_some() && b.numbering_offset != a.numbering_offset {
                diverging.push(format!("mc {} noOffset {:?}", mc, b.numbering_offset));
            }
            if b.dont_count && !a.dont_count {
                diverging.push(format!("mc {} irregular", mc));
            }
        }
        if !diverging.is_empty() {
            warn!(
                "These values in staff {} are not included in staff 1: {}",
                staff_id,
                diverging.join(", ")
            );
        }
    }
}

/// Combine the completed per-staff tables into the master table: staff-1
/// values with gaps filled from subsequent staves, voices summed.
/// The second return value tells whether lower staves contributed anything.
pub fn reconcile(tables: &[Vec<McInfo>]) -> (Vec<McInfo>, bool) {
    let mut master = tables[0].clone();
    let mut identical = true;
    for other in &tables[1..] {
        for (row, o) in master.iter_mut().zip(other.iter()) {
            if row.keysig.is_none() && o.keysig.is_some() {
                row.keysig = o.keysig;
                identical = false;
            }
            if row.timesig.is_none() && o.timesig.is_some() {
                row.timesig = o.timesig.clone();
                identical = false;
            }
            if row.act_dur.is_none() && o.act_dur.is_some() {
                row.act_dur = o.act_dur;
                identical = false;
            }
            if row.repeats.is_none() && o.repeats.is_some() {
                row.repeats = o.repeats;
                identical = false;
            }
            if row.volta.is_none() && o.volta.is_some() {
                row.volta = o.volta;
                identical = false;
            }
            if row.barline.is_none() && o.barline.is_some() {
                row.barline = o.barline.clone();
                identical = false;
            }
            if row.numbering_offset.is_none() && o.numbering_offset.is_some() {
                row.numbering_offset = o.numbering_offset;
                identical = false;
            }
            if !row.dont_count && o.dont_count {
                row.dont_count = true;
                identical = false;
            }
        }
    }
    for (mc, row) in master.iter_mut().enumerate() {
        row.voices = tables.iter().map(|t| t[mc].voices).sum();
    }
    (master, identical)
}

/// Derive displayed measure numbers from the exclusion flags and cumulative
/// numbering offsets. Rows excluded from the count repeat the previous
/// number; an excluded first row becomes measure 0 (anacrusis).
pub fn compute_mn(rows: &[McInfo]) -> Vec<i64> {
    let mut mn: Vec<i64> = Vec::with_capacity(rows.len());
    let mut counter = 0i64;
    for (i, row) in rows.iter().enumerate() {
        if !row.dont_count {
            counter += 1;
            mn.push(counter);
        } else if i == 0 {
            mn.push(0);
        } else {
            mn.push(mn[i - 1]);
        }
    }
    let mut cum = 0i64;
    for (i, row) in rows.iter().enumerate() {
        cum += row.numbering_offset.unwrap_or(0);
        mn[i] += cum;
    }
    check_mn(&mn);
    mn
}

/// Check measure numbers for descents and numbering gaps; log errors.
pub fn check_mn(mn: &[i64]) {
    let descending: Vec<usize> = mn
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] < w[0])
        .map(|(i, _)| i + 1)
        .collect();
    if !descending.is_empty() {
        let mcs = descending
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        error!(
            "Score contains descending barnumbers at measure count{} {}, possibly caused by MuseScore's 'Add to bar number' function.",
            if descending.len() > 1 { "s" } else { "" },
            mcs
        );
    }
    let highest = mn.iter().copied().max().unwrap_or(0);
    let missing: Vec<i64> = (1..highest).filter(|i| !mn.contains(i)).collect();
    if !missing.is_empty() {
        error!(
            "The score has a numbering gap, these measure numbers are missing: {:?}",
            missing
        );
    }
}

/// Expand a reconciled row into a master-table measure with derived columns
/// still at their defaults.
pub fn into_measure(mc: usize, row: McInfo, mn: i64) -> Measure {
    let timesig = row.timesig.unwrap_or_else(|| {
        error!("MC {} has no time signature after reconciliation.", mc);
        "4/4".to_string()
    });
    let nominal = parse_fraction(&timesig).unwrap_or_else(|| {
        error!("Cannot interpret time signature {}.", timesig);
        Fraction::new(1u64, 1u64)
    });
    let act_dur = row.act_dur.unwrap_or(nominal);
    Measure {
        mc,
        keysig: row.keysig.unwrap_or(0),
        timesig,
        nominal_dur: nominal,
        act_dur,
        voices: row.voices,
        repeats: row.repeats,
        volta: row.volta,
        barline: row.barline,
        numbering_offset: row.numbering_offset,
        dont_count: row.dont_count,
        mn,
        offset: Q::zero(),
        section: None,
        next: Vec::new(),
    }
}

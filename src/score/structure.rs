//! Analysis of the repeat and volta structure over the master table.

use log::{debug, error, warn};

use crate::score::features::{McInfo, RepeatMark};

/// For every volta of a group, the measure counts that volta spans.
pub type VoltaGroup = Vec<Vec<usize>>;

/// Group consecutive volta spans and validate them: overlapping spans are
/// truncated with a warning, unequal lengths within a group are tolerated
/// only when all non-first voltas are excluded from the bar count, and no
/// span may contain a `startRepeat`.
pub fn get_volta_structure(rows: &[McInfo]) -> Vec<VoltaGroup> {
    let entries: Vec<(usize, usize)> = rows
        .iter()
        .enumerate()
        .filter_map(|(mc, r)| r.volta.map(|length| (mc, length)))
        .collect();

    let mut structure: Vec<VoltaGroup> = Vec::new();
    let mut ok = true;
    let mut expected: Option<usize> = None;
    for (idx, &(i, length)) in entries.iter().enumerate() {
        let end = (i + length).min(rows.len());
        let mut range: Vec<usize> = (i..end).collect();
        let overlaps: Vec<usize> = range
            .iter()
            .copied()
            .filter(|mc| entries[idx + 1..].iter().any(|e| e.0 == *mc))
            .collect();
        if !overlaps.is_empty() {
            warn!(
                "Voltas overlap in MC{} {:?}",
                if overlaps.len() > 1 { "s" } else { "" },
                overlaps
            );
            range.retain(|mc| !overlaps.contains(mc));
        }
        match structure.last_mut() {
            Some(group) if expected == Some(i) => group.push(range.clone()),
            _ => structure.push(vec![range.clone()]),
        }
        expected = Some(i + range.len());
        if range
            .iter()
            .any(|&mc| rows[mc].repeats == Some(RepeatMark::StartRepeat))
        {
            error!("Volta with range {:?} contains startRepeat!", range);
            ok = false;
        }
    }

    // Voltas of one group must have the same length, unless the surplus
    // measures are all excluded from the bar count.
    for group in &structure {
        let first_len = match group.first() {
            Some(first) => first.len(),
            None => continue,
        };
        if group.iter().skip(1).any(|r| r.len() != first_len) {
            let not_excluded = group
                .iter()
                .skip(1)
                .flatten()
                .any(|&mc| !rows[mc].dont_count);
            if not_excluded {
                warn!(
                    "Voltas with measure COUNTS {:?} have different lengths. Check measure NUMBERS with authoritative score. To silence the warning, either make all voltas the same length or exclude all measures in voltas > 1 from the bar count.",
                    group
                );
                ok = false;
            }
        }
    }

    if ok {
        debug!("Volta structure OK.");
    }
    structure
}

/// Locate the repeated spans of the score as `(start_mc, end_mc)` pairs.
///
/// Only rows carrying a repeat mark or a volta are considered, together with
/// the first/last sentinels. A score opening directly into an `endRepeat`
/// gets an implicit `startRepeat` on its first measure; each further
/// `startRepeat` closes the previous pair at the row preceding it and the
/// last considered row closes the final pair.
pub fn compute_repeat_structure(rows: &[McInfo]) -> Vec<(usize, usize)> {
    let mut considered: Vec<(usize, Option<RepeatMark>)> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.repeats.is_some() || r.volta.is_some())
        .map(|(mc, r)| (mc, r.repeats))
        .collect();

    if let Some(&(mc, Some(RepeatMark::LastMeasure))) = considered.last() {
        if rows[mc].volta.is_none() {
            considered.pop();
        }
    }
    if considered.len() <= 1 {
        return Vec::new();
    }

    if considered[0].1 == Some(RepeatMark::FirstMeasure) {
        let mut i = 1;
        while i < considered.len() - 1 && considered[i].1.is_none() {
            i += 1;
        }
        if considered[i].1 == Some(RepeatMark::EndRepeat) {
            considered[0].1 = Some(RepeatMark::StartRepeat);
        } else {
            considered.remove(0);
        }
    }

    let starts: Vec<usize> = considered
        .iter()
        .enumerate()
        .filter(|(_, e)| e.1 == Some(RepeatMark::StartRepeat))
        .map(|(pos, _)| pos)
        .collect();
    let mut pairs = Vec::with_capacity(starts.len());
    for (k, &pos) in starts.iter().enumerate() {
        let end_pos = match starts.get(k + 1) {
            Some(&next_start) => next_start - 1,
            None => considered.len() - 1,
        };
        pairs.push((considered[pos].0, considered[end_pos].0));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<McInfo> {
        let mut v = vec![McInfo::default(); n];
        v[0].repeats = Some(RepeatMark::FirstMeasure);
        v[n - 1].repeats = Some(RepeatMark::LastMeasure);
        v
    }

    #[test]
    fn test_repeat_structure_reference_table() {
        // firstMeasure 0; volta 16/17/18; startRepeat 19; endRepeats 23/24;
        // volta 25; startRepeat 31; endRepeat 39; volta 40 = last measure
        let mut v = rows(41);
        v[16].volta = Some(1);
        v[17].repeats = Some(RepeatMark::EndRepeat);
        v[17].volta = Some(1);
        v[18].volta = Some(2);
        v[19].repeats = Some(RepeatMark::StartRepeat);
        v[23].repeats = Some(RepeatMark::EndRepeat);
        v[23].volta = Some(1);
        v[24].repeats = Some(RepeatMark::EndRepeat);
        v[24].volta = Some(2);
        v[25].volta = Some(3);
        v[31].repeats = Some(RepeatMark::StartRepeat);
        v[39].repeats = Some(RepeatMark::EndRepeat);
        v[39].volta = Some(1);
        v[40].volta = Some(2);
        assert_eq!(
            compute_repeat_structure(&v),
            vec![(0, 18), (19, 25), (31, 40)]
        );
    }

    #[test]
    fn test_no_repeats_yields_empty() {
        let v = rows(8);
        assert_eq!(compute_repeat_structure(&v), Vec::new());
    }

    #[test]
    fn test_explicit_pair() {
        let mut v = rows(4);
        v[1].repeats = Some(RepeatMark::StartRepeat);
        v[3].repeats = Some(RepeatMark::EndRepeat);
        assert_eq!(compute_repeat_structure(&v), vec![(1, 3)]);
    }

    #[test]
    fn test_implicit_start_repeat() {
        let mut v = rows(4);
        v[3].repeats = Some(RepeatMark::EndRepeat);
        assert_eq!(compute_repeat_structure(&v), vec![(0, 3)]);
    }

    #[test]
    fn test_volta_groups_by_adjacency() {
        let mut v = rows(8);
        v[0].repeats = Some(RepeatMark::StartRepeat);
        v[6].volta = Some(1);
        v[6].repeats = Some(RepeatMark::EndRepeat);
        v[7].volta = Some(1);
        let structure = get_volta_structure(&v);
        assert_eq!(structure, vec![vec![vec![6], vec![7]]]);
    }

    #[test]
    fn test_volta_groups_split_on_gap() {
        let mut v = rows(12);
        v[2].volta = Some(1);
        v[3].volta = Some(1);
        v[8].volta = Some(1);
        v[9].volta = Some(1);
        let structure = get_volta_structure(&v);
        assert_eq!(
            structure,
            vec![vec![vec![2], vec![3]], vec![vec![8], vec![9]]]
        );
    }

    #[test]
    fn test_overlapping_voltas_are_truncated() {
        let mut v = rows(8);
        v[2].volta = Some(3); // would span 2..5, but 4 starts its own volta
        v[4].volta = Some(1);
        v[4].dont_count = true;
        let structure = get_volta_structure(&v);
        // the truncated span and the overlapping volta end up adjacent,
        // forming a single group
        assert_eq!(structure, vec![vec![vec![2, 3], vec![4]]]);
    }

    #[test]
    fn test_two_measure_voltas() {
        let mut v = rows(10);
        v[4].volta = Some(2);
        v[6].volta = Some(2);
        let structure = get_volta_structure(&v);
        assert_eq!(structure, vec![vec![vec![4, 5], vec![6, 7]]]);
    }
}

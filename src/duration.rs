//! Exact rational arithmetic for onsets, durations and scalars, plus the
//! nominal duration vocabulary of MuseScore's `durationType` tags.

use fraction::Fraction;
use num_traits::{One, Zero};

/// Exact rational quantity. All temporal arithmetic runs on this type;
/// nothing on an invariant-bearing path ever passes through a float.
pub type Q = Fraction;

/// Map a nominal duration name to its length in whole notes.
pub fn duration_from_name(name: &str) -> Option<Q> {
    let q = match name {
        "measure" => Fraction::new(1u64, 1u64),
        "breve" => Fraction::new(2u64, 1u64),
        "whole" => Fraction::new(1u64, 1u64),
        "half" => Fraction::new(1u64, 2u64),
        "quarter" => Fraction::new(1u64, 4u64),
        "eighth" => Fraction::new(1u64, 8u64),
        "16th" => Fraction::new(1u64, 16u64),
        "32nd" => Fraction::new(1u64, 32u64),
        "64th" => Fraction::new(1u64, 64u64),
        "128th" => Fraction::new(1u64, 128u64),
        _ => return None,
    };
    Some(q)
}

/// Parse a `"N/D"` string (or a plain integer) into a rational.
/// Used for time signatures and the `len` attribute of irregular measures.
pub fn parse_fraction(s: &str) -> Option<Q> {
    let s = s.trim();
    match s.split_once('/') {
        Some((n, d)) => {
            let n = n.trim().parse::<u64>().ok()?;
            let d = d.trim().parse::<u64>().ok()?;
            if d == 0 {
                return None;
            }
            Some(Fraction::new(n, d))
        }
        None => s.parse::<u64>().ok().map(|n| Fraction::new(n, 1u64)),
    }
}

/// Scalar applied by `dots` augmentation dots: the sum of (1/2)^i for
/// i in 0..=dots, i.e. 1, 3/2, 7/4, ...
pub fn dot_scalar(dots: u32) -> Q {
    let half = Fraction::new(1u64, 2u64);
    let mut term = Q::one();
    let mut sum = Q::zero();
    for _ in 0..=dots {
        sum += term;
        term *= half;
    }
    sum
}

/// Default beat size per time signature, for the `beats` column.
/// Signatures not listed here fall back to a quarter beat.
pub fn default_beat_size(timesig: &str) -> Q {
    match timesig {
        "3/16" => Fraction::new(1u64, 16u64),
        "6/16" => Fraction::new(3u64, 16u64),
        "3/8" => Fraction::new(1u64, 8u64),
        "4/8" => Fraction::new(1u64, 4u64),
        "6/8" | "9/8" | "12/8" => Fraction::new(3u64, 8u64),
        "2/4" | "3/4" | "4/4" => Fraction::new(1u64, 4u64),
        "6/4" => Fraction::new(3u64, 4u64),
        "2/2" | "3/2" => Fraction::new(1u64, 2u64),
        _ => Fraction::new(1u64, 4u64),
    }
}

/// Integer quotient of two non-negative rationals.
pub fn floor_div(q: Q, size: Q) -> u64 {
    if size.is_zero() {
        return 0;
    }
    let ratio = q / size;
    match (ratio.numer(), ratio.denom()) {
        (Some(n), Some(d)) if *d != 0 => n / d,
        _ => 0,
    }
}

/// Remainder of `q` modulo `size`.
pub fn rem(q: Q, size: Q) -> Q {
    q - size * Fraction::new(floor_div(q, size), 1u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_names() {
        assert_eq!(duration_from_name("quarter"), Some(Fraction::new(1u64, 4u64)));
        assert_eq!(duration_from_name("breve"), Some(Fraction::new(2u64, 1u64)));
        assert_eq!(duration_from_name("128th"), Some(Fraction::new(1u64, 128u64)));
        assert_eq!(duration_from_name("whole"), duration_from_name("measure"));
        assert_eq!(duration_from_name("crotchet"), None);
    }

    #[test]
    fn test_parse_fraction() {
        assert_eq!(parse_fraction("3/4"), Some(Fraction::new(3u64, 4u64)));
        assert_eq!(parse_fraction(" 1/4 "), Some(Fraction::new(1u64, 4u64)));
        assert_eq!(parse_fraction("2"), Some(Fraction::new(2u64, 1u64)));
        assert_eq!(parse_fraction("1/0"), None);
        assert_eq!(parse_fraction("x/4"), None);
    }

    #[test]
    fn test_dot_scalar() {
        assert_eq!(dot_scalar(0), Fraction::new(1u64, 1u64));
        assert_eq!(dot_scalar(1), Fraction::new(3u64, 2u64));
        assert_eq!(dot_scalar(2), Fraction::new(7u64, 4u64));
    }

    #[test]
    fn test_beat_sizes() {
        assert_eq!(default_beat_size("6/8"), Fraction::new(3u64, 8u64));
        assert_eq!(default_beat_size("4/4"), Fraction::new(1u64, 4u64));
        assert_eq!(default_beat_size("5/4"), Fraction::new(1u64, 4u64));
    }

    #[test]
    fn test_floor_and_rem() {
        let q = Fraction::new(5u64, 8u64);
        let size = Fraction::new(1u64, 4u64);
        assert_eq!(floor_div(q, size), 2);
        assert_eq!(rem(q, size), Fraction::new(1u64, 8u64));
        assert_eq!(rem(Fraction::new(1u64, 2u64), size), Fraction::new(0u64, 1u64));
    }
}

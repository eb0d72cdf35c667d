use std::fmt;

use num_bigint::BigUint;

/// Closed range `[lower, upper]` of candidate plaintext values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub lower: BigUint,
    pub upper: BigUint,
}

impl Interval {
    pub fn new(lower: BigUint, upper: BigUint) -> Self {
        debug_assert!(lower <= upper, "inverted interval");
        Self { lower, upper }
    }

    pub fn point(value: BigUint) -> Self {
        Self {
            lower: value.clone(),
            upper: value,
        }
    }

    pub fn contains(&self, value: &BigUint) -> bool {
        &self.lower <= value && value <= &self.upper
    }

    pub fn is_point(&self) -> bool {
        self.lower == self.upper
    }

    /// Number of integers covered, `upper - lower + 1`.
    pub fn width(&self) -> BigUint {
        &self.upper - &self.lower + 1u32
    }

    fn overlaps(&self, other: &Interval) -> bool {
        self.upper >= other.lower && self.lower <= other.upper
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:x}, {:x}]", self.lower, self.upper)
    }
}

/// Intervals kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(interval: Interval) -> Self {
        Self {
            intervals: vec![interval],
        }
    }

    /// Merges `interval` into the first member it overlaps, or appends it.
    /// Only one merge happens per call.
    pub fn insert(&mut self, interval: Interval) {
        match self.intervals.iter_mut().find(|i| i.overlaps(&interval)) {
            Some(existing) => {
                if interval.lower < existing.lower {
                    existing.lower = interval.lower;
                }
                if interval.upper > existing.upper {
                    existing.upper = interval.upper;
                }
            }
            None => self.intervals.push(interval),
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    pub fn contains(&self, value: &BigUint) -> bool {
        self.intervals.iter().any(|i| i.contains(value))
    }

    /// The remaining value once the set has shrunk to a single point.
    pub fn solution(&self) -> Option<&BigUint> {
        match self.intervals.as_slice() {
            [only] if only.is_point() => Some(&only.lower),
            _ => None,
        }
    }

    /// Bit length of the widest member, for progress reporting.
    pub fn max_width_bits(&self) -> u64 {
        self.intervals
            .iter()
            .map(|i| i.width().bits())
            .max()
            .unwrap_or(0)
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(lower: u32, upper: u32) -> Interval {
        Interval::new(lower.into(), upper.into())
    }

    fn members(set: &IntervalSet) -> Vec<Interval> {
        set.iter().cloned().collect()
    }

    #[test]
    fn overlapping_inserts_merge() {
        let mut set = IntervalSet::new();
        set.insert(interval(5, 10));
        set.insert(interval(8, 15));
        assert_eq!(vec![interval(5, 15)], members(&set));
    }

    #[test]
    fn disjoint_inserts_keep_order() {
        let mut set = IntervalSet::new();
        set.insert(interval(10, 20));
        set.insert(interval(1, 2));
        assert_eq!(vec![interval(10, 20), interval(1, 2)], members(&set));
    }

    #[test]
    fn touching_endpoints_merge() {
        let mut set = IntervalSet::single(interval(1, 5));
        set.insert(interval(5, 9));
        set.insert(interval(0, 1));
        assert_eq!(vec![interval(0, 9)], members(&set));
    }

    #[test]
    fn contained_insert_is_absorbed() {
        let mut set = IntervalSet::single(interval(1, 100));
        set.insert(interval(20, 30));
        assert_eq!(vec![interval(1, 100)], members(&set));
    }

    #[test]
    fn only_first_overlap_merges() {
        let mut set = IntervalSet::new();
        set.insert(interval(1, 3));
        set.insert(interval(7, 9));
        set.insert(interval(2, 8));
        assert_eq!(vec![interval(1, 8), interval(7, 9)], members(&set));
    }

    #[test]
    fn solution_requires_single_point() {
        let mut set = IntervalSet::single(Interval::point(7u32.into()));
        assert_eq!(Some(&BigUint::from(7u32)), set.solution());
        assert!(set.contains(&7u32.into()));
        assert!(!set.contains(&8u32.into()));

        set.insert(Interval::point(9u32.into()));
        assert_eq!(None, set.solution());
        assert_eq!(None, IntervalSet::single(interval(1, 2)).solution());
        assert_eq!(None, IntervalSet::new().solution());
    }

    #[test]
    fn widths() {
        assert_eq!(BigUint::from(1u32), interval(4, 4).width());
        let set = IntervalSet::single(interval(0, 255));
        assert_eq!(9, set.max_width_bits());
        assert_eq!(0, IntervalSet::new().max_width_bits());
    }
}

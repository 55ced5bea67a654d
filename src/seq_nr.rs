use std::fmt::{Display, Formatter};
use std::ops::Add;

/// A packet sequence number. Sequence numbers are 16 bit on the wire and wrap around, so
///  0 follows after FFFF.
///
/// There is no `Ord` implementation: ordering is only meaningful between numbers
///  less than half the number space apart, and all comparisons go through [SeqNr::distance_from].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SeqNr(u16);

impl Display for SeqNr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNr {
    pub const ZERO: SeqNr = SeqNr(0);

    /// the biggest window for which wrap-around comparison is unambiguous
    pub const MAX_WINDOW_SIZE: u16 = 0x8000;

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> SeqNr {
        SeqNr(self.0.wrapping_add(1))
    }

    /// Signed distance from `base` to `self`, i.e. negative if `self` comes before `base`.
    pub fn distance_from(&self, base: SeqNr) -> i32 {
        (self.0.wrapping_sub(base.0) as i16).into()
    }

    pub fn is_before(&self, other: SeqNr) -> bool {
        self.distance_from(other) < 0
    }

    /// iterates from `self` (inclusive) to `end` (exclusive), following wrap-around
    pub fn to(&self, end: SeqNr) -> impl Iterator<Item = SeqNr> {
        let len = end.0.wrapping_sub(self.0);
        let start = self.0;
        (0..len).map(move |offs| SeqNr(start.wrapping_add(offs)))
    }
}

impl Add<u16> for SeqNr {
    type Output = SeqNr;

    fn add(self, rhs: u16) -> SeqNr {
        SeqNr(self.0.wrapping_add(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 0, 0)]
    #[case::ahead(5, 2, 3)]
    #[case::behind(2, 5, -3)]
    #[case::ahead_across_wrap(1, 0xfffe, 3)]
    #[case::behind_across_wrap(0xfffe, 1, -3)]
    #[case::half_space(0x8000, 0, -0x8000)]
    #[case::just_below_half(0x7fff, 0, 0x7fff)]
    fn test_distance_from(#[case] seq: u16, #[case] base: u16, #[case] expected: i32) {
        assert_eq!(SeqNr::from_raw(seq).distance_from(SeqNr::from_raw(base)), expected);
    }

    #[rstest]
    #[case::simple(3, 4, true)]
    #[case::equal(4, 4, false)]
    #[case::after(5, 4, false)]
    #[case::across_wrap(0xffff, 0, true)]
    #[case::after_wrap(0, 0xffff, false)]
    fn test_is_before(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(SeqNr::from_raw(a).is_before(SeqNr::from_raw(b)), expected);
    }

    #[rstest]
    #[case::empty(4, 4, vec![])]
    #[case::simple(4, 7, vec![4, 5, 6])]
    #[case::wrapping(0xfffe, 2, vec![0xfffe, 0xffff, 0, 1])]
    fn test_to(#[case] from: u16, #[case] to: u16, #[case] expected: Vec<u16>) {
        let actual = SeqNr::from_raw(from).to(SeqNr::from_raw(to))
            .map(|s| s.to_raw())
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_next_wraps() {
        assert_eq!(SeqNr::from_raw(0xffff).next(), SeqNr::ZERO);
        assert_eq!(SeqNr::from_raw(0xfffe) + 3, SeqNr::from_raw(1));
    }
}

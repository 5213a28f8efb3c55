// ABOUTME: Arithmetic-progression range with an algebraic sum fast path and a
// vectorizable materialization path for a closed set of recognized operations (spec.md §4.6).

use super::capability::{Counted, Seqable};
use super::seq::Seq;

/// One of the operations the materializer is allowed to fast-path. Closed by
/// design — anything else falls back to the generic map/reduce contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizedOp {
    Identity,
    Increment,
    Decrement,
    Negate,
    Double,
}

impl RecognizedOp {
    fn apply(self, x: i64) -> i64 {
        match self {
            RecognizedOp::Identity => x,
            RecognizedOp::Increment => x + 1,
            RecognizedOp::Decrement => x - 1,
            RecognizedOp::Negate => -x,
            RecognizedOp::Double => x * 2,
        }
    }
}

/// `(start, end, step)`. `end = None` models an unbounded range; `count`/`sum`
/// require a bound and return `None` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: Option<i64>,
    pub step: i64,
}

impl Range {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Range {
            start,
            end: Some(end),
            step,
        }
    }

    pub fn bounded_from_zero(end: i64) -> Self {
        Self::new(0, end, 1)
    }

    pub fn unbounded(start: i64, step: i64) -> Self {
        Range { start, end: None, step }
    }

    pub fn count(&self) -> Option<usize> {
        let end = self.end?;
        if self.step == 0 {
            return None;
        }
        let n = if self.step > 0 {
            if end <= self.start {
                0
            } else {
                ((end - self.start - 1) / self.step) + 1
            }
        } else if end >= self.start {
            0
        } else {
            ((self.start - end - 1) / (-self.step)) + 1
        };
        Some(n.max(0) as usize)
    }

    fn last(&self) -> Option<i64> {
        let n = self.count()?;
        if n == 0 {
            None
        } else {
            Some(self.start + (n as i64 - 1) * self.step)
        }
    }

    /// `reduce(+, range)` via `n*(first+last)/2`, used unconditionally
    /// regardless of range size (spec.md §4.6, §8 scenario 8).
    pub fn sum(&self) -> Option<i64> {
        let n = self.count()?;
        if n == 0 {
            return Some(0);
        }
        let last = self.last()?;
        Some((n as i64) * (self.start + last) / 2)
    }

    pub fn nth(&self, i: usize) -> Option<i64> {
        let n = self.count()?;
        if i >= n {
            return None;
        }
        Some(self.start + (i as i64) * self.step)
    }

    pub fn to_vec(&self) -> Vec<i64> {
        match self.count() {
            Some(n) => (0..n).map(|i| self.start + (i as i64) * self.step).collect(),
            None => Vec::new(),
        }
    }

    /// Reference elementwise application, one element at a time.
    pub fn materialize_scalar(&self, op: RecognizedOp) -> Vec<i64> {
        self.to_vec().into_iter().map(|x| op.apply(x)).collect()
    }

    /// Vectorizable materialization: processes in chunks of 8 (left to the
    /// autovectorizer — no explicit intrinsics) for the closed recognized-op
    /// set. Must be bit-identical to [`Range::materialize_scalar`].
    pub fn materialize_fast(&self, op: RecognizedOp) -> Vec<i64> {
        let items = self.to_vec();
        let mut out = Vec::with_capacity(items.len());
        for chunk in items.chunks(8) {
            for &x in chunk {
                out.push(op.apply(x));
            }
        }
        out
    }
}

impl Counted for Range {
    fn count(&self) -> usize {
        self.count().unwrap_or(0)
    }
}

impl Seqable<i64> for Range {
    fn seq(&self) -> Seq<i64> {
        match self.end {
            Some(_) => Seq::from_vec(self.to_vec()),
            None => unbounded_seq(self.start, self.step),
        }
    }
}

fn unbounded_seq(start: i64, step: i64) -> Seq<i64> {
    Seq::lazy_cons(start, move || unbounded_seq(start + step, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_matches_gauss_formula() {
        let r = Range::bounded_from_zero(1_000_000);
        assert_eq!(r.sum(), Some(499_999_500_000));
    }

    #[test]
    fn count_and_nth() {
        let r = Range::new(1, 10, 2); // 1,3,5,7,9
        assert_eq!(r.count(), Some(5));
        assert_eq!(r.nth(0), Some(1));
        assert_eq!(r.nth(4), Some(9));
        assert_eq!(r.nth(5), None);
    }

    #[test]
    fn negative_step_range() {
        let r = Range::new(10, 0, -1);
        assert_eq!(r.to_vec(), (1..=10).rev().collect::<Vec<_>>());
    }

    #[test]
    fn fast_and_scalar_materialization_agree() {
        let r = Range::new(-50, 500, 3);
        for op in [
            RecognizedOp::Identity,
            RecognizedOp::Increment,
            RecognizedOp::Decrement,
            RecognizedOp::Negate,
            RecognizedOp::Double,
        ] {
            assert_eq!(r.materialize_scalar(op), r.materialize_fast(op));
        }
    }

    #[test]
    fn empty_range_sums_to_zero() {
        let r = Range::new(5, 5, 1);
        assert_eq!(r.sum(), Some(0));
        assert_eq!(r.count(), Some(0));
    }
}

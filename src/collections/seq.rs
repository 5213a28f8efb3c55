// ABOUTME: Lazy, possibly-infinite sequence with a chunked accelerator (spec.md §4.6).
// A seq is finite iff it reaches a null/empty terminator; `count` forces it.

use std::rc::Rc;

use super::capability::Counted;

type Thunk<T> = Rc<dyn Fn() -> Seq<T>>;

/// A cons cell is either empty, a single lazy step, or a 32-element chunk
/// that amortizes per-element overhead for bulk producers (e.g. `Range`).
#[derive(Clone)]
pub enum Seq<T: Clone> {
    Empty,
    Cons { first: T, rest: Thunk<T> },
    Chunk {
        chunk: Rc<Vec<T>>,
        offset: usize,
        rest: Thunk<T>,
    },
}

impl<T: Clone + 'static> Seq<T> {
    pub fn empty() -> Seq<T> {
        Seq::Empty
    }

    pub fn cons(first: T, rest: Seq<T>) -> Seq<T> {
        Seq::Cons {
            first,
            rest: Rc::new(move || rest.clone()),
        }
    }

    /// Lazily cons `first` onto a sequence produced on demand by `thunk`.
    pub fn lazy_cons(first: T, thunk: impl Fn() -> Seq<T> + 'static) -> Seq<T> {
        Seq::Cons {
            first,
            rest: Rc::new(thunk),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Seq::Empty)
    }

    pub fn first(&self) -> Option<T> {
        match self {
            Seq::Empty => None,
            Seq::Cons { first, .. } => Some(first.clone()),
            Seq::Chunk { chunk, offset, .. } => chunk.get(*offset).cloned(),
        }
    }

    /// One step past the current element. May force production of the next
    /// chunk/cons cell but goes no further than necessary.
    pub fn rest(&self) -> Seq<T> {
        match self {
            Seq::Empty => Seq::Empty,
            Seq::Cons { rest, .. } => rest(),
            Seq::Chunk {
                chunk,
                offset,
                rest,
            } => {
                if offset + 1 < chunk.len() {
                    Seq::Chunk {
                        chunk: Rc::clone(chunk),
                        offset: offset + 1,
                        rest: Rc::clone(rest),
                    }
                } else {
                    rest()
                }
            }
        }
    }

    /// `next` differs from `rest` only when the caller wants `None` instead
    /// of an empty seq to signal termination; kept distinct to mirror the
    /// source language's `first`/`rest`/`next` trio (spec.md §4.6).
    pub fn next(&self) -> Option<Seq<T>> {
        let r = self.rest();
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    /// Expose the current chunk (if any) for a chunked-consumer fast path,
    /// and the seq to resume from after it.
    pub fn chunk_first(&self) -> Option<(Rc<Vec<T>>, usize)> {
        match self {
            Seq::Chunk { chunk, offset, .. } => Some((Rc::clone(chunk), *offset)),
            _ => None,
        }
    }

    pub fn from_vec(items: Vec<T>) -> Seq<T> {
        Self::chunk_from(Rc::new(items), 0)
    }

    fn chunk_from(items: Rc<Vec<T>>, start: usize) -> Seq<T> {
        if start >= items.len() {
            return Seq::Empty;
        }
        let end = (start + 32).min(items.len());
        let chunk: Rc<Vec<T>> = Rc::new(items[start..end].to_vec());
        let rest_items = Rc::clone(&items);
        Seq::Chunk {
            chunk,
            offset: 0,
            rest: Rc::new(move || Self::chunk_from(Rc::clone(&rest_items), end)),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::new();
        let mut cur = self.clone();
        loop {
            match &cur {
                Seq::Empty => break,
                Seq::Cons { first, .. } => {
                    out.push(first.clone());
                    cur = cur.rest();
                }
                Seq::Chunk { chunk, offset, .. } => {
                    out.extend(chunk[*offset..].iter().cloned());
                    cur = cur.rest_after_chunk();
                }
            }
        }
        out
    }

    fn rest_after_chunk(&self) -> Seq<T> {
        match self {
            Seq::Chunk { rest, .. } => rest(),
            other => other.rest(),
        }
    }
}

impl<T: Clone + 'static> Counted for Seq<T> {
    fn count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.clone();
        loop {
            match &cur {
                Seq::Empty => return n,
                Seq::Chunk { chunk, offset, .. } => {
                    n += chunk.len() - offset;
                    cur = cur.rest_after_chunk();
                }
                Seq::Cons { .. } => {
                    n += 1;
                    cur = cur.rest();
                }
            }
        }
    }
}

impl<T: Clone + 'static> Iterator for Seq<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.first()?;
        *self = self.rest();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_seq_round_trips_through_to_vec() {
        let items: Vec<i64> = (0..100).collect();
        let seq = Seq::from_vec(items.clone());
        assert_eq!(seq.to_vec(), items);
    }

    #[test]
    fn count_forces_a_lazy_seq() {
        let mut n = 0i64;
        fn naturals_from(n: i64) -> Seq<i64> {
            Seq::lazy_cons(n, move || naturals_from(n + 1))
        }
        let finite = {
            // bound an otherwise-infinite seq for the count test
            let mut s = naturals_from(0);
            let mut out = Vec::new();
            for _ in 0..10 {
                out.push(s.first().unwrap());
                s = s.rest();
                n += 1;
            }
            Seq::from_vec(out)
        };
        assert_eq!(finite.count(), n as usize);
    }

    #[test]
    fn first_rest_on_empty() {
        let empty: Seq<i64> = Seq::empty();
        assert_eq!(empty.first(), None);
        assert!(empty.rest().is_empty());
        assert_eq!(empty.next(), None);
    }
}

// ABOUTME: Persistent singly-linked list: O(1) head/tail, shared empty singleton (spec.md §3/§4.6).

use std::rc::Rc;

use super::capability::{Counted, Seqable};
use super::seq::Seq;

struct ListNode<T> {
    head: T,
    tail: PersistentList<T>,
    count: usize,
}

#[derive(Clone)]
pub struct PersistentList<T>(Option<Rc<ListNode<T>>>);

impl<T: Clone + 'static> PersistentList<T> {
    pub fn empty() -> Self {
        PersistentList(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn count(&self) -> usize {
        self.0.as_ref().map(|n| n.count).unwrap_or(0)
    }

    pub fn cons(&self, head: T) -> Self {
        PersistentList(Some(Rc::new(ListNode {
            head,
            tail: self.clone(),
            count: self.count() + 1,
        })))
    }

    pub fn first(&self) -> Option<T> {
        self.0.as_ref().map(|n| n.head.clone())
    }

    pub fn rest(&self) -> Self {
        self.0
            .as_ref()
            .map(|n| n.tail.clone())
            .unwrap_or_else(Self::empty)
    }

    pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self
    where
        T: 'static,
    {
        let items: Vec<T> = items.into_iter().collect();
        let mut list = Self::empty();
        for item in items.into_iter().rev() {
            list = list.cons(item);
        }
        list
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count());
        let mut cur = self.clone();
        while let Some(h) = cur.first() {
            out.push(h);
            cur = cur.rest();
        }
        out
    }
}

impl<T: Clone + 'static> Default for PersistentList<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Clone + PartialEq + 'static> PartialEq for PersistentList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl<T: Clone + 'static> Counted for PersistentList<T> {
    fn count(&self) -> usize {
        self.count()
    }
}

impl<T: Clone + 'static> Seqable<T> for PersistentList<T> {
    fn seq(&self) -> Seq<T> {
        Seq::from_vec(self.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cons_and_iterate() {
        let l = PersistentList::from_iter([1, 2, 3]);
        assert_eq!(l.to_vec(), vec![1, 2, 3]);
        assert_eq!(l.count(), 3);
    }

    #[test]
    fn empty_list_singleton_behavior() {
        let empty: PersistentList<i64> = PersistentList::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.first(), None);
        assert!(empty.rest().is_empty());
    }

    #[test]
    fn sharing_tail_across_conses() {
        let tail = PersistentList::from_iter([2, 3]);
        let a = tail.cons(1);
        let b = tail.cons(99);
        assert_eq!(a.rest().to_vec(), tail.to_vec());
        assert_eq!(b.rest().to_vec(), tail.to_vec());
    }
}

//! `NestedNode<T>`: the tree underneath every NestedTensor.
//!
//! Leaves carry a payload (a tensor, a size vector, a stride vector), inner
//! nodes carry an ordered list of children. All traversal is depth-first,
//! left to right, so `flatten()` order is also the packing order of the
//! contiguous buffer.

use nested_core::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::NestedTensorError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NestedNode<T> {
    Leaf(T),
    List(Vec<NestedNode<T>>),
}

/// Shapes of the components.
pub type SizeNode = NestedNode<Vec<usize>>;

/// The components themselves.
pub type TensorNode = NestedNode<Tensor>;

impl<T> NestedNode<T> {
    pub fn leaf(payload: T) -> Self {
        NestedNode::Leaf(payload)
    }

    pub fn list(children: Vec<NestedNode<T>>) -> Self {
        NestedNode::List(children)
    }

    /// A one-level list holding `payloads` as leaves.
    pub fn from_leaves(payloads: Vec<T>) -> Self {
        NestedNode::List(payloads.into_iter().map(NestedNode::Leaf).collect())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NestedNode::Leaf(_))
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            NestedNode::Leaf(p) => Some(p),
            NestedNode::List(_) => None,
        }
    }

    /// Number of children; zero for a leaf.
    pub fn degree(&self) -> usize {
        match self {
            NestedNode::Leaf(_) => 0,
            NestedNode::List(children) => children.len(),
        }
    }

    /// Distance from this node to its leaves along the first child.
    /// An empty list counts as one level.
    pub fn height(&self) -> usize {
        match self {
            NestedNode::Leaf(_) => 0,
            NestedNode::List(children) => 1 + children.first().map_or(0, NestedNode::height),
        }
    }

    pub fn children(&self) -> &[NestedNode<T>] {
        match self {
            NestedNode::Leaf(_) => &[],
            NestedNode::List(children) => children,
        }
    }

    pub fn into_children(self) -> Vec<NestedNode<T>> {
        match self {
            NestedNode::Leaf(_) => Vec::new(),
            NestedNode::List(children) => children,
        }
    }

    pub fn unbind(&self) -> Vec<NestedNode<T>>
    where
        T: Clone,
    {
        self.children().to_vec()
    }

    /// Whether every leaf sits at depth `height()`.
    pub fn is_balanced(&self) -> bool {
        fn check<T>(node: &NestedNode<T>, depth: usize) -> bool {
            match node {
                NestedNode::Leaf(_) => depth == 0,
                NestedNode::List(children) => {
                    depth > 0 && children.iter().all(|c| check(c, depth - 1))
                }
            }
        }
        check(self, self.height())
    }

    pub fn same_structure<U>(&self, other: &NestedNode<U>) -> bool {
        match (self, other) {
            (NestedNode::Leaf(_), NestedNode::Leaf(_)) => true,
            (NestedNode::List(a), NestedNode::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            _ => false,
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> NestedNode<U> {
        fn go<T, U>(node: &NestedNode<T>, f: &impl Fn(&T) -> U) -> NestedNode<U> {
            match node {
                NestedNode::Leaf(p) => NestedNode::Leaf(f(p)),
                NestedNode::List(children) => {
                    NestedNode::List(children.iter().map(|c| go(c, f)).collect())
                }
            }
        }
        go(self, &f)
    }

    pub fn try_map<U>(&self, mut f: impl FnMut(&T) -> Result<U>) -> Result<NestedNode<U>> {
        fn go<T, U>(
            node: &NestedNode<T>,
            f: &mut impl FnMut(&T) -> Result<U>,
        ) -> Result<NestedNode<U>> {
            match node {
                NestedNode::Leaf(p) => Ok(NestedNode::Leaf(f(p)?)),
                NestedNode::List(children) => Ok(NestedNode::List(
                    children.iter().map(|c| go(c, f)).collect::<Result<_>>()?,
                )),
            }
        }
        go(self, &mut f)
    }

    /// `try_map` with the leaf work spread over the rayon pool.
    pub fn par_try_map<U>(&self, f: impl Fn(&T) -> Result<U> + Sync + Send) -> Result<NestedNode<U>>
    where
        T: Sync,
        U: Send,
    {
        let values = self
            .flatten()
            .into_par_iter()
            .map(f)
            .collect::<Result<Vec<U>>>()?;
        self.restructure(values)
    }

    pub fn try_zip_map<U, V>(
        &self,
        other: &NestedNode<U>,
        mut f: impl FnMut(&T, &U) -> Result<V>,
    ) -> Result<NestedNode<V>> {
        fn go<T, U, V>(
            a: &NestedNode<T>,
            b: &NestedNode<U>,
            f: &mut impl FnMut(&T, &U) -> Result<V>,
        ) -> Result<NestedNode<V>> {
            match (a, b) {
                (NestedNode::Leaf(x), NestedNode::Leaf(y)) => Ok(NestedNode::Leaf(f(x, y)?)),
                (NestedNode::List(xs), NestedNode::List(ys)) if xs.len() == ys.len() => {
                    Ok(NestedNode::List(
                        xs.iter().zip(ys).map(|(x, y)| go(x, y, f)).collect::<Result<_>>()?,
                    ))
                }
                _ => Err(NestedTensorError::InvalidStructure(
                    "trees differ in shape".into(),
                )),
            }
        }
        go(self, other, &mut f)
    }

    pub fn zip_map<U, V>(&self, other: &NestedNode<U>, f: impl Fn(&T, &U) -> V) -> Result<NestedNode<V>> {
        self.try_zip_map(other, |a, b| Ok(f(a, b)))
    }

    /// Visit every payload mutably.
    pub fn apply(&mut self, mut f: impl FnMut(&mut T)) {
        self.leaves_mut().into_iter().for_each(|p| f(p));
    }

    pub fn try_apply(&mut self, mut f: impl FnMut(&mut T) -> Result<()>) -> Result<()> {
        self.leaves_mut().into_iter().try_for_each(|p| f(p))
    }

    pub fn zip_apply<U>(
        &mut self,
        other: &NestedNode<U>,
        mut f: impl FnMut(&mut T, &U) -> Result<()>,
    ) -> Result<()> {
        if !self.same_structure(other) {
            return Err(NestedTensorError::InvalidStructure("trees differ in shape".into()));
        }
        self.leaves_mut()
            .into_iter()
            .zip(other.flatten())
            .try_for_each(|(a, b)| f(a, b))
    }

    pub fn reduce<A>(&self, init: A, f: impl FnMut(A, &T) -> A) -> A {
        self.flatten().into_iter().fold(init, f)
    }

    /// Leaf payloads, depth-first.
    pub fn flatten(&self) -> Vec<&T> {
        fn go<'a, T>(node: &'a NestedNode<T>, out: &mut Vec<&'a T>) {
            match node {
                NestedNode::Leaf(p) => out.push(p),
                NestedNode::List(children) => children.iter().for_each(|c| go(c, out)),
            }
        }
        let mut out = Vec::new();
        go(self, &mut out);
        out
    }

    pub fn into_flatten(self) -> Vec<T> {
        fn go<T>(node: NestedNode<T>, out: &mut Vec<T>) {
            match node {
                NestedNode::Leaf(p) => out.push(p),
                NestedNode::List(children) => children.into_iter().for_each(|c| go(c, out)),
            }
        }
        let mut out = Vec::new();
        go(self, &mut out);
        out
    }

    pub fn leaves_mut(&mut self) -> Vec<&mut T> {
        fn go<'a, T>(node: &'a mut NestedNode<T>, out: &mut Vec<&'a mut T>) {
            match node {
                NestedNode::Leaf(p) => out.push(p),
                NestedNode::List(children) => children.iter_mut().for_each(|c| go(c, out)),
            }
        }
        let mut out = Vec::new();
        go(self, &mut out);
        out
    }

    /// Leaf payloads paired with their child-index path from the root.
    pub fn enumerate_leaves(&self) -> Vec<(Vec<usize>, &T)> {
        fn go<'a, T>(node: &'a NestedNode<T>, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, &'a T)>) {
            match node {
                NestedNode::Leaf(p) => out.push((path.clone(), p)),
                NestedNode::List(children) => {
                    for (i, c) in children.iter().enumerate() {
                        path.push(i);
                        go(c, path, out);
                        path.pop();
                    }
                }
            }
        }
        let mut out = Vec::new();
        go(self, &mut Vec::new(), &mut out);
        out
    }

    /// A tree shaped like `self` whose leaves are `values` in depth-first
    /// order. `values` must hold exactly one entry per leaf.
    pub fn restructure<U>(&self, values: Vec<U>) -> Result<NestedNode<U>> {
        fn go<T, U>(node: &NestedNode<T>, values: &mut impl Iterator<Item = U>) -> Option<NestedNode<U>> {
            match node {
                NestedNode::Leaf(_) => values.next().map(NestedNode::Leaf),
                NestedNode::List(children) => children
                    .iter()
                    .map(|c| go(c, values))
                    .collect::<Option<Vec<_>>>()
                    .map(NestedNode::List),
            }
        }
        let expected = self.flatten().len();
        if values.len() != expected {
            return Err(NestedTensorError::InvalidStructure(format!(
                "{} values for a tree with {} leaves",
                values.len(),
                expected
            )));
        }
        let mut iter = values.into_iter();
        go(self, &mut iter)
            .ok_or_else(|| NestedTensorError::InvalidStructure("ran out of leaf values".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NestedNode<i32> {
        NestedNode::list(vec![
            NestedNode::from_leaves(vec![1, 2]),
            NestedNode::from_leaves(vec![3]),
            NestedNode::list(vec![]),
        ])
    }

    #[test]
    fn test_height_and_degree() {
        let n = sample();
        assert_eq!(n.height(), 2);
        assert_eq!(n.degree(), 3);
        assert_eq!(NestedNode::<i32>::list(vec![]).height(), 1);
        assert_eq!(NestedNode::leaf(7).height(), 0);
        assert_eq!(NestedNode::leaf(7).degree(), 0);
        assert_eq!(NestedNode::leaf(7).payload(), Some(&7));
    }

    #[test]
    fn test_balanced() {
        assert!(sample().is_balanced());
        let ragged = NestedNode::list(vec![NestedNode::leaf(1), NestedNode::from_leaves(vec![2])]);
        assert!(!ragged.is_balanced());
    }

    #[test]
    fn test_map_flatten_reduce() {
        let n = sample().map(|x| x * 10);
        assert_eq!(n.flatten(), vec![&10, &20, &30]);
        assert_eq!(n.reduce(0, |acc, x| acc + x), 60);
        assert_eq!(n.clone().into_flatten(), vec![10, 20, 30]);
    }

    #[test]
    fn test_try_map_propagates_error() {
        let r = sample().try_map(|&x| {
            if x == 3 {
                Err(NestedTensorError::InvalidArgument("three".into()))
            } else {
                Ok(x)
            }
        });
        assert!(r.is_err());
    }

    #[test]
    fn test_zip_requires_same_structure() {
        let a = sample();
        let b = sample().map(|&x| x as f32);
        let z = a.zip_map(&b, |x, y| *x as f32 + y).unwrap();
        assert_eq!(z.flatten(), vec![&2.0, &4.0, &6.0]);
        let c = NestedNode::from_leaves(vec![1, 2, 3]);
        assert!(a.zip_map(&c, |x, y| x + y).is_err());
    }

    #[test]
    fn test_apply_and_zip_apply() {
        let mut a = sample();
        a.apply(|x| *x += 1);
        assert_eq!(a.flatten(), vec![&2, &3, &4]);
        let b = sample();
        a.zip_apply(&b, |x, y| {
            *x -= *y;
            Ok(())
        })
        .unwrap();
        assert_eq!(a.flatten(), vec![&1, &1, &1]);
    }

    #[test]
    fn test_par_try_map_keeps_order() {
        let n = NestedNode::from_leaves((0..64).collect::<Vec<i32>>());
        let doubled = n.par_try_map(|&x| Ok(x * 2)).unwrap();
        let expected: Vec<i32> = (0..64).map(|x| x * 2).collect();
        assert_eq!(doubled.into_flatten(), expected);
    }

    #[test]
    fn test_enumerate_and_restructure() {
        let n = sample();
        let paths: Vec<Vec<usize>> = n.enumerate_leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![vec![0, 0], vec![0, 1], vec![1, 0]]);
        let r = n.restructure(vec!["a", "b", "c"]).unwrap();
        assert!(r.same_structure(&n));
        assert!(n.restructure(vec![1]).is_err());
    }
}

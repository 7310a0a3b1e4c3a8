//! Generic immutable tree operations shared by expressions and plans.
//!
//! Every rewrite pass in the crate is phrased as a partial rule over a tree,
//! so the kernel keeps descent and rebuild cheap: children are reference
//! counted inside the node enums, clones are shallow, and a spine is rebuilt
//! only when a rule actually fired somewhere below it.

use quarry_common::{QuarryError, Result};

/// A partial, fallible rewrite rule: `Ok(None)` means "not defined at this
/// node", `Ok(Some(n))` replaces the node with `n`.
pub type TransformRule<'a, T> = dyn Fn(&T) -> Result<Option<T>> + 'a;

/// A node in an immutable tree that can reflect over and rebuild its
/// children.
pub trait TreeNode: Clone + PartialEq {
    /// Direct children, in order. The returned values are shallow clones.
    fn children(&self) -> Vec<Self>;

    /// Rebuild this node, identical in kind and own parameters, with
    /// `children` in place of the current ones. Fails with
    /// [`QuarryError::TreeShapeMismatch`] when the count differs from the
    /// node's arity.
    fn with_new_children(&self, children: Vec<Self>) -> Result<Self>;

    /// Rebuild this node by mapping each direct child through `f`.
    fn map_children(&self, mut f: impl FnMut(Self) -> Result<Self>) -> Result<Self> {
        let children = self.children();
        if children.is_empty() {
            return Ok(self.clone());
        }
        let mut mapped = Vec::with_capacity(children.len());
        for child in children {
            mapped.push(f(child)?);
        }
        self.with_new_children(mapped)
    }

    /// Apply `rule` pre-order: the node itself first, then its (possibly
    /// replaced) children. Subtrees where no rule fired are shared, not
    /// rebuilt.
    fn transform_down(&self, rule: &TransformRule<Self>) -> Result<Self> {
        Ok(self.transform_down_tracked(rule)?.0)
    }

    /// Apply `rule` post-order: children first, then the node rebuilt from
    /// them.
    fn transform_up(&self, rule: &TransformRule<Self>) -> Result<Self> {
        Ok(self.transform_up_tracked(rule)?.0)
    }

    /// Pre-order transform returning whether any rule application fired.
    fn transform_down_tracked(&self, rule: &TransformRule<Self>) -> Result<(Self, bool)> {
        let (node, changed_here) = match rule(self)? {
            Some(replaced) => (replaced, true),
            None => (self.clone(), false),
        };
        let children = node.children();
        let mut changed_below = false;
        let mut new_children = Vec::with_capacity(children.len());
        for child in &children {
            let (new_child, changed) = child.transform_down_tracked(rule)?;
            changed_below |= changed;
            new_children.push(new_child);
        }
        let node = if changed_below {
            node.with_new_children(new_children)?
        } else {
            node
        };
        Ok((node, changed_here || changed_below))
    }

    /// Post-order transform returning whether any rule application fired.
    fn transform_up_tracked(&self, rule: &TransformRule<Self>) -> Result<(Self, bool)> {
        let children = self.children();
        let mut changed_below = false;
        let mut new_children = Vec::with_capacity(children.len());
        for child in &children {
            let (new_child, changed) = child.transform_up_tracked(rule)?;
            changed_below |= changed;
            new_children.push(new_child);
        }
        let node = if changed_below {
            self.with_new_children(new_children)?
        } else {
            self.clone()
        };
        match rule(&node)? {
            Some(replaced) => Ok((replaced, true)),
            None => Ok((node, changed_below)),
        }
    }

    /// Visit every node pre-order.
    fn foreach(&self, f: &mut dyn FnMut(&Self)) {
        f(self);
        for child in self.children() {
            child.foreach(f);
        }
    }

    /// Collect `pf(x)` pre-order for every node `x` where `pf` is defined.
    fn collect<T>(&self, pf: &dyn Fn(&Self) -> Option<T>) -> Vec<T> {
        let mut out = Vec::new();
        self.foreach(&mut |node| {
            if let Some(v) = pf(node) {
                out.push(v);
            }
        });
        out
    }

    /// Collect and flatten `f(x)` pre-order for every node `x`.
    fn flat_map<T>(&self, f: &dyn Fn(&Self) -> Vec<T>) -> Vec<T> {
        let mut out = Vec::new();
        self.foreach(&mut |node| out.extend(f(node)));
        out
    }

    /// Whether any node in the tree satisfies `pred`.
    fn exists(&self, pred: &dyn Fn(&Self) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().iter().any(|c| c.exists(pred))
    }

    /// Fold every node pre-order into an accumulator.
    fn fold<A>(&self, init: A, f: &mut dyn FnMut(A, &Self) -> A) -> A {
        let mut acc = f(init, self);
        for child in self.children() {
            acc = child.fold(acc, f);
        }
        acc
    }

    /// Total node count of the tree.
    fn node_count(&self) -> usize {
        self.fold(0usize, &mut |n, _| n + 1)
    }
}

/// Arity check helper for `with_new_children` implementations.
pub(crate) fn expect_arity(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(QuarryError::TreeShapeMismatch { expected, actual })
    }
}

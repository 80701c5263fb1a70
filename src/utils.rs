use std::sync::Arc;

/// Compare two trees for structural equality.
///
/// Unlike `PartialEq` on reference-counted handles, `tree_eq` always
/// compares contents, using pointer equality only as a shortcut.
pub trait TreeEq {
    fn tree_eq(&self, other: &Self) -> bool;
}

impl<T: TreeEq> TreeEq for Option<T> {
    fn tree_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.tree_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: TreeEq> TreeEq for Vec<T> {
    fn tree_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a.tree_eq(b))
    }
}

impl<T: TreeEq + ?Sized> TreeEq for Arc<T> {
    fn tree_eq(&self, other: &Self) -> bool {
        self.as_ref().tree_eq(other.as_ref())
    }
}

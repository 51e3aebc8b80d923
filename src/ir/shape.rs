// Symbolic Shape Tracking
//
// Track tensor dimensions symbolically to enable:
// - Type inference at Apply construction
// - Scan sequence/slice shape derivation
// - Replacement validation in the function graph

use std::fmt;

/// Symbolic dimension (can be concrete or symbolic)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Concrete dimension size
    Concrete(usize),
    /// Symbolic dimension (e.g., "t", "n")
    Symbolic(String),
}

impl Dim {
    pub fn is_concrete(&self) -> bool {
        matches!(self, Dim::Concrete(_))
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Dim::Symbolic(_))
    }

    /// Check if two dimensions are compatible (can be unified)
    pub fn compatible_with(&self, other: &Dim) -> bool {
        match (self, other) {
            (Dim::Concrete(a), Dim::Concrete(b)) => a == b,
            (Dim::Symbolic(a), Dim::Symbolic(b)) => a == b,
            _ => true, // Symbolic can unify with anything
        }
    }

    /// Pick the more informative of two compatible dimensions
    fn unify(&self, other: &Dim) -> Dim {
        if self.is_concrete() {
            self.clone()
        } else {
            other.clone()
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dim::Concrete(n) => write!(f, "{}", n),
            Dim::Symbolic(s) => write!(f, "{}", s),
        }
    }
}

/// Shape of a tensor of any rank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<Dim>,
}

impl Shape {
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    pub fn vector(size: usize) -> Self {
        Shape {
            dims: vec![Dim::Concrete(size)],
        }
    }

    pub fn matrix(nrows: usize, ncols: usize) -> Self {
        Shape {
            dims: vec![Dim::Concrete(nrows), Dim::Concrete(ncols)],
        }
    }

    /// Create a shape with concrete dimensions
    pub fn concrete(dims: &[usize]) -> Self {
        Shape {
            dims: dims.iter().map(|&d| Dim::Concrete(d)).collect(),
        }
    }

    /// Create a shape from arbitrary dimensions
    pub fn from_dims(dims: Vec<Dim>) -> Self {
        Shape { dims }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Check if shape is fully concrete
    pub fn is_concrete(&self) -> bool {
        self.dims.iter().all(Dim::is_concrete)
    }

    /// Concrete sizes, if every dimension is known
    pub fn to_concrete(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|d| match d {
                Dim::Concrete(n) => Some(*n),
                Dim::Symbolic(_) => None,
            })
            .collect()
    }

    /// Same rank and pairwise compatible dimensions
    pub fn compatible_with(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(&other.dims)
                .all(|(a, b)| a.compatible_with(b))
    }

    /// Infer the result shape of an elementwise operation (right-aligned broadcasting)
    pub fn broadcast(a: &Shape, b: &Shape) -> Option<Shape> {
        let rank = a.rank().max(b.rank());
        let one = Dim::Concrete(1);
        let mut dims = Vec::with_capacity(rank);
        for axis in 0..rank {
            let da = aligned(a, rank, axis).unwrap_or(&one);
            let db = aligned(b, rank, axis).unwrap_or(&one);
            let dim = if *da == one {
                db.clone()
            } else if *db == one {
                da.clone()
            } else if da.compatible_with(db) {
                da.unify(db)
            } else {
                return None;
            };
            dims.push(dim);
        }
        Some(Shape { dims })
    }

    /// Infer the result shape of `dot` on rank 1 and 2 operands
    pub fn dot(a: &Shape, b: &Shape) -> Option<Shape> {
        match (a.dims.as_slice(), b.dims.as_slice()) {
            ([k1], [k2]) if k1.compatible_with(k2) => Some(Shape::scalar()),
            ([m, k1], [k2]) if k1.compatible_with(k2) => Some(Shape {
                dims: vec![m.clone()],
            }),
            ([k1], [k2, n]) if k1.compatible_with(k2) => Some(Shape {
                dims: vec![n.clone()],
            }),
            ([m, k1], [k2, n]) if k1.compatible_with(k2) => Some(Shape {
                dims: vec![m.clone(), n.clone()],
            }),
            _ => None,
        }
    }

    /// Transpose shape; ranks 0 and 1 are unchanged
    pub fn transpose(&self) -> Option<Shape> {
        match self.dims.as_slice() {
            [] | [_] => Some(self.clone()),
            [m, n] => Some(Shape {
                dims: vec![n.clone(), m.clone()],
            }),
            _ => None,
        }
    }

    /// Add a new leading dimension
    pub fn prepend(&self, dim: Dim) -> Shape {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(dim);
        dims.extend(self.dims.iter().cloned());
        Shape { dims }
    }

    /// Split off the leading dimension
    pub fn split_leading(&self) -> Option<(Dim, Shape)> {
        let (first, rest) = self.dims.split_first()?;
        Some((
            first.clone(),
            Shape {
                dims: rest.to_vec(),
            },
        ))
    }

    /// Remove one axis (reductions)
    pub fn without_axis(&self, axis: usize) -> Option<Shape> {
        if axis >= self.rank() {
            return None;
        }
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Some(Shape { dims })
    }
}

fn aligned(shape: &Shape, rank: usize, axis: usize) -> Option<&Dim> {
    let offset = rank - shape.rank();
    if axis < offset {
        None
    } else {
        shape.dims.get(axis - offset)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concrete_shapes() {
        let s = Shape::scalar();
        assert!(s.is_concrete());
        assert_eq!(s.rank(), 0);

        let m = Shape::matrix(10, 20);
        assert!(m.is_concrete());
        assert_eq!(m.rank(), 2);
        assert_eq!(m.to_concrete(), Some(vec![10, 20]));
    }

    #[test]
    fn test_symbolic_compatibility() {
        let t = Shape::from_dims(vec![Dim::Symbolic("t".into()), Dim::Concrete(4)]);
        assert!(!t.is_concrete());
        assert!(t.compatible_with(&Shape::matrix(3, 4)));
        assert!(!t.compatible_with(&Shape::matrix(3, 5)));
        assert!(!t.compatible_with(&Shape::vector(4)));
    }

    #[test]
    fn test_dot_inference() {
        let a = Shape::matrix(10, 20);
        let b = Shape::matrix(20, 30);
        assert_eq!(Shape::dot(&a, &b), Some(Shape::matrix(10, 30)));
        assert_eq!(Shape::dot(&Shape::vector(20), &b), Some(Shape::vector(30)));
        assert_eq!(Shape::dot(&a, &Shape::vector(20)), Some(Shape::vector(10)));
        assert_eq!(
            Shape::dot(&Shape::vector(4), &Shape::vector(4)),
            Some(Shape::scalar())
        );
        assert!(Shape::dot(&a, &Shape::matrix(10, 15)).is_none());
    }

    #[test]
    fn test_broadcast_inference() {
        let a = Shape::matrix(3, 5);
        assert_eq!(Shape::broadcast(&a, &Shape::vector(5)), Some(a.clone()));
        assert_eq!(Shape::broadcast(&Shape::scalar(), &a), Some(a.clone()));
        assert_eq!(Shape::broadcast(&a, &Shape::matrix(1, 5)), Some(a.clone()));
        assert!(Shape::broadcast(&a, &Shape::vector(4)).is_none());

        let sym = Shape::from_dims(vec![Dim::Symbolic("n".into())]);
        assert_eq!(
            Shape::broadcast(&sym, &Shape::vector(7)),
            Some(Shape::vector(7))
        );
    }

    #[test]
    fn test_leading_axis() {
        let v = Shape::vector(4);
        let seq = v.prepend(Dim::Concrete(3));
        assert_eq!(seq, Shape::matrix(3, 4));
        let (lead, rest) = seq.split_leading().unwrap();
        assert_eq!(lead, Dim::Concrete(3));
        assert_eq!(rest, v);
        assert!(Shape::scalar().split_leading().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::matrix(3, 4).to_string(), "(3, 4)");
        assert_eq!(Shape::vector(3).to_string(), "(3,)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }
}

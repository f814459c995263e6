use smallvec::SmallVec;
use std::fmt;

/// Concrete tensor shape.
///
/// Attention inputs are at most rank 5 (the merged `past` state), so dims are
/// kept inline for up to five axes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 5]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A rank-0 shape holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of `axis`, or `None` when the axis is out of range.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Row-major strides.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 5]> {
        let ndim = self.dims.len();
        let mut strides = SmallVec::from_elem(1usize, ndim);
        for i in (0..ndim.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dims(f, self.dims.iter())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

macro_rules! impl_shape_from_array {
    ($($n:expr),*) => {
        $(
            impl From<[usize; $n]> for Shape {
                fn from(dims: [usize; $n]) -> Self {
                    Shape::new(&dims)
                }
            }
        )*
    };
}

impl_shape_from_array!(1, 2, 3, 4, 5);

/// One axis of a shape declared by a graph: either a fixed size or a named
/// symbol resolved only at run time (e.g. `batch_size`, `past_seq_len`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(i64),
    Symbolic(String),
}

impl Dim {
    /// The static value, if the axis has one.
    pub fn value(&self) -> Option<i64> {
        match self {
            Dim::Fixed(v) => Some(*v),
            Dim::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(v) => write!(f, "{v}"),
            Dim::Symbolic(name) => write!(f, "{name}"),
        }
    }
}

impl From<i64> for Dim {
    fn from(v: i64) -> Self {
        Dim::Fixed(v)
    }
}

impl From<&str> for Dim {
    fn from(name: &str) -> Self {
        Dim::Symbolic(name.to_string())
    }
}

/// Shape as declared on a graph input or output, possibly with symbolic axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolicShape {
    dims: SmallVec<[Dim; 5]>,
}

impl SymbolicShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self {
            dims: SmallVec::from_vec(dims),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Static size of `axis`; `None` when out of range or symbolic.
    pub fn fixed(&self, axis: usize) -> Option<i64> {
        self.dims.get(axis).and_then(Dim::value)
    }

    /// Whether every axis has a static size.
    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| d.value().is_some())
    }
}

impl fmt::Display for SymbolicShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dims(f, self.dims.iter())
    }
}

impl From<&Shape> for SymbolicShape {
    fn from(shape: &Shape) -> Self {
        SymbolicShape {
            dims: shape.dims().iter().map(|&d| Dim::Fixed(d as i64)).collect(),
        }
    }
}

fn write_dims<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    dims: impl Iterator<Item = T>,
) -> fmt::Result {
    write!(f, "[")?;
    for (i, d) in dims.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{d}")?;
    }
    write!(f, "]")
}

/// Build a [`SymbolicShape`] from a mix of fixed sizes and symbol names.
///
/// ```
/// use kore_core::sym_shape;
/// let past = sym_shape![2, "batch_size", 12, "past_seq_len", 64];
/// assert_eq!(past.fixed(2), Some(12));
/// assert_eq!(past.fixed(3), None);
/// ```
#[macro_export]
macro_rules! sym_shape {
    ($($d:expr),* $(,)?) => {
        $crate::SymbolicShape::new(vec![$($crate::Dim::from($d)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(&[2, 4, 16]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 128);
        assert_eq!(s.dim(2), Some(16));
        assert_eq!(s.dim(3), None);
        assert_eq!(s.contiguous_strides().as_slice(), &[64, 16, 1]);
    }

    #[test]
    fn test_rank5_past_shape() {
        let s: Shape = [2, 1, 12, 7, 64].into();
        assert_eq!(s.ndim(), 5);
        assert_eq!(s.numel(), 2 * 12 * 7 * 64);
        assert_eq!(format!("{s}"), "[2, 1, 12, 7, 64]");
    }

    #[test]
    fn test_symbolic_shape() {
        let s = SymbolicShape::new(vec![Dim::from("batch"), Dim::from(12), Dim::from("seq"), Dim::from(64)]);
        assert_eq!(s.ndim(), 4);
        assert_eq!(s.fixed(1), Some(12));
        assert_eq!(s.fixed(0), None);
        assert_eq!(s.fixed(9), None);
        assert!(!s.is_static());
        assert_eq!(format!("{s}"), "[batch, 12, seq, 64]");
    }

    #[test]
    fn test_symbolic_from_concrete() {
        let s = SymbolicShape::from(&Shape::new(&[1, 3, 50257]));
        assert!(s.is_static());
        assert_eq!(s.fixed(2), Some(50257));
    }

    #[test]
    fn test_sym_shape_macro() {
        let s = sym_shape!["batch", "seq", 50257];
        assert_eq!(s.dims()[0], Dim::Symbolic("batch".into()));
        assert_eq!(s.fixed(2), Some(50257));
    }
}

//! Sample layout of dense tensors

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of a single dense sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    /// Dimensions, outermost first
    dims: Vec<usize>,
}

impl TensorShape {
    /// Create a shape from its dimensions
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Create a rank-1 shape holding `len` elements
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Get the number of dimensions
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Get the total number of elements
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Check if the shape holds no elements
    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_shape() {
        let shape = TensorShape::vector(4);
        assert_eq!(shape.rank(), 1);
        assert_eq!(shape.num_elements(), 4);
        assert_eq!(shape.to_string(), "[4]");
    }

    #[test]
    fn test_matrix_shape() {
        let shape = TensorShape::new(vec![2, 3]);
        assert_eq!(shape.num_elements(), 6);
        assert_eq!(shape.to_string(), "[2 x 3]");
        assert!(!shape.is_empty());
        assert!(TensorShape::new(vec![2, 0]).is_empty());
    }
}

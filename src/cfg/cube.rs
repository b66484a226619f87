//! Cube representation for cfg conditions
//!
//! A cube is one product term of a disjunctive normal form: every mapped
//! condition variable is either required false, required true, or free.

use std::fmt;

/// Value of a single variable in a cube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeValue {
    /// Variable must be false (complemented)
    Zero,
    /// Variable must be true (uncomplemented)
    One,
    /// Variable can be either (don't care)
    DontCare,
}

impl CubeValue {
    pub fn to_char(self) -> char {
        match self {
            CubeValue::Zero => '0',
            CubeValue::One => '1',
            CubeValue::DontCare => '-',
        }
    }

    /// Check if this value is a literal (not don't care)
    pub fn is_literal(self) -> bool {
        matches!(self, CubeValue::Zero | CubeValue::One)
    }

    /// Intersection of two values; `None` if they contradict
    pub fn intersect(self, other: Self) -> Option<Self> {
        match (self, other) {
            (CubeValue::Zero, CubeValue::One) | (CubeValue::One, CubeValue::Zero) => None,
            (CubeValue::DontCare, x) | (x, CubeValue::DontCare) => Some(x),
            (x, _) => Some(x),
        }
    }
}

/// A product term over `len()` variables
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cube {
    values: Vec<CubeValue>,
}

impl Cube {
    /// The universal cube (no constraints)
    pub fn new(num_vars: usize) -> Self {
        Cube {
            values: vec![CubeValue::DontCare; num_vars],
        }
    }

    /// A cube constraining a single variable
    pub fn literal(num_vars: usize, var: usize, positive: bool) -> Self {
        let mut cube = Cube::new(num_vars);
        cube.values[var] = if positive {
            CubeValue::One
        } else {
            CubeValue::Zero
        };
        cube
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, var: usize) -> CubeValue {
        self.values[var]
    }

    pub fn values(&self) -> &[CubeValue] {
        &self.values
    }

    /// Grow to `num_vars` variables; new variables are free
    pub fn widen(&mut self, num_vars: usize) {
        if self.values.len() < num_vars {
            self.values.resize(num_vars, CubeValue::DontCare);
        }
    }

    /// Count the number of literals (non-don't-care values)
    pub fn literal_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_literal()).count()
    }

    /// `(var, positive)` for each constrained variable
    pub fn literals(&self) -> impl Iterator<Item = (usize, bool)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_literal())
            .map(|(i, v)| (i, *v == CubeValue::One))
    }

    /// Check if this cube is a tautology (all don't cares)
    pub fn is_tautology(&self) -> bool {
        self.values.iter().all(|v| *v == CubeValue::DontCare)
    }

    /// Position of the single complementary difference, if any
    pub fn can_merge(&self, other: &Cube) -> Option<usize> {
        let mut diff_pos = None;
        for i in 0..self.values.len() {
            if self.values[i] != other.values[i] {
                let complementary = matches!(
                    (self.values[i], other.values[i]),
                    (CubeValue::Zero, CubeValue::One) | (CubeValue::One, CubeValue::Zero)
                );
                if !complementary || diff_pos.is_some() {
                    return None;
                }
                diff_pos = Some(i);
            }
        }
        diff_pos
    }

    /// Merge two cubes that differ in exactly one variable
    pub fn merge(&self, diff_pos: usize) -> Cube {
        let mut result = self.clone();
        result.values[diff_pos] = CubeValue::DontCare;
        result
    }

    /// Conjunction of two cubes; `None` if they are disjoint
    pub fn intersect(&self, other: &Cube) -> Option<Cube> {
        let mut result = self.clone();
        for i in 0..self.values.len().min(other.values.len()) {
            result.values[i] = self.values[i].intersect(other.values[i])?;
        }
        Some(result)
    }

    /// Check if this cube contains (covers) another cube
    pub fn contains(&self, other: &Cube) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(mine, theirs)| match mine {
                CubeValue::DontCare => true,
                literal => literal == theirs,
            })
    }

    /// Cofactor with respect to a variable; `None` if the cube vanishes
    pub fn cofactor(&self, var: usize, positive: bool) -> Option<Cube> {
        match (self.values[var], positive) {
            (CubeValue::Zero, true) | (CubeValue::One, false) => None,
            _ => {
                let mut result = self.clone();
                result.values[var] = CubeValue::DontCare;
                Some(result)
            }
        }
    }
}

impl fmt::Display for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.values {
            write!(f, "{}", v.to_char())?;
        }
        Ok(())
    }
}

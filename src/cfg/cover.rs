//! Cover representation - a disjunction of cubes
//!
//! A cover is the OR of its cubes. Predicates are converted into covers
//! over a table of condition variables, minimized, and then projected onto
//! `select()` keys.

use super::cube::{Cube, CubeValue};
use super::predicate::{Atom, Predicate};
use std::fmt;

/// Condition variables in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    names: Vec<String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, registering it if unseen
    pub fn intern(&mut self, name: &str) -> usize {
        match self.names.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        }
    }

    pub fn name(&self, var: usize) -> &str {
        &self.names[var]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A cover is a collection of cubes representing a boolean function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    cubes: Vec<Cube>,
    num_vars: usize,
}

impl Cover {
    /// The empty cover (constant false)
    pub fn new(num_vars: usize) -> Self {
        Cover {
            cubes: Vec::new(),
            num_vars,
        }
    }

    /// The universal cover (constant true)
    pub fn universe(num_vars: usize) -> Self {
        Cover {
            cubes: vec![Cube::new(num_vars)],
            num_vars,
        }
    }

    /// Convert a predicate into a cover, interning atom names
    pub fn from_predicate(pred: &Predicate, vars: &mut Variables) -> Cover {
        let nnf = pred.to_nnf();
        // register every variable first so all cubes share one width
        for atom in nnf.atoms() {
            vars.intern(&atom_name(atom));
        }
        let mut cover = Self::build(&nnf, vars);
        cover.widen(vars.len());
        cover
    }

    fn build(pred: &Predicate, vars: &mut Variables) -> Cover {
        let n = vars.len();
        match pred {
            Predicate::True => Cover::universe(n),
            Predicate::False => Cover::new(n),
            Predicate::Atom(atom) => {
                let var = vars.intern(&atom_name(atom));
                Cover::from_cubes(vec![Cube::literal(n, var, true)], n)
            }
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::Atom(atom) => {
                    let var = vars.intern(&atom_name(atom));
                    Cover::from_cubes(vec![Cube::literal(n, var, false)], n)
                }
                // to_nnf leaves negation only on atoms
                other => Self::build(&other.clone().negate().to_nnf(), vars),
            },
            Predicate::Any(parts) => {
                let mut cover = Cover::new(n);
                for p in parts {
                    cover = cover.or(&Self::build(p, vars));
                }
                cover
            }
            Predicate::All(parts) => {
                let mut cover = Cover::universe(n);
                for p in parts {
                    cover = cover.and(&Self::build(p, vars));
                }
                cover
            }
        }
    }

    /// Create a cover from a vector of cubes
    pub fn from_cubes(cubes: Vec<Cube>, num_vars: usize) -> Self {
        Cover { cubes, num_vars }
    }

    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// An empty cover is unsatisfiable
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    fn widen(&mut self, num_vars: usize) {
        self.num_vars = self.num_vars.max(num_vars);
        for cube in &mut self.cubes {
            cube.widen(self.num_vars);
        }
    }

    /// Disjunction
    pub fn or(&self, other: &Cover) -> Cover {
        let mut result = self.clone();
        result.widen(other.num_vars);
        for cube in &other.cubes {
            let mut cube = cube.clone();
            cube.widen(result.num_vars);
            if !result.contains_cube(&cube) {
                result.cubes.push(cube);
            }
        }
        result
    }

    /// Conjunction by distributing cube intersections
    pub fn and(&self, other: &Cover) -> Cover {
        let num_vars = self.num_vars.max(other.num_vars);
        let mut result = Cover::new(num_vars);
        for c1 in &self.cubes {
            for c2 in &other.cubes {
                let (mut a, mut b) = (c1.clone(), c2.clone());
                a.widen(num_vars);
                b.widen(num_vars);
                if let Some(inter) = a.intersect(&b) {
                    result.cubes.push(inter);
                }
            }
        }
        result.remove_redundant();
        result
    }

    /// Check if this cover contains (covers) a cube
    pub fn contains_cube(&self, cube: &Cube) -> bool {
        self.cubes.iter().any(|c| c.contains(cube))
    }

    /// Remove cubes that are covered by other cubes
    pub fn remove_redundant(&mut self) {
        self.cubes.sort();
        self.cubes.dedup();
        let mut i = 0;
        while i < self.cubes.len() {
            let is_redundant = (0..self.cubes.len())
                .any(|j| i != j && self.cubes[j].contains(&self.cubes[i]));
            if is_redundant {
                self.cubes.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Perform distance-1 merge on the cover until nothing changes
    pub fn distance_1_merge(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            while i < self.cubes.len() {
                let mut merged = false;
                for j in (i + 1)..self.cubes.len() {
                    if let Some(pos) = self.cubes[i].can_merge(&self.cubes[j]) {
                        self.cubes[i] = self.cubes[i].merge(pos);
                        self.cubes.remove(j);
                        merged = true;
                        changed = true;
                        break;
                    }
                }
                if !merged {
                    i += 1;
                }
            }
            self.remove_redundant();
        }
    }

    /// Reduce to a small irredundant sum of products. A tautology collapses
    /// to the universal cube.
    pub fn minimize(&mut self) {
        if self.cubes.is_empty() {
            return;
        }
        if self.is_tautology() {
            self.cubes = vec![Cube::new(self.num_vars)];
            return;
        }
        self.distance_1_merge();
        self.irredundant();
        self.cubes.sort_by(|a, b| a.literal_count().cmp(&b.literal_count()).then(a.cmp(b)));
    }

    /// Drop any cube covered by the union of the others
    fn irredundant(&mut self) {
        let mut i = 0;
        while i < self.cubes.len() {
            let cube = self.cubes[i].clone();
            let rest = Cover::from_cubes(
                self.cubes
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, c)| c.clone())
                    .collect(),
                self.num_vars,
            );
            if rest.covers(&cube) {
                self.cubes.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Check whether the cover implies `cube` everywhere inside it
    pub fn covers(&self, cube: &Cube) -> bool {
        // restrict every cube to `cube` and check the result is a tautology
        let mut restricted = Cover::new(self.num_vars);
        for c in &self.cubes {
            if let Some(mut r) = c.intersect(cube) {
                for (var, _) in cube.literals() {
                    r = match r.cofactor(var, cube.value(var) == CubeValue::One) {
                        Some(r) => r,
                        None => continue,
                    };
                }
                restricted.cubes.push(r);
            }
        }
        restricted.is_tautology()
    }

    /// Check if the cover is a tautology (covers all minterms)
    pub fn is_tautology(&self) -> bool {
        if self.cubes.iter().any(|c| c.is_tautology()) {
            return true;
        }
        if self.cubes.is_empty() || self.is_unate() {
            // unate covers without a universal cube are never tautologies
            return false;
        }

        let split_var = self.find_splitting_variable();
        self.cofactor(split_var, true).is_tautology()
            && self.cofactor(split_var, false).is_tautology()
    }

    /// Check if the cover is unate (monotone in each variable)
    pub fn is_unate(&self) -> bool {
        (0..self.num_vars).all(|var| {
            let has_pos = self.cubes.iter().any(|c| c.value(var) == CubeValue::One);
            let has_neg = self.cubes.iter().any(|c| c.value(var) == CubeValue::Zero);
            !(has_pos && has_neg)
        })
    }

    /// Most binate variable
    fn find_splitting_variable(&self) -> usize {
        let mut best_var = 0;
        let mut best_score = None;
        for var in 0..self.num_vars {
            let pos = self
                .cubes
                .iter()
                .filter(|c| c.value(var) == CubeValue::One)
                .count();
            let neg = self
                .cubes
                .iter()
                .filter(|c| c.value(var) == CubeValue::Zero)
                .count();
            if pos == 0 && neg == 0 {
                continue;
            }
            let score = (pos.min(neg), pos + neg);
            if best_score.is_none_or(|best| score > best) {
                best_score = Some(score);
                best_var = var;
            }
        }
        best_var
    }

    /// Compute cofactor with respect to a variable
    pub fn cofactor(&self, var: usize, positive: bool) -> Cover {
        Cover::from_cubes(
            self.cubes
                .iter()
                .filter_map(|c| c.cofactor(var, positive))
                .collect(),
            self.num_vars,
        )
    }
}

fn atom_name(atom: &Atom) -> String {
    match atom {
        Atom::Flag(name) => name.clone(),
        Atom::KeyValue { .. } => atom.mapping_key(),
    }
}

impl fmt::Display for Cover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cube in &self.cubes {
            writeln!(f, "{}", cube)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimized(text: &str) -> (Cover, Variables) {
        let mut vars = Variables::new();
        let mut cover = Cover::from_predicate(&Predicate::parse(text).unwrap(), &mut vars);
        cover.minimize();
        (cover, vars)
    }

    #[test]
    fn test_excluded_middle_is_tautology() {
        let (cover, _) = minimized("any(unix, not(unix))");
        assert_eq!(cover.len(), 1);
        assert!(cover.cubes()[0].is_tautology());
    }

    #[test]
    fn test_contradiction_is_empty() {
        let (cover, _) = minimized("all(unix, not(unix))");
        assert!(cover.is_empty());
    }

    #[test]
    fn test_absorption() {
        let (cover, vars) = minimized("any(a, all(a, b))");
        assert_eq!(cover.to_string(), "1-\n");
        assert_eq!(vars.name(0), "a");
    }

    #[test]
    fn test_distance_one_merge() {
        let (cover, _) = minimized("any(all(a, b), all(a, not(b)))");
        assert_eq!(cover.to_string(), "1-\n");
    }

    #[test]
    fn test_consensus_redundancy() {
        // ab + a'c + bc == ab + a'c
        let (cover, _) = minimized("any(all(a, b), all(not(a), c), all(b, c))");
        assert_eq!(cover.len(), 2);
    }

    #[test]
    fn test_three_variable_tautology() {
        let (cover, _) = minimized("any(a, all(not(a), b), all(not(a), not(b)))");
        assert!(cover.cubes()[0].is_tautology());
    }
}

//! Solver-independent 0/1 linear program.
//!
//! The MILP selector builds a `BinaryProgram` and hands it to whichever
//! `MilpSolver` backend it was constructed with. Keeping the formulation here means
//! the AND-linearisation can be checked exhaustively without a solver in the loop.

/// Handle to a binary variable of one `BinaryProgram`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryVar(usize);

impl BinaryVar {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub terms: Vec<(BinaryVar, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

const FEASIBILITY_EPS: f64 = 1e-6;

impl LinearConstraint {
    pub fn lhs(&self, assignment: &[bool]) -> f64 {
        self.terms
            .iter()
            .filter(|(var, _)| assignment.get(var.0).copied().unwrap_or(false))
            .map(|(_, coeff)| coeff)
            .sum()
    }

    pub fn is_satisfied(&self, assignment: &[bool]) -> bool {
        let lhs = self.lhs(assignment);
        match self.relation {
            Relation::Le => lhs <= self.rhs + FEASIBILITY_EPS,
            Relation::Ge => lhs >= self.rhs - FEASIBILITY_EPS,
            Relation::Eq => (lhs - self.rhs).abs() <= FEASIBILITY_EPS,
        }
    }
}

/// Maximisation problem over binary variables.
#[derive(Debug, Clone, Default)]
pub struct BinaryProgram {
    names: Vec<String>,
    objective: Vec<f64>,
    constraints: Vec<LinearConstraint>,
}

impl BinaryProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, objective_coeff: f64) -> BinaryVar {
        self.names.push(name.into());
        self.objective.push(objective_coeff);
        BinaryVar(self.names.len() - 1)
    }

    pub fn add_constraint(&mut self, terms: Vec<(BinaryVar, f64)>, relation: Relation, rhs: f64) {
        self.constraints.push(LinearConstraint {
            terms,
            relation,
            rhs,
        });
    }

    /// Pins `var` to `value`.
    pub fn fix(&mut self, var: BinaryVar, value: bool) {
        self.add_constraint(vec![(var, 1.0)], Relation::Eq, if value { 1.0 } else { 0.0 });
    }

    /// Adds `z = a ∧ b` via `z ≤ a`, `z ≤ b`, `z ≥ a + b − 1` and returns `z`.
    pub fn and_product(
        &mut self,
        a: BinaryVar,
        b: BinaryVar,
        name: impl Into<String>,
        objective_coeff: f64,
    ) -> BinaryVar {
        let z = self.add_var(name, objective_coeff);
        self.add_constraint(vec![(z, 1.0), (a, -1.0)], Relation::Le, 0.0);
        self.add_constraint(vec![(z, 1.0), (b, -1.0)], Relation::Le, 0.0);
        self.add_constraint(vec![(z, 1.0), (a, -1.0), (b, -1.0)], Relation::Ge, -1.0);
        z
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    #[cfg(test)]
    pub fn name(&self, var: BinaryVar) -> &str {
        &self.names[var.0]
    }

    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    #[cfg(test)]
    pub fn objective_value(&self, assignment: &[bool]) -> f64 {
        self.objective
            .iter()
            .zip(assignment)
            .filter(|(_, on)| **on)
            .map(|(c, _)| c)
            .sum()
    }

    pub fn is_feasible(&self, assignment: &[bool]) -> bool {
        assignment.len() == self.num_vars()
            && self.constraints.iter().all(|c| c.is_satisfied(assignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_product_truth_table() {
        let mut program = BinaryProgram::new();
        let a = program.add_var("a", 0.0);
        let b = program.add_var("b", 0.0);
        let z = program.and_product(a, b, "a_and_b", 0.0);
        assert_eq!(program.constraints().len(), 3);

        for bits in 0..8u8 {
            let (va, vb, vz) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let mut assignment = vec![false; program.num_vars()];
            assignment[a.index()] = va;
            assignment[b.index()] = vb;
            assignment[z.index()] = vz;
            assert_eq!(
                program.is_feasible(&assignment),
                vz == (va && vb),
                "a={va} b={vb} z={vz}"
            );
        }
    }

    #[test]
    fn test_objective_value_sums_selected_coefficients() {
        let mut program = BinaryProgram::new();
        program.add_var("x0", 1.5);
        program.add_var("x1", -0.5);
        program.add_var("x2", 2.0);
        assert_eq!(program.objective_value(&[true, true, false]), 1.0);
        assert_eq!(program.objective_value(&[false, false, true]), 2.0);
    }

    #[test]
    fn test_cardinality_and_fix() {
        let mut program = BinaryProgram::new();
        let xs: Vec<_> = (0..3).map(|i| program.add_var(format!("x{i}"), 1.0)).collect();
        program.add_constraint(xs.iter().map(|&x| (x, 1.0)).collect(), Relation::Eq, 2.0);
        program.fix(xs[0], true);

        assert!(program.is_feasible(&[true, true, false]));
        assert!(!program.is_feasible(&[false, true, true]));
        assert!(!program.is_feasible(&[true, true, true]));
        assert!(!program.is_feasible(&[true, true]));
        assert_eq!(program.name(xs[2]), "x2");
    }
}

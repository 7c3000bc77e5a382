//! The client's view of the robot's joints.
//!
//! Trajectory conversion needs DOF index → joint name lookups, padding needs
//! current joint values and the joint-state client writes incoming positions
//! back. [`RobotModel`] covers exactly that; [`JointTable`] is the in-memory
//! implementation used by the CLI and the tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Joint-level access to a robot.
pub trait RobotModel: Send + Sync {
    /// Name of the joint driven by `dof`.
    fn joint_name(&self, dof: usize) -> Option<String>;

    /// DOF index of the joint called `name`.
    fn dof_index(&self, name: &str) -> Option<usize>;

    /// Current value of the joint called `name`.
    fn joint_value(&self, name: &str) -> Option<f64>;

    /// Write `values[i]` to `dofs[i]`. Unknown DOFs are skipped.
    fn set_dof_values(&self, dofs: &[usize], values: &[f64]);
}

/// A fixed list of joints, DOF `i` being the `i`-th name.
#[derive(Debug)]
pub struct JointTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
    values: RwLock<Vec<f64>>,
}

impl JointTable {
    /// All joints start at 0.0.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::with_values(names.into_iter().map(|n| (n, 0.0)))
    }

    pub fn with_values<S: Into<String>>(joints: impl IntoIterator<Item = (S, f64)>) -> Self {
        let (names, values): (Vec<String>, Vec<f64>) =
            joints.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        let index = names
            .iter()
            .enumerate()
            .map(|(dof, name)| (name.clone(), dof))
            .collect();
        Self {
            names,
            index,
            values: RwLock::new(values),
        }
    }

    pub fn joint_names(&self) -> &[String] {
        &self.names
    }

    pub fn dof_count(&self) -> usize {
        self.names.len()
    }

    /// Snapshot of every joint value, in DOF order.
    pub fn dof_values(&self) -> Vec<f64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RobotModel for JointTable {
    fn joint_name(&self, dof: usize) -> Option<String> {
        self.names.get(dof).cloned()
    }

    fn dof_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn joint_value(&self, name: &str) -> Option<f64> {
        let dof = self.dof_index(name)?;
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dof)
            .copied()
    }

    fn set_dof_values(&self, dofs: &[usize], values: &[f64]) {
        let mut current = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (&dof, &value) in dofs.iter().zip(values) {
            if let Some(slot) = current.get_mut(dof) {
                *slot = value;
            }
        }
    }
}

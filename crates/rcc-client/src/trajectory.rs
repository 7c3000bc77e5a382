//! Conversion of dense, robot-side trajectories into wire trajectories.
//!
//! A [`DenseTrajectory`] is sampled arbitrarily (often far denser than a
//! controller accepts) and indexed by DOF. [`to_wire_trajectory`] keeps a
//! subset of its DOFs, integrates the per-sample delta times and drops
//! samples that land closer than a tolerance to the previously *kept* sample.
//! [`pad_trajectory`] then fills in joints a controller requires but the
//! trajectory does not move, holding them at their current value.

use std::time::Duration;

use rcc_types::{ControlError, JointTrajectory, JointTrajectoryPoint};
use thiserror::Error;
use tracing::warn;

use crate::robot::RobotModel;

/// Minimum spacing between two waypoints, in seconds.
pub const DEFAULT_TIME_TOLERANCE: f64 = 0.01;

/// One sample of a [`DenseTrajectory`]. Value vectors are parallel to the
/// trajectory's DOF list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseSample {
    /// Seconds since the previous sample.
    pub delta_time: Option<f64>,
    pub positions: Option<Vec<f64>>,
    pub velocities: Option<Vec<f64>>,
    pub accelerations: Option<Vec<f64>>,
}

impl DenseSample {
    pub fn timed(delta_time: f64, positions: Vec<f64>) -> Self {
        Self {
            delta_time: Some(delta_time),
            positions: Some(positions),
            ..Self::default()
        }
    }

    pub fn with_velocities(mut self, velocities: Vec<f64>) -> Self {
        self.velocities = Some(velocities);
        self
    }

    pub fn with_accelerations(mut self, accelerations: Vec<f64>) -> Self {
        self.accelerations = Some(accelerations);
        self
    }
}

/// A trajectory as produced by a planner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseTrajectory {
    pub dof_indices: Vec<usize>,
    pub samples: Vec<DenseSample>,
    /// Total duration reported by the producer, in seconds.
    pub duration: f64,
}

impl DenseTrajectory {
    pub fn new(dof_indices: Vec<usize>) -> Self {
        Self {
            dof_indices,
            ..Self::default()
        }
    }

    /// Append a sample and grow the reported duration by its delta time.
    pub fn push(&mut self, sample: DenseSample) {
        self.duration += sample.delta_time.unwrap_or_default();
        self.samples.push(sample);
    }
}

/// Why a trajectory could not be converted or padded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    #[error("time tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),

    #[error("DOF {0} is not part of the robot model")]
    UnknownDof(usize),

    #[error("joint {0:?} is not part of the robot model")]
    UnknownJoint(String),

    #[error("trajectory is not timed (sample {0} has no delta time)")]
    NotTimed(usize),

    #[error("sample {index} has invalid delta time {delta}")]
    InvalidDeltaTime { index: usize, delta: f64 },

    #[error("trajectory does not contain joint values (sample {0})")]
    MissingPositions(usize),

    #[error("trajectory contains accelerations but not velocities (sample {0})")]
    AccelerationWithoutVelocities(usize),

    #[error("sample {index} has {found} {kind} values, expected {expected}")]
    DimensionMismatch {
        index: usize,
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("integrated duration {integrated:.4}s differs from reported {reported:.4}s")]
    DurationMismatch { integrated: f64, reported: f64 },
}

impl From<TrajectoryError> for ControlError {
    fn from(err: TrajectoryError) -> Self {
        ControlError::MalformedTrajectory(err.to_string())
    }
}

/// Convert `source` into a wire trajectory.
///
/// Only DOFs listed in `allow_list` (all of them when `None`) are kept, in
/// the order the source lists them. The first sample is always kept; every
/// other sample is dropped when it lies less than `time_tolerance` seconds
/// after the last kept one. Velocities and accelerations are emitted only if
/// every sample carries them.
pub fn to_wire_trajectory(
    robot: &dyn RobotModel,
    source: &DenseTrajectory,
    allow_list: Option<&[usize]>,
    time_tolerance: f64,
) -> Result<JointTrajectory, TrajectoryError> {
    if !time_tolerance.is_finite() || time_tolerance < 0.0 {
        return Err(TrajectoryError::InvalidTolerance(time_tolerance));
    }

    let columns: Vec<usize> = source
        .dof_indices
        .iter()
        .enumerate()
        .filter(|&(_, dof)| allow_list.is_none_or(|allowed| allowed.contains(dof)))
        .map(|(column, _)| column)
        .collect();
    let joint_names = columns
        .iter()
        .map(|&column| {
            let dof = source.dof_indices[column];
            robot.joint_name(dof).ok_or(TrajectoryError::UnknownDof(dof))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let width = source.dof_indices.len();
    for (index, sample) in source.samples.iter().enumerate() {
        validate_sample(index, sample, width)?;
    }
    let all_velocities = source.samples.iter().all(|s| s.velocities.is_some());
    let all_accelerations = source.samples.iter().all(|s| s.accelerations.is_some());

    let pick = |values: Option<&Vec<f64>>, emit: bool| -> Vec<f64> {
        match values {
            Some(values) if emit => columns.iter().map(|&c| values[c]).collect(),
            _ => Vec::new(),
        }
    };

    let mut trajectory = JointTrajectory::with_joints(joint_names);
    let mut elapsed = 0.0;
    let mut last_kept = 0.0;
    for (index, sample) in source.samples.iter().enumerate() {
        let delta = sample.delta_time.unwrap_or_default();
        elapsed += delta;

        // Compare against the last kept sample, not the raw delta, so that
        // densely sampled trajectories still thin out.
        let gap = elapsed - last_kept;
        if index > 0 && gap < time_tolerance {
            warn!(
                sample = index,
                gap,
                tolerance = time_tolerance,
                "skipping waypoint too close to the previous one"
            );
            continue;
        }
        last_kept = elapsed;

        let time_from_start = Duration::try_from_secs_f64(elapsed)
            .map_err(|_| TrajectoryError::InvalidDeltaTime { index, delta })?;
        trajectory.points.push(JointTrajectoryPoint {
            positions: pick(sample.positions.as_ref(), true),
            velocities: pick(sample.velocities.as_ref(), all_velocities),
            accelerations: pick(sample.accelerations.as_ref(), all_accelerations),
            effort: Vec::new(),
            time_from_start,
        });
    }

    if (elapsed - source.duration).abs() > time_tolerance {
        return Err(TrajectoryError::DurationMismatch {
            integrated: elapsed,
            reported: source.duration,
        });
    }
    Ok(trajectory)
}

fn validate_sample(index: usize, sample: &DenseSample, width: usize) -> Result<(), TrajectoryError> {
    let delta = sample.delta_time.ok_or(TrajectoryError::NotTimed(index))?;
    if !delta.is_finite() || delta < 0.0 {
        return Err(TrajectoryError::InvalidDeltaTime { index, delta });
    }
    let positions = sample
        .positions
        .as_ref()
        .ok_or(TrajectoryError::MissingPositions(index))?;
    if sample.accelerations.is_some() && sample.velocities.is_none() {
        return Err(TrajectoryError::AccelerationWithoutVelocities(index));
    }

    let kinds = [
        ("position", Some(positions)),
        ("velocity", sample.velocities.as_ref()),
        ("acceleration", sample.accelerations.as_ref()),
    ];
    for (kind, values) in kinds {
        match values {
            Some(values) if values.len() != width => {
                return Err(TrajectoryError::DimensionMismatch {
                    index,
                    kind,
                    expected: width,
                    found: values.len(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Extend `trajectory` to cover every joint in `required`.
///
/// Missing joints are appended in the order `required` lists them. Each
/// waypoint that carries positions gets the joint's current value; each that
/// carries velocities or accelerations gets 0.0. Empty kinds stay empty.
pub fn pad_trajectory<S: AsRef<str>>(
    robot: &dyn RobotModel,
    mut trajectory: JointTrajectory,
    required: &[S],
) -> Result<JointTrajectory, TrajectoryError> {
    let mut missing: Vec<String> = Vec::new();
    for name in required.iter().map(AsRef::as_ref) {
        if !trajectory.joint_names.iter().any(|j| j == name) && !missing.iter().any(|j| j == name) {
            missing.push(name.to_string());
        }
    }
    if missing.is_empty() {
        return Ok(trajectory);
    }

    let held = missing
        .iter()
        .map(|name| {
            robot
                .joint_value(name)
                .ok_or_else(|| TrajectoryError::UnknownJoint(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let zeros = vec![0.0; missing.len()];

    for point in &mut trajectory.points {
        if !point.positions.is_empty() {
            point.positions.extend_from_slice(&held);
        }
        if !point.velocities.is_empty() {
            point.velocities.extend_from_slice(&zeros);
        }
        if !point.accelerations.is_empty() {
            point.accelerations.extend_from_slice(&zeros);
        }
    }
    trajectory.joint_names.extend(missing);
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::JointTable;

    fn robot() -> JointTable {
        JointTable::with_values([("a", 0.1), ("b", 0.2), ("c", 0.3), ("d", 0.4)])
    }

    fn times(trajectory: &JointTrajectory) -> Vec<f64> {
        trajectory
            .points
            .iter()
            .map(|p| p.time_from_start.as_secs_f64())
            .collect()
    }

    fn assert_times(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
        }
    }

    /// Samples at the given absolute times, positions equal to the time.
    fn sampled_at(dofs: Vec<usize>, at: &[f64]) -> DenseTrajectory {
        let mut source = DenseTrajectory::new(dofs.clone());
        let mut previous = 0.0;
        for &t in at {
            source.push(DenseSample::timed(t - previous, vec![t; dofs.len()]));
            previous = t;
        }
        source
    }

    #[test]
    fn drops_waypoints_closer_than_tolerance_to_last_kept() {
        let source = sampled_at(vec![0, 1], &[0.0, 0.001, 0.5, 0.505, 1.0]);
        let wire = to_wire_trajectory(&robot(), &source, None, DEFAULT_TIME_TOLERANCE).unwrap();
        assert_times(&times(&wire), &[0.0, 0.5, 1.0]);
        assert_eq!(wire.joint_names, vec!["a", "b"]);
        assert_eq!(wire.points[1].positions, vec![0.5, 0.5]);
    }

    #[test]
    fn dense_sampling_thins_out_by_cumulative_gap() {
        // 100 samples 4ms apart: raw deltas are all below tolerance, but the
        // gap to the last kept sample is not.
        let at: Vec<f64> = (0..=100).map(|i| f64::from(i) * 0.004).collect();
        let source = sampled_at(vec![0], &at);
        let wire = to_wire_trajectory(&robot(), &source, None, DEFAULT_TIME_TOLERANCE).unwrap();
        let kept = times(&wire);
        assert!(kept.len() > 1 && kept.len() < 101);
        for pair in kept.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_TIME_TOLERANCE - 1e-9);
        }
    }

    #[test]
    fn integrated_time_matches_duration() {
        for tolerance in [0.0, 0.01, 0.1] {
            let mut source = DenseTrajectory::new(vec![0, 2]);
            for i in 0..50u32 {
                let dt = if i == 0 { 0.0 } else { 0.003 + f64::from(i % 7) * 0.011 };
                source.push(DenseSample::timed(dt, vec![0.0, 1.0]));
            }
            let wire = to_wire_trajectory(&robot(), &source, None, tolerance).unwrap();
            let last = wire.duration().as_secs_f64();
            assert!((last - source.duration).abs() <= tolerance.max(1e-9));
        }
    }

    #[test]
    fn allow_list_keeps_source_order() {
        let mut source = DenseTrajectory::new(vec![3, 0, 2]);
        source.push(DenseSample::timed(0.0, vec![3.0, 0.0, 2.0]));
        source.push(DenseSample::timed(1.0, vec![3.5, 0.5, 2.5]));
        let wire = to_wire_trajectory(&robot(), &source, Some(&[2, 3, 9]), 0.01).unwrap();
        assert_eq!(wire.joint_names, vec!["d", "c"]);
        assert_eq!(wire.points[1].positions, vec![3.5, 2.5]);
    }

    #[test]
    fn derivatives_only_when_every_sample_has_them() {
        let mut source = DenseTrajectory::new(vec![0]);
        source.push(DenseSample::timed(0.0, vec![0.0]).with_velocities(vec![1.0]));
        source.push(DenseSample::timed(0.5, vec![0.5]));
        let wire = to_wire_trajectory(&robot(), &source, None, 0.01).unwrap();
        assert!(wire.points.iter().all(|p| p.velocities.is_empty()));

        let mut source = DenseTrajectory::new(vec![0]);
        for dt in [0.0, 0.5] {
            source.push(
                DenseSample::timed(dt, vec![0.0])
                    .with_velocities(vec![1.0])
                    .with_accelerations(vec![-1.0]),
            );
        }
        let wire = to_wire_trajectory(&robot(), &source, None, 0.01).unwrap();
        assert!(wire.points.iter().all(|p| p.velocities == [1.0]));
        assert!(wire.points.iter().all(|p| p.accelerations == [-1.0]));
    }

    #[test]
    fn accelerations_without_velocities_are_malformed() {
        let mut source = DenseTrajectory::new(vec![0]);
        source.push(DenseSample::timed(0.0, vec![0.0]));
        source.push(DenseSample::timed(0.5, vec![0.5]).with_accelerations(vec![2.0]));
        let err = to_wire_trajectory(&robot(), &source, None, 0.01).unwrap_err();
        assert_eq!(err, TrajectoryError::AccelerationWithoutVelocities(1));
        assert!(matches!(
            ControlError::from(err),
            ControlError::MalformedTrajectory(_)
        ));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let robot = robot();
        let untimed = DenseTrajectory {
            dof_indices: vec![0],
            samples: vec![DenseSample {
                positions: Some(vec![0.0]),
                ..DenseSample::default()
            }],
            duration: 0.0,
        };
        assert_eq!(
            to_wire_trajectory(&robot, &untimed, None, 0.01),
            Err(TrajectoryError::NotTimed(0))
        );

        let no_positions = DenseTrajectory {
            dof_indices: vec![0],
            samples: vec![DenseSample {
                delta_time: Some(0.0),
                ..DenseSample::default()
            }],
            duration: 0.0,
        };
        assert_eq!(
            to_wire_trajectory(&robot, &no_positions, None, 0.01),
            Err(TrajectoryError::MissingPositions(0))
        );

        let mut backwards = DenseTrajectory::new(vec![0]);
        backwards.push(DenseSample::timed(-0.5, vec![0.0]));
        assert!(matches!(
            to_wire_trajectory(&robot, &backwards, None, 0.01),
            Err(TrajectoryError::InvalidDeltaTime { index: 0, .. })
        ));

        let mut narrow = DenseTrajectory::new(vec![0, 1]);
        narrow.push(DenseSample::timed(0.0, vec![0.0]));
        assert!(matches!(
            to_wire_trajectory(&robot, &narrow, None, 0.01),
            Err(TrajectoryError::DimensionMismatch { expected: 2, found: 1, .. })
        ));

        let unknown = sampled_at(vec![42], &[0.0]);
        assert_eq!(
            to_wire_trajectory(&robot, &unknown, None, 0.01),
            Err(TrajectoryError::UnknownDof(42))
        );

        let fine = sampled_at(vec![0], &[0.0, 1.0]);
        assert_eq!(
            to_wire_trajectory(&robot, &fine, None, -0.1),
            Err(TrajectoryError::InvalidTolerance(-0.1))
        );
        assert!(to_wire_trajectory(&robot, &fine, None, f64::NAN).is_err());
    }

    #[test]
    fn reported_duration_must_match() {
        let mut source = sampled_at(vec![0], &[0.0, 1.0]);
        source.duration = 2.0;
        assert!(matches!(
            to_wire_trajectory(&robot(), &source, None, 0.01),
            Err(TrajectoryError::DurationMismatch { .. })
        ));
    }

    #[test]
    fn padding_appends_held_joints() {
        let mut wire = JointTrajectory::with_joints(vec!["a".into(), "b".into()]);
        for t in [0.0, 1.0] {
            wire.points.push(JointTrajectoryPoint {
                positions: vec![t, t],
                time_from_start: Duration::from_secs_f64(t),
                ..JointTrajectoryPoint::default()
            });
        }

        let padded = pad_trajectory(&robot(), wire, &["a", "b", "c"]).unwrap();
        assert_eq!(padded.joint_names, vec!["a", "b", "c"]);
        for point in &padded.points {
            assert_eq!(point.positions[2], 0.3);
            assert!(point.velocities.is_empty());
            assert!(point.accelerations.is_empty());
        }
    }

    #[test]
    fn padding_zeroes_present_derivatives_in_required_order() {
        let mut wire = JointTrajectory::with_joints(vec!["b".into()]);
        wire.points.push(JointTrajectoryPoint {
            positions: vec![1.0],
            velocities: vec![0.5],
            ..JointTrajectoryPoint::default()
        });
        let padded = pad_trajectory(&robot(), wire, &["d", "b", "a", "d"]).unwrap();
        assert_eq!(padded.joint_names, vec!["b", "d", "a"]);
        assert_eq!(padded.points[0].positions, vec![1.0, 0.4, 0.1]);
        assert_eq!(padded.points[0].velocities, vec![0.5, 0.0, 0.0]);
        assert!(padded.points[0].accelerations.is_empty());
    }

    #[test]
    fn padding_unknown_joint_fails() {
        let wire = JointTrajectory::with_joints(vec!["a".into()]);
        assert_eq!(
            pad_trajectory(&robot(), wire, &["zz"]),
            Err(TrajectoryError::UnknownJoint("zz".into()))
        );
    }
}

//! Point-group symmetry: label parsing, operator generation and
//! symmetry-equivalent views.
//!
//! Groups are built by closure from a small generator set, so the cyclic,
//! dihedral and polyhedral families all go through the same code path.
//! Operators are stored as unit quaternions in the standard setting
//! (principal axis along z; polyhedral two-folds along the coordinate axes).
use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::view::View;

/// A point group: its canonical label and the full list of rotation
/// operators (including the identity).
#[derive(Clone, Debug)]
pub struct SymmetryGroup {
    label: String,
    ops: Vec<UnitQuaternion<f32>>,
}

impl SymmetryGroup {
    /// Parses a point-group label: `C<n>`, `D<n>`, `T`, `O` or `I`
    /// (case-insensitive).
    pub fn parse(label: &str) -> Result<Self, String> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err("empty symmetry label".into());
        }
        let upper = trimmed.to_ascii_uppercase();
        let (family, rest) = upper.split_at(1);

        let parse_order = |rest: &str| -> Result<u32, String> {
            let n: u32 = rest
                .parse()
                .map_err(|_| format!("bad symmetry order in label '{trimmed}'"))?;
            if n == 0 {
                return Err(format!("symmetry order must be positive in '{trimmed}'"));
            }
            Ok(n)
        };

        let z = Vector3::z_axis();
        let x = Vector3::x_axis();
        let diag = Unit::new_normalize(Vector3::new(1.0, 1.0, 1.0));
        let tau = (1.0 + 5.0_f32.sqrt()) / 2.0;
        let five = Unit::new_normalize(Vector3::new(0.0, 1.0, tau));
        let two_pi = 2.0 * std::f32::consts::PI;

        let generators: Vec<UnitQuaternion<f32>> = match family {
            "C" => {
                let n = parse_order(rest)?;
                vec![UnitQuaternion::from_axis_angle(&z, two_pi / n as f32)]
            }
            "D" => {
                let n = parse_order(rest)?;
                vec![
                    UnitQuaternion::from_axis_angle(&z, two_pi / n as f32),
                    UnitQuaternion::from_axis_angle(&x, std::f32::consts::PI),
                ]
            }
            "T" if rest.is_empty() => vec![
                UnitQuaternion::from_axis_angle(&z, std::f32::consts::PI),
                UnitQuaternion::from_axis_angle(&diag, two_pi / 3.0),
            ],
            "O" if rest.is_empty() => vec![
                UnitQuaternion::from_axis_angle(&z, std::f32::consts::FRAC_PI_2),
                UnitQuaternion::from_axis_angle(&diag, two_pi / 3.0),
            ],
            "I" if rest.is_empty() => vec![
                UnitQuaternion::from_axis_angle(&z, std::f32::consts::PI),
                UnitQuaternion::from_axis_angle(&diag, two_pi / 3.0),
                UnitQuaternion::from_axis_angle(&five, two_pi / 5.0),
            ],
            _ => return Err(format!("unknown symmetry label '{trimmed}'")),
        };

        let ops = generate_closure(&generators);
        Ok(Self { label: upper, ops })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of rotation operators (group order).
    pub fn order(&self) -> usize {
        self.ops.len()
    }

    pub fn operators(&self) -> &[UnitQuaternion<f32>] {
        &self.ops
    }

    /// All symmetry-equivalent orientations of `view`. The first entry is
    /// the input view itself (identity operator).
    pub fn equivalent_views(&self, view: &View) -> Vec<View> {
        let q = view.quaternion();
        self.ops.iter().map(|op| View::from_quaternion(&(op * q))).collect()
    }
}

/// Rotations q and -q are the same operator.
fn same_rotation(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> bool {
    let d = a.coords.dot(&b.coords).abs();
    d > 1.0 - 1e-4
}

fn generate_closure(generators: &[UnitQuaternion<f32>]) -> Vec<UnitQuaternion<f32>> {
    let mut ops: Vec<UnitQuaternion<f32>> = vec![UnitQuaternion::identity()];
    loop {
        let mut added = false;
        let current = ops.clone();
        for a in &current {
            for g in generators {
                let candidate = g * a;
                if !ops.iter().any(|o| same_rotation(o, &candidate)) {
                    ops.push(candidate);
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
        // Sanity ceiling: the largest supported group (icosahedral) has 60
        // elements; anything beyond that means the dedup tolerance failed.
        if ops.len() > 120 {
            break;
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_orders() {
        for (label, order) in [
            ("C1", 1),
            ("C4", 4),
            ("c7", 7),
            ("D2", 4),
            ("D3", 6),
            ("T", 12),
            ("O", 24),
            ("I", 60),
        ] {
            let g = SymmetryGroup::parse(label).expect("valid label");
            assert_eq!(g.order(), order, "order of {label}");
        }
    }

    #[test]
    fn bad_labels_rejected() {
        for label in ["", "X3", "C0", "Cfoo", "T2"] {
            assert!(SymmetryGroup::parse(label).is_err(), "label {label:?}");
        }
    }

    #[test]
    fn equivalent_views_start_with_input() {
        let g = SymmetryGroup::parse("C4").unwrap();
        let v = View::new(0.2, 0.1, 0.97, 0.5);
        let eq = g.equivalent_views(&v);
        assert_eq!(eq.len(), 4);
        assert!(v.vector_angle(&eq[0]) < 1e-4);
    }

    #[test]
    fn cyclic_views_share_tilt_from_z() {
        let g = SymmetryGroup::parse("C6").unwrap();
        let v = View::new(0.3, 0.0, 0.95, 0.0);
        let tilt = v.axis.dot(&Vector3::z()).acos();
        for e in g.equivalent_views(&v) {
            let t = e.axis.dot(&Vector3::z()).clamp(-1.0, 1.0).acos();
            assert!((t - tilt).abs() < 1e-4);
        }
    }
}

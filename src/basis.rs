//! One-dimensional basis tables shared by all operators.
//!
//! The reference zone is the unit square/cube `[0, 1]^d`. All shape functions
//! are tensor products of 1D Lagrange polynomials: the H1 (velocity) basis is
//! nodal on the closed Gauss-Lobatto points, the L2 (thermodynamic) basis is
//! nodal on the open Gauss-Legendre points. Both are tabulated once at the 1D
//! Gauss-Legendre quadrature points and shared read-only by every operator.
use eyre::ensure;
use fenris_quadrature::univariate;
use log::debug;
use nalgebra::DMatrix;

/// The 1D Gauss-Legendre rule remapped to the reference interval `[0, 1]`.
///
/// Returns `(points, weights)`, both of length `num_points`, with the points
/// in ascending order so that the quad index along an axis follows the same
/// lexicographic convention as the dof index. The underlying rule produces
/// descending points, so both sequences are reversed together.
pub fn gauss_rule_1d(num_points: usize) -> (Vec<f64>, Vec<f64>) {
    let (weights, points) = univariate::gauss(num_points);
    let points = points.into_iter().rev().map(|[x]| 0.5 * (x + 1.0)).collect();
    let weights = weights.into_iter().rev().map(|w| 0.5 * w).collect();
    (points, weights)
}

/// The `n`-point closed Gauss-Lobatto point set on `[0, 1]`, in ascending
/// order. Requires `n >= 2`; the end points are always included.
pub fn gauss_lobatto_points_1d(n: usize) -> Vec<f64> {
    assert!(n >= 2, "Gauss-Lobatto needs at least the two end points");

    // Interior points are the roots of P'_{n - 1}, found by Newton iteration
    // from Chebyshev-Lobatto initial guesses (cf. the Legendre recurrences
    // used for the open Gauss rule).
    let m = n - 1;
    let mut points = Vec::with_capacity(n);
    points.push(-1.0);
    for i in 1..m {
        let mut x = (std::f64::consts::PI * (m - i) as f64 / m as f64).cos();
        for _ in 0..100 {
            let (p, p_prev) = legendre_with_previous(m, x);
            // dP_m/dx and, via the Legendre ODE, d^2P_m/dx^2
            let dp = m as f64 * (x * p - p_prev) / (x * x - 1.0);
            let d2p = (2.0 * x * dp - (m * (m + 1)) as f64 * p) / (1.0 - x * x);
            let step = dp / d2p;
            x -= step;
            if step.abs() <= 1e-15 {
                break;
            }
        }
        points.push(x);
    }
    points.push(1.0);

    points.into_iter().map(|x| 0.5 * (x + 1.0)).collect()
}

/// Evaluates `(P_m(x), P_{m - 1}(x))` by the three-term recurrence.
fn legendre_with_previous(m: usize, x: f64) -> (f64, f64) {
    let mut p = 1.0;
    let mut p_prev = 0.0;
    for k in 1..=m {
        let k = k as f64;
        let p_next = ((2.0 * k - 1.0) * x * p - (k - 1.0) * p_prev) / k;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

/// Value of the `i`-th Lagrange polynomial on `nodes` at `x`.
fn lagrange_value(nodes: &[f64], i: usize, x: f64) -> f64 {
    let mut value = 1.0;
    for (j, &node) in nodes.iter().enumerate() {
        if j != i {
            value *= (x - node) / (nodes[i] - node);
        }
    }
    value
}

/// Derivative of the `i`-th Lagrange polynomial on `nodes` at `x`.
fn lagrange_derivative(nodes: &[f64], i: usize, x: f64) -> f64 {
    let mut deriv = 0.0;
    for (k, &node_k) in nodes.iter().enumerate() {
        if k == i {
            continue;
        }
        let mut term = 1.0 / (nodes[i] - node_k);
        for (j, &node_j) in nodes.iter().enumerate() {
            if j != i && j != k {
                term *= (x - node_j) / (nodes[i] - node_j);
            }
        }
        deriv += term;
    }
    deriv
}

/// Values and gradients of the 1D shape functions at all 1D quadrature
/// points. All tables are sized `(dofs1d x nqp1d)`.
///
/// Constructed once at startup from the element orders and the quadrature
/// order, then shared immutably (behind an `Arc`) by every operator instance.
#[derive(Debug, Clone)]
pub struct Tensors1D {
    h1_dofs_1d: usize,
    l2_dofs_1d: usize,
    nqp_1d: usize,
    h1_values: DMatrix<f64>,
    h1_gradients: DMatrix<f64>,
    l2_values: DMatrix<f64>,
}

impl Tensors1D {
    /// Tabulates the H1 basis of order `h1_order`, its gradients, and the L2
    /// basis of order `l2_order` at the `nqp_1d`-point Gauss rule on `[0, 1]`.
    pub fn new(h1_order: usize, l2_order: usize, nqp_1d: usize) -> eyre::Result<Self> {
        ensure!(h1_order >= 1, "H1 velocity space must be at least linear, got order {h1_order}");
        ensure!(nqp_1d >= 1, "at least one 1D quadrature point is required");

        let h1_dofs_1d = h1_order + 1;
        let l2_dofs_1d = l2_order + 1;
        let (quad_points, _) = gauss_rule_1d(nqp_1d);

        let h1_nodes = gauss_lobatto_points_1d(h1_dofs_1d);
        // A single open Gauss point serves as the nodal point of the constant
        // (order zero) L2 basis.
        let (l2_nodes, _) = gauss_rule_1d(l2_dofs_1d);

        let h1_values =
            DMatrix::from_fn(h1_dofs_1d, nqp_1d, |i, k| lagrange_value(&h1_nodes, i, quad_points[k]));
        let h1_gradients = DMatrix::from_fn(h1_dofs_1d, nqp_1d, |i, k| {
            lagrange_derivative(&h1_nodes, i, quad_points[k])
        });
        let l2_values =
            DMatrix::from_fn(l2_dofs_1d, nqp_1d, |i, k| lagrange_value(&l2_nodes, i, quad_points[k]));

        debug!(
            "built 1D basis tables: H1 order {}, L2 order {}, {} quadrature points",
            h1_order, l2_order, nqp_1d
        );

        Ok(Self {
            h1_dofs_1d,
            l2_dofs_1d,
            nqp_1d,
            h1_values,
            h1_gradients,
            l2_values,
        })
    }

    pub fn h1_dofs_1d(&self) -> usize {
        self.h1_dofs_1d
    }

    pub fn l2_dofs_1d(&self) -> usize {
        self.l2_dofs_1d
    }

    pub fn nqp_1d(&self) -> usize {
        self.nqp_1d
    }

    /// H1 shape function values, `(h1_dofs_1d x nqp_1d)`.
    pub fn h1_values(&self) -> &DMatrix<f64> {
        &self.h1_values
    }

    /// H1 shape function derivatives, `(h1_dofs_1d x nqp_1d)`.
    pub fn h1_gradients(&self) -> &DMatrix<f64> {
        &self.h1_gradients
    }

    /// L2 shape function values, `(l2_dofs_1d x nqp_1d)`.
    pub fn l2_values(&self) -> &DMatrix<f64> {
        &self.l2_values
    }
}

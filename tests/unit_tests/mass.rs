use super::support::{
    cartesian_h1_space, cartesian_l2_space, dense_mass, synthetic_quad_data, test_vector,
    uniform_quad_data, zone_count,
};
use aegir::{mass_operator, Backend, Tensors1D};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::DVector;
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn matches_the_dense_operator_on_the_velocity_space() {
    let zones = [3, 2];
    let tensors = Arc::new(Tensors1D::new(2, 1, 3).unwrap());
    let space = cartesian_h1_space(&zones, 2);
    let quad_data = synthetic_quad_data(2, zone_count(&zones), 3);
    let op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
    let dense = dense_mass(&quad_data, &tensors, &space);

    let x = test_vector(op.vector_size(), 2);
    let mut y = DVector::zeros(op.vector_size());
    op.mult(x.as_view(), y.as_view_mut()).unwrap();
    assert_matrix_eq!(y, &dense * &x, comp = abs, tol = 1e-11);
}

#[test]
fn matches_the_dense_operator_on_the_energy_space() {
    let zones = [2, 2, 2];
    let tensors = Arc::new(Tensors1D::new(2, 1, 2).unwrap());
    let space = cartesian_l2_space(3, zone_count(&zones), 1);
    let quad_data = synthetic_quad_data(3, zone_count(&zones), 2);
    let op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
    let dense = dense_mass(&quad_data, &tensors, &space);

    let x = test_vector(op.vector_size(), 4);
    let mut y = DVector::zeros(op.vector_size());
    op.mult(x.as_view(), y.as_view_mut()).unwrap();
    assert_matrix_eq!(y, &dense * &x, comp = abs, tol = 1e-11);
}

#[test]
fn total_mass_is_the_sum_of_the_reference_weights() {
    // By partition of unity, 1^T M 1 collapses to the sum of
    // rho0 det(J0) w over all points: the total mass of the mesh.
    let zones = [2, 3];
    let nzones = zone_count(&zones);
    let (h, rho0) = (0.25, 3.0);
    let tensors = Arc::new(Tensors1D::new(2, 1, 3).unwrap());
    let space = cartesian_h1_space(&zones, 2);
    let quad_data = uniform_quad_data(2, nzones, 3, h, rho0);
    let op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();

    let ones = DVector::from_element(op.vector_size(), 1.0);
    let mut y = DVector::zeros(op.vector_size());
    op.mult(ones.as_view(), y.as_view_mut()).unwrap();

    let expected = rho0 * (h * h) * nzones as f64;
    assert_scalar_eq!(ones.dot(&y), expected, comp = abs, tol = 1e-12);
}

#[test]
fn essential_dofs_are_annihilated_symmetrically() {
    let zones = [2, 2];
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let space = cartesian_h1_space(&zones, 1);
    let quad_data = synthetic_quad_data(2, zone_count(&zones), 2);
    // The set is lent to the operator, so it must outlive it.
    let ess = [0usize, 4, 7];
    let mut op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
    op.set_essential_true_dofs(Some(&ess));

    // Constrained rows: the output vanishes there for any input.
    let x = test_vector(op.vector_size(), 9);
    let mut y = DVector::zeros(op.vector_size());
    op.mult(x.as_view(), y.as_view_mut()).unwrap();
    for &dof in &ess {
        assert_eq!(y[dof], 0.0);
    }

    // Constrained columns: a unit vector at a constrained dof maps to zero.
    let mut unit = DVector::zeros(op.vector_size());
    unit[ess[1]] = 1.0;
    op.mult(unit.as_view(), y.as_view_mut()).unwrap();
    assert_matrix_eq!(y, DVector::zeros(op.vector_size()), comp = abs, tol = 0.0);
}

#[test]
fn eliminate_rhs_zeroes_exactly_the_constrained_entries() {
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let space = cartesian_h1_space(&[2, 2], 1);
    let quad_data = synthetic_quad_data(2, 4, 2);
    let ess = [1usize, 3];
    let mut op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
    op.set_essential_true_dofs(Some(&ess));
    let reference = test_vector(op.vector_size(), 11);
    let mut b = reference.clone();
    op.eliminate_rhs(b.as_view_mut()).unwrap();
    for dof in 0..op.vector_size() {
        if ess.contains(&dof) {
            assert_eq!(b[dof], 0.0);
        } else {
            assert_eq!(b[dof], reference[dof]);
        }
    }
}

#[test]
fn clearing_the_essential_set_restores_the_unconstrained_action() {
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let space = cartesian_h1_space(&[2, 2], 1);
    let quad_data = synthetic_quad_data(2, 4, 2);
    let ess = [2usize, 5];
    let mut op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();

    let x = test_vector(op.vector_size(), 13);
    let mut unconstrained = DVector::zeros(op.vector_size());
    op.mult(x.as_view(), unconstrained.as_view_mut()).unwrap();

    op.set_essential_true_dofs(Some(&ess));
    op.set_essential_true_dofs(None);

    let mut y = DVector::zeros(op.vector_size());
    op.mult(x.as_view(), y.as_view_mut()).unwrap();
    assert_matrix_eq!(y, unconstrained, comp = abs, tol = 0.0);
}

proptest! {
    // The mass form is symmetric: <M x, y> = <x, M y>.
    #[test]
    fn the_action_is_symmetric(
        x in proptest::collection::vec(-1.0..1.0f64, 9),
        y in proptest::collection::vec(-1.0..1.0f64, 9),
    ) {
        let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
        let space = cartesian_h1_space(&[2, 2], 1);
        let quad_data = synthetic_quad_data(2, 4, 2);
        let op = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();

        let x = DVector::from_vec(x);
        let y = DVector::from_vec(y);
        prop_assert_eq!(x.len(), op.vector_size());

        let mut mx = DVector::zeros(op.vector_size());
        let mut my = DVector::zeros(op.vector_size());
        op.mult(x.as_view(), mx.as_view_mut()).unwrap();
        op.mult(y.as_view(), my.as_view_mut()).unwrap();
        prop_assert!((mx.dot(&y) - x.dot(&my)).abs() <= 1e-11 * (1.0 + mx.dot(&y).abs()));
    }
}

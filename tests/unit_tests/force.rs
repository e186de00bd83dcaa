use super::support::{
    cartesian_h1_space, cartesian_l2_space, dense_force, synthetic_quad_data, test_vector,
    uniform_quad_data, zone_count,
};
use aegir::{force_operator, Backend, Tensors1D};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::DVector;
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn unit_stress_on_a_unit_zone_gives_signed_half_forces() {
    // Q1 velocity on a single unit square with sigma = I: the force on node
    // (i1, i2) is the integral of grad phi, which separates into
    // (l_{i1}(1) - l_{i1}(0)) * int l_{i2} = +-1 * 1/2 per component.
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let h1 = cartesian_h1_space(&[1, 1], 1);
    let l2 = cartesian_l2_space(2, 1, 0);
    let quad_data = uniform_quad_data(2, 1, 2, 1.0, 1.0);
    let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();

    let energy = DVector::from_element(1, 1.0);
    let mut force = DVector::zeros(8);
    op.mult(energy.as_view(), force.as_view_mut()).unwrap();

    for i2 in 0..2 {
        for i1 in 0..2 {
            let local = i1 + 2 * i2;
            let sign_x = if i1 == 0 { -1.0 } else { 1.0 };
            let sign_y = if i2 == 0 { -1.0 } else { 1.0 };
            assert_scalar_eq!(force[local], 0.5 * sign_x, comp = abs, tol = 1e-13);
            assert_scalar_eq!(force[4 + local], 0.5 * sign_y, comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn matches_the_dense_operator_on_quadrilaterals() {
    let zones = [2, 3];
    let tensors = Arc::new(Tensors1D::new(2, 1, 3).unwrap());
    let h1 = cartesian_h1_space(&zones, 2);
    let l2 = cartesian_l2_space(2, zone_count(&zones), 1);
    let quad_data = synthetic_quad_data(2, zone_count(&zones), 3);
    let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();
    let dense = dense_force(&quad_data, &tensors, &h1, &l2);

    let energy = test_vector(op.l2_vector_size(), 3);
    let mut force = DVector::zeros(op.h1_vector_size());
    op.mult(energy.as_view(), force.as_view_mut()).unwrap();
    assert_matrix_eq!(force, &dense * &energy, comp = abs, tol = 1e-11);
}

#[test]
fn matches_the_dense_operator_on_hexahedra() {
    let zones = [2, 2, 1];
    let tensors = Arc::new(Tensors1D::new(2, 1, 2).unwrap());
    let h1 = cartesian_h1_space(&zones, 2);
    let l2 = cartesian_l2_space(3, zone_count(&zones), 1);
    let quad_data = synthetic_quad_data(3, zone_count(&zones), 2);
    let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();
    let dense = dense_force(&quad_data, &tensors, &h1, &l2);

    let energy = test_vector(op.l2_vector_size(), 5);
    let mut force = DVector::zeros(op.h1_vector_size());
    op.mult(energy.as_view(), force.as_view_mut()).unwrap();
    assert_matrix_eq!(force, &dense * &energy, comp = abs, tol = 1e-11);
}

#[test]
fn transpose_matches_the_dense_transpose() {
    let zones = [2, 2, 1];
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let h1 = cartesian_h1_space(&zones, 1);
    let l2 = cartesian_l2_space(3, zone_count(&zones), 0);
    let quad_data = synthetic_quad_data(3, zone_count(&zones), 2);
    let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();
    let dense = dense_force(&quad_data, &tensors, &h1, &l2);

    let velocity = test_vector(op.h1_vector_size(), 7);
    let mut work = DVector::zeros(op.l2_vector_size());
    op.mult_transpose(velocity.as_view(), work.as_view_mut())
        .unwrap();
    assert_matrix_eq!(work, dense.transpose() * &velocity, comp = abs, tol = 1e-11);
}

#[test]
fn rejects_mismatched_vector_lengths() {
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let h1 = cartesian_h1_space(&[2, 2], 1);
    let l2 = cartesian_l2_space(2, 4, 0);
    let quad_data = synthetic_quad_data(2, 4, 2);
    let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();

    let short = DVector::zeros(op.l2_vector_size() - 1);
    let mut out = DVector::zeros(op.h1_vector_size());
    assert!(op.mult(short.as_view(), out.as_view_mut()).is_err());
    let mut short_out = DVector::zeros(op.l2_vector_size() - 1);
    assert!(op
        .mult_transpose(out.as_view(), short_out.as_view_mut())
        .is_err());
}

#[test]
fn rejects_spaces_of_the_wrong_kind() {
    let tensors = Arc::new(Tensors1D::new(1, 1, 2).unwrap());
    let l2 = cartesian_l2_space(2, 4, 1);
    let quad_data = synthetic_quad_data(2, 4, 2);
    // Both arguments discontinuous: not a valid force pairing.
    assert!(force_operator(Backend::Host, &quad_data, &tensors, &l2, &l2).is_err());
}

proptest! {
    // <F e, v> = <e, F^T v> for arbitrary vectors; mult and mult_transpose
    // realize the same bilinear form.
    #[test]
    fn mult_and_mult_transpose_are_adjoint(
        energy in proptest::collection::vec(-1.0..1.0f64, 16),
        velocity in proptest::collection::vec(-1.0..1.0f64, 18),
    ) {
        let zones = [2, 2];
        let tensors = Arc::new(Tensors1D::new(1, 1, 2).unwrap());
        let h1 = cartesian_h1_space(&zones, 1);
        let l2 = cartesian_l2_space(2, zone_count(&zones), 1);
        let quad_data = synthetic_quad_data(2, zone_count(&zones), 2);
        let op = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();

        let energy = DVector::from_vec(energy);
        let velocity = DVector::from_vec(velocity);
        prop_assert_eq!(energy.len(), op.l2_vector_size());
        prop_assert_eq!(velocity.len(), op.h1_vector_size());

        let mut force = DVector::zeros(op.h1_vector_size());
        op.mult(energy.as_view(), force.as_view_mut()).unwrap();
        let mut work = DVector::zeros(op.l2_vector_size());
        op.mult_transpose(velocity.as_view(), work.as_view_mut()).unwrap();

        let forward = force.dot(&velocity);
        let adjoint = energy.dot(&work);
        prop_assert!((forward - adjoint).abs() <= 1e-10 * (1.0 + forward.abs()));
    }
}

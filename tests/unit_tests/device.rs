use super::support::{
    cartesian_h1_space, cartesian_l2_space, synthetic_quad_data, test_vector, zone_count,
};
use aegir::device::TransposeMap;
use aegir::{force_operator, mass_operator, Backend, FiniteElementSpace, Tensors1D};
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;
use std::sync::Arc;

#[test]
fn transpose_map_lists_every_zone_contribution_once() {
    let space = cartesian_h1_space(&[2, 2], 1);
    let map = TransposeMap::for_space(&space);
    assert_eq!(map.num_true_dofs(), space.num_true_dofs());

    // 2x2 grid of Q1 zones: the center node is shared by all four zones, the
    // corners by one each.
    assert_eq!(map.contributions(4).len(), 4);
    assert_eq!(map.contributions(0).len(), 1);
    let total: usize = (0..map.num_true_dofs())
        .map(|dof| map.contributions(dof).len())
        .sum();
    assert_eq!(total, space.num_zones() * space.dofs_per_zone());

    // Every listed position restricts back to the dof it is filed under.
    for dof in 0..map.num_true_dofs() {
        for &position in map.contributions(dof) {
            let (zone, local) = (
                position / space.dofs_per_zone(),
                position % space.dofs_per_zone(),
            );
            assert_eq!(space.zone_dofs(zone)[local], dof);
        }
    }
}

#[test]
fn batched_force_agrees_with_the_host_operator_in_2d() {
    let zones = [3, 2];
    let tensors = Arc::new(Tensors1D::new(2, 1, 3).unwrap());
    let h1 = cartesian_h1_space(&zones, 2);
    let l2 = cartesian_l2_space(2, zone_count(&zones), 1);
    let quad_data = synthetic_quad_data(2, zone_count(&zones), 3);
    let host = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();
    let batched = force_operator(Backend::Batched, &quad_data, &tensors, &h1, &l2).unwrap();

    let energy = test_vector(host.l2_vector_size(), 21);
    let mut expected = DVector::zeros(host.h1_vector_size());
    let mut actual = DVector::zeros(host.h1_vector_size());
    host.mult(energy.as_view(), expected.as_view_mut()).unwrap();
    batched.mult(energy.as_view(), actual.as_view_mut()).unwrap();
    assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);

    let velocity = test_vector(host.h1_vector_size(), 22);
    let mut expected = DVector::zeros(host.l2_vector_size());
    let mut actual = DVector::zeros(host.l2_vector_size());
    host.mult_transpose(velocity.as_view(), expected.as_view_mut())
        .unwrap();
    batched
        .mult_transpose(velocity.as_view(), actual.as_view_mut())
        .unwrap();
    assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);
}

#[test]
fn batched_force_agrees_with_the_host_operator_in_3d() {
    let zones = [2, 2, 2];
    let tensors = Arc::new(Tensors1D::new(2, 1, 2).unwrap());
    let h1 = cartesian_h1_space(&zones, 2);
    let l2 = cartesian_l2_space(3, zone_count(&zones), 1);
    let quad_data = synthetic_quad_data(3, zone_count(&zones), 2);
    let host = force_operator(Backend::Host, &quad_data, &tensors, &h1, &l2).unwrap();
    let batched = force_operator(Backend::Batched, &quad_data, &tensors, &h1, &l2).unwrap();

    let energy = test_vector(host.l2_vector_size(), 23);
    let mut expected = DVector::zeros(host.h1_vector_size());
    let mut actual = DVector::zeros(host.h1_vector_size());
    host.mult(energy.as_view(), expected.as_view_mut()).unwrap();
    batched.mult(energy.as_view(), actual.as_view_mut()).unwrap();
    assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);

    let velocity = test_vector(host.h1_vector_size(), 24);
    let mut expected = DVector::zeros(host.l2_vector_size());
    let mut actual = DVector::zeros(host.l2_vector_size());
    host.mult_transpose(velocity.as_view(), expected.as_view_mut())
        .unwrap();
    batched
        .mult_transpose(velocity.as_view(), actual.as_view_mut())
        .unwrap();
    assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);
}

#[test]
fn batched_mass_agrees_with_the_host_operator() {
    for dim in [2usize, 3] {
        let zones: &[usize] = if dim == 2 { &[3, 2] } else { &[2, 2, 2] };
        let tensors = Arc::new(Tensors1D::new(2, 1, 2).unwrap());
        let space = cartesian_h1_space(zones, 2);
        let quad_data = synthetic_quad_data(dim, zone_count(zones), 2);
        let host = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
        let batched = mass_operator(Backend::Batched, &quad_data, &tensors, &space).unwrap();

        let x = test_vector(host.vector_size(), 31 + dim as u64);
        let mut expected = DVector::zeros(host.vector_size());
        let mut actual = DVector::zeros(host.vector_size());
        host.mult(x.as_view(), expected.as_view_mut()).unwrap();
        batched.mult(x.as_view(), actual.as_view_mut()).unwrap();
        assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn batched_mass_stages_and_applies_essential_dofs() {
    let tensors = Arc::new(Tensors1D::new(1, 0, 2).unwrap());
    let space = cartesian_h1_space(&[2, 2], 1);
    let quad_data = synthetic_quad_data(2, 4, 2);
    // The set is lent to the operators, so it must outlive both.
    let ess = [0usize, 4, 8];
    let mut host = mass_operator(Backend::Host, &quad_data, &tensors, &space).unwrap();
    let mut batched = mass_operator(Backend::Batched, &quad_data, &tensors, &space).unwrap();

    host.set_essential_true_dofs(Some(&ess));
    batched.set_essential_true_dofs(Some(&ess));

    let x = test_vector(host.vector_size(), 41);
    let mut expected = DVector::zeros(host.vector_size());
    let mut actual = DVector::zeros(host.vector_size());
    host.mult(x.as_view(), expected.as_view_mut()).unwrap();
    batched.mult(x.as_view(), actual.as_view_mut()).unwrap();
    assert_matrix_eq!(actual, expected, comp = abs, tol = 1e-12);
    for &dof in &ess {
        assert_eq!(actual[dof], 0.0);
    }

    let mut b = test_vector(host.vector_size(), 42);
    batched.eliminate_rhs(b.as_view_mut()).unwrap();
    for &dof in &ess {
        assert_eq!(b[dof], 0.0);
    }
}

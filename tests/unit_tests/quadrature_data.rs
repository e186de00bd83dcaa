use aegir::QuadratureData;
use matrixcompare::assert_scalar_eq;

#[test]
fn accessors_round_trip_every_point_and_tensor_entry() {
    let mut quad_data = QuadratureData::new(2, 3, 4).unwrap();
    for z in 0..3 {
        for q in 0..4 {
            for row in 0..2 {
                for col in 0..2 {
                    let tag = (((z * 4 + q) * 2 + row) * 2 + col) as f64;
                    *quad_data.jac0_inv_mut(z, q, row, col) = tag;
                    *quad_data.stress_jinv_t_mut(z, q, row, col) = -tag;
                }
            }
            *quad_data.rho0_det_j0_w_mut(z, q) = (z * 4 + q) as f64;
        }
    }
    for z in 0..3 {
        for q in 0..4 {
            for row in 0..2 {
                for col in 0..2 {
                    let tag = (((z * 4 + q) * 2 + row) * 2 + col) as f64;
                    assert_eq!(quad_data.jac0_inv(z, q, row, col), tag);
                    assert_eq!(quad_data.stress_jinv_t(z, q, row, col), -tag);
                }
            }
            assert_eq!(quad_data.rho0_det_j0_w(z, q), (z * 4 + q) as f64);
        }
    }
}

#[test]
fn density_recovers_the_initial_density_on_the_initial_mesh() {
    let (rho0, det_j0, weight) = (2.5, 0.125, 0.3);
    let mut quad_data = QuadratureData::new(3, 2, 8).unwrap();
    *quad_data.rho0_det_j0_w_mut(1, 5) = rho0 * det_j0 * weight;
    assert_scalar_eq!(
        quad_data.density(1, 5, det_j0, weight),
        rho0,
        comp = abs,
        tol = 1e-14
    );
}

#[test]
fn density_scales_inversely_with_expansion() {
    // Doubling the volume at fixed mass halves the density.
    let mut quad_data = QuadratureData::new(2, 1, 1).unwrap();
    *quad_data.rho0_det_j0_w_mut(0, 0) = 1.0;
    let initial = quad_data.density(0, 0, 0.5, 0.4);
    let expanded = quad_data.density(0, 0, 1.0, 0.4);
    assert_scalar_eq!(expanded, 0.5 * initial, comp = abs, tol = 1e-14);
}

#[test]
fn rejects_unsupported_shapes() {
    assert!(QuadratureData::new(1, 4, 4).is_err());
    assert!(QuadratureData::new(4, 4, 4).is_err());
    assert!(QuadratureData::new(2, 0, 4).is_err());
    assert!(QuadratureData::new(2, 4, 0).is_err());
}

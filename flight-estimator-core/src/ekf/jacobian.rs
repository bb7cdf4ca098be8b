use nalgebra::{SMatrix, SVector};

/// Jacobian J ∈ R^{M×N} of `f` at `x` by central differences.
/// `f` must be deterministic around `x`.
pub fn central_difference_jacobian<const M: usize, const N: usize, F>(
    x: &SVector<f64, N>,
    f: F,
) -> SMatrix<f64, M, N>
where
    F: Fn(&SVector<f64, N>) -> SVector<f64, M>,
{
    // cbrt(f64::EPSILON)
    const EPS_CBRT: f64 = 6.055_454_452_393_343e-6;

    let mut j = SMatrix::<f64, M, N>::zeros();
    let mut xp = *x;
    let mut xm = *x;

    for col in 0..N {
        let xi = x[col];
        let h = EPS_CBRT
            * if xi.is_finite() {
                libm::fabs(xi).max(1.0)
            } else {
                1.0
            };

        xp[col] = xi + h;
        xm[col] = xi - h;

        let fp = f(&xp);
        let fm = f(&xm);
        let inv_2h = 0.5 / h;
        for row in 0..M {
            j[(row, col)] = (fp[row] - fm[row]) * inv_2h;
        }

        xp[col] = xi;
        xm[col] = xi;
    }

    j
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2x3, Vector2, Vector3};

    use super::*;

    #[test]
    fn matches_analytic_jacobian() {
        let x = Vector3::new(0.3, -1.2, 2.0);
        let j = central_difference_jacobian(&x, |v: &SVector<f64, 3>| {
            Vector2::new(v[0] * v[1], libm::sin(v[2]) + v[0] * v[0])
        });

        let expected = Matrix2x3::new(
            x[1],
            x[0],
            0.0,
            2.0 * x[0],
            0.0,
            libm::cos(x[2]),
        );
        assert_relative_eq!(j, expected, epsilon = 1e-8);
    }
}

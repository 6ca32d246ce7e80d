//! Two-view epipolar geometry on normalized image coordinates
//!
//! Convention: a point `X1` in the first camera frame maps to the second
//! camera as `X2 = R * X1 + t`, and the essential matrix `E = [t]x R`
//! satisfies `x2^T E x1 = 0`.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, SMatrix, SVector, Vector3};

/// RANSAC success probability used for adaptive termination.
const RANSAC_CONFIDENCE: f64 = 0.999;
const SAMPLE_SIZE: usize = 8;

/// Robustly estimated essential matrix and the indices of its inliers.
#[derive(Debug, Clone)]
pub struct EssentialEstimate {
    pub essential: Matrix3<f64>,
    pub inliers: Vec<usize>,
}

/// Relative motion from the first camera to the second.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativePose {
    pub rotation: Matrix3<f64>,
    /// Unit length; two views fix translation only up to scale.
    pub translation: Vector3<f64>,
    /// Inliers that triangulate in front of both cameras.
    pub front_count: usize,
}

/// Linear eight-point estimate of `E` from at least eight correspondences,
/// projected onto the essential manifold.
pub fn essential_from_points(pts1: &[Point2<f64>], pts2: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if pts1.len() != pts2.len() || pts1.len() < SAMPLE_SIZE {
        return None;
    }

    // Normal equations of the stacked constraint rows; the null vector of A
    // is the eigenvector of A^T A with the smallest eigenvalue.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p1, p2) in pts1.iter().zip(pts2) {
        let row = SVector::<f64, 9>::from([
            p2.x * p1.x,
            p2.x * p1.y,
            p2.x,
            p2.y * p1.x,
            p2.y * p1.y,
            p2.y,
            p1.x,
            p1.y,
            1.0,
        ]);
        ata += row * row.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let v = eigen.eigenvectors.column(eigen.eigenvalues.imin());
    let e = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);
    enforce_essential(&e)
}

/// Replace the singular values of `e` with `(s, s, 0)`.
fn enforce_essential(e: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let (u, s, vt) = sorted_svd(e)?;
    let mean = 0.5 * (s[0] + s[1]);
    if mean <= f64::EPSILON {
        return None;
    }
    let sigma = Matrix3::from_diagonal(&Vector3::new(mean, mean, 0.0));
    Some(u * sigma * vt)
}

/// SVD with singular values in descending order.
fn sorted_svd(m: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>, Matrix3<f64>)> {
    let svd = m.svd(true, true);
    let (u, vt) = (svd.u?, svd.v_t?);
    let values = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    let mut su = Matrix3::zeros();
    let mut svt = Matrix3::zeros();
    let mut sv = Vector3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        su.set_column(dst, &u.column(src));
        svt.set_row(dst, &vt.row(src));
        sv[dst] = values[src];
    }
    Some((su, sv, svt))
}

/// First-order squared geometric error of a correspondence under `e`.
pub fn sampson_error(e: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> f64 {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let x2 = Vector3::new(p2.x, p2.y, 1.0);
    let ex1 = e * x1;
    let etx2 = e.transpose() * x2;
    let residual = x2.dot(&ex1);
    let denom = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
    if denom <= 1e-18 {
        f64::INFINITY
    } else {
        residual * residual / denom
    }
}

/// Seeded LCG for reproducible sampling.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next_index(&mut self, n: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) as usize) % n
    }

    fn sample(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut picked = Vec::with_capacity(k);
        while picked.len() < k {
            let i = self.next_index(n);
            if !picked.contains(&i) {
                picked.push(i);
            }
        }
        picked
    }
}

/// RANSAC over eight-point samples with adaptive termination and a final
/// refit on all inliers.
///
/// `threshold` is an inlier distance in normalized image units.
pub fn estimate_essential_ransac(
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    threshold: f64,
    max_iterations: usize,
    seed: u64,
) -> Option<EssentialEstimate> {
    let n = pts1.len();
    if n != pts2.len() || n < SAMPLE_SIZE {
        return None;
    }

    let threshold_sq = threshold * threshold;
    let inliers_of = |e: &Matrix3<f64>| -> Vec<usize> {
        (0..n)
            .filter(|&i| sampson_error(e, &pts1[i], &pts2[i]) <= threshold_sq)
            .collect()
    };

    let mut rng = Lcg::new(seed);
    let mut best: Option<EssentialEstimate> = None;
    let mut required = max_iterations;
    let mut iteration = 0;

    while iteration < required.min(max_iterations) {
        iteration += 1;
        let sample = rng.sample(n, SAMPLE_SIZE);
        let s1: Vec<_> = sample.iter().map(|&i| pts1[i]).collect();
        let s2: Vec<_> = sample.iter().map(|&i| pts2[i]).collect();
        let Some(e) = essential_from_points(&s1, &s2) else {
            continue;
        };

        let inliers = inliers_of(&e);
        if best.as_ref().is_none_or(|b| inliers.len() > b.inliers.len()) {
            let ratio = inliers.len() as f64 / n as f64;
            required = adaptive_iterations(ratio, max_iterations);
            best = Some(EssentialEstimate {
                essential: e,
                inliers,
            });
        }
    }

    let best = best?;
    let in1: Vec<_> = best.inliers.iter().map(|&i| pts1[i]).collect();
    let in2: Vec<_> = best.inliers.iter().map(|&i| pts2[i]).collect();
    match essential_from_points(&in1, &in2) {
        Some(refit) => {
            let inliers = inliers_of(&refit);
            if inliers.len() >= best.inliers.len() {
                Some(EssentialEstimate {
                    essential: refit,
                    inliers,
                })
            } else {
                Some(best)
            }
        }
        None => Some(best),
    }
}

fn adaptive_iterations(inlier_ratio: f64, max_iterations: usize) -> usize {
    let all_good = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if all_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if all_good <= f64::EPSILON {
        return max_iterations;
    }
    let needed = (1.0 - RANSAC_CONFIDENCE).ln() / (1.0 - all_good).ln();
    (needed.ceil() as usize).clamp(1, max_iterations)
}

/// Projection matrix `[R | t]` for normalized coordinates.
pub fn projection(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    p.set_column(3, translation);
    p
}

/// Linear (DLT) triangulation of one correspondence.
pub fn triangulate_dlt(
    p1: &Point2<f64>,
    p2: &Point2<f64>,
    proj1: &Matrix3x4<f64>,
    proj2: &Matrix3x4<f64>,
) -> Option<Point3<f64>> {
    let mut a = Matrix4::<f64>::zeros();
    for j in 0..4 {
        a[(0, j)] = p1.x * proj1[(2, j)] - proj1[(0, j)];
        a[(1, j)] = p1.y * proj1[(2, j)] - proj1[(1, j)];
        a[(2, j)] = p2.x * proj2[(2, j)] - proj2[(0, j)];
        a[(3, j)] = p2.y * proj2[(2, j)] - proj2[(1, j)];
    }

    let eigen = (a.transpose() * a).symmetric_eigen();
    let x = eigen.eigenvectors.column(eigen.eigenvalues.imin());
    if x[3].abs() < 1e-12 {
        return None;
    }
    Some(Point3::new(x[0] / x[3], x[1] / x[3], x[2] / x[3]))
}

/// Decompose `e` into the four `(R, t)` candidates and keep the one that
/// puts the most inliers in front of both cameras.
pub fn recover_pose(
    e: &Matrix3<f64>,
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    inliers: &[usize],
) -> Option<RelativePose> {
    let (mut u, _, mut vt) = sorted_svd(e)?;
    if u.determinant() < 0.0 {
        u = -u;
    }
    if vt.determinant() < 0.0 {
        vt = -vt;
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * vt;
    let r2 = u * w.transpose() * vt;
    let t: Vector3<f64> = u.column(2).into_owned();

    let proj1 = projection(&Matrix3::identity(), &Vector3::zeros());
    [(r1, t), (r1, -t), (r2, t), (r2, -t)]
        .into_iter()
        .map(|(rotation, translation)| {
            let proj2 = projection(&rotation, &translation);
            let front_count = inliers
                .iter()
                .filter(|&&i| {
                    triangulate_dlt(&pts1[i], &pts2[i], &proj1, &proj2).is_some_and(|x| {
                        let depth2 = (rotation * x.coords + translation).z;
                        x.z > 0.0 && depth2 > 0.0
                    })
                })
                .count();
            RelativePose {
                rotation,
                translation,
                front_count,
            }
        })
        .max_by_key(|candidate| candidate.front_count)
        .filter(|best| best.front_count > 0)
}

//! Small dense linear algebra for PCA: a row-major matrix, sample
//! covariance and a Jacobi eigen-decomposition for symmetric matrices.
//!
//! Everything here is sequential and order-stable, so the same input always
//! produces bit-identical output.

/// Row-major dense matrix of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a zero-initialized matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create a matrix from existing data (row-major order).
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_data(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data length {} != rows*cols {}",
            data.len(),
            rows * cols
        );
        Self { rows, cols, data }
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, val: f64) {
        self.data[r * self.cols + c] = val;
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow row `r`.
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Copy of column `c`.
    pub fn column(&self, c: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.get(r, c)).collect()
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::new(n, n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

/// Column means of a samples-by-features matrix.
pub fn column_means(samples: &Matrix) -> Vec<f64> {
    let n = samples.rows().max(1) as f64;
    let mut mean = vec![0.0; samples.cols()];
    for r in 0..samples.rows() {
        for (m, &x) in mean.iter_mut().zip(samples.row(r)) {
            *m += x;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

/// Population standard deviation of each column around `mean`.
pub fn column_std(samples: &Matrix, mean: &[f64]) -> Vec<f64> {
    let n = samples.rows().max(1) as f64;
    let mut var = vec![0.0; samples.cols()];
    for r in 0..samples.rows() {
        for ((v, &x), &m) in var.iter_mut().zip(samples.row(r)).zip(mean) {
            *v += (x - m) * (x - m);
        }
    }
    var.into_iter().map(|v| (v / n).sqrt()).collect()
}

/// Sample covariance (`n - 1` denominator, `1` for a single sample) of the
/// rows of `samples` after subtracting `mean` and dividing by `scale`.
pub fn covariance(samples: &Matrix, mean: &[f64], scale: &[f64]) -> Matrix {
    let d = samples.cols();
    let mut cov = Matrix::new(d, d);
    let mut z = vec![0.0; d];
    for r in 0..samples.rows() {
        for (j, zj) in z.iter_mut().enumerate() {
            *zj = (samples.get(r, j) - mean[j]) / scale[j];
        }
        for i in 0..d {
            for j in i..d {
                cov.set(i, j, cov.get(i, j) + z[i] * z[j]);
            }
        }
    }
    let denom = samples.rows().saturating_sub(1).max(1) as f64;
    for i in 0..d {
        for j in i..d {
            let v = cov.get(i, j) / denom;
            cov.set(i, j, v);
            cov.set(j, i, v);
        }
    }
    cov
}

// ---------------------------------------------------------------------------
// Jacobi symmetric eigenvalue decomposition
// ---------------------------------------------------------------------------

/// Eigenpairs of a symmetric matrix, sorted by decreasing eigenvalue.
#[derive(Debug, Clone)]
pub struct Eigen {
    pub values: Vec<f64>,
    /// `vectors[k]` is the unit eigenvector of `values[k]`.
    pub vectors: Vec<Vec<f64>>,
}

/// Jacobi rotations with largest-off-diagonal pivoting.
///
/// Eigenpairs come back in decreasing eigenvalue order (ties keep their
/// diagonal position) and each eigenvector's first component with magnitude
/// above `1e-12` is made positive.
///
/// # Panics
/// Panics if `mat` is not square.
pub fn symmetric_eigen(mat: &Matrix) -> Eigen {
    let n = mat.rows();
    assert_eq!(n, mat.cols(), "symmetric_eigen requires a square matrix");

    let mut a = mat.clone();
    let mut v = Matrix::identity(n);

    let scale = mat.frobenius_norm();
    let tol = 1e-14 * scale;
    let max_iter = 100 * n * n;

    for _ in 0..max_iter {
        if scale == 0.0 {
            break;
        }
        let mut p = 0;
        let mut q = 0;
        let mut max_off = 0.0_f64;
        for i in 0..n {
            for j in (i + 1)..n {
                let val = a.get(i, j).abs();
                if val > max_off {
                    max_off = val;
                    p = i;
                    q = j;
                }
            }
        }
        if max_off <= tol {
            break;
        }

        let theta = (a.get(q, q) - a.get(p, p)) / (2.0 * a.get(p, q));
        let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
        let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
        let c = 1.0 / (t * t + 1.0).sqrt();
        let s = t * c;

        // A <- A J
        for k in 0..n {
            let (akp, akq) = (a.get(k, p), a.get(k, q));
            a.set(k, p, c * akp - s * akq);
            a.set(k, q, s * akp + c * akq);
        }
        // A <- J^T A
        for k in 0..n {
            let (apk, aqk) = (a.get(p, k), a.get(q, k));
            a.set(p, k, c * apk - s * aqk);
            a.set(q, k, s * apk + c * aqk);
        }
        a.set(p, q, 0.0);
        a.set(q, p, 0.0);
        // V <- V J
        for k in 0..n {
            let (vkp, vkq) = (v.get(k, p), v.get(k, q));
            v.set(k, p, c * vkp - s * vkq);
            v.set(k, q, s * vkp + c * vkq);
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a.get(j, j).total_cmp(&a.get(i, i)).then(i.cmp(&j)));

    let values = order.iter().map(|&i| a.get(i, i)).collect();
    let vectors = order
        .iter()
        .map(|&i| {
            let mut vec = v.column(i);
            if let Some(&lead) = vec.iter().find(|x| x.abs() > 1e-12) {
                if lead < 0.0 {
                    vec.iter_mut().for_each(|x| *x = -*x);
                }
            }
            vec
        })
        .collect();
    Eigen { values, vectors }
}

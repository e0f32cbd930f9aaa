// Natural cubic spline through sparse knots, with the roots of its first derivative.
//
// On segment j the spline is `a + b*t + c*t^2 + d*t^3` with `t = x - x[j]`. The second
// derivative vanishes at both ends.

#[derive(Debug, Clone)]
pub struct CubicSpline {
    knots: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl CubicSpline {
    /// Needs at least two knots with strictly increasing abscissae.
    pub fn natural(xs: &[f64], ys: &[f64]) -> Option<CubicSpline> {
        let n = xs.len();
        if n < 2 || ys.len() != n || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }
        let segments = n - 1;
        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

        // --- 1. Tridiagonal system for the quadratic coefficients ---
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];
        for i in 1..segments {
            let rhs = 3.0 / h[i] * (ys[i + 1] - ys[i]) - 3.0 / h[i - 1] * (ys[i] - ys[i - 1]);
            let l = 2.0 * (xs[i + 1] - xs[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l;
            z[i] = (rhs - h[i - 1] * z[i - 1]) / l;
        }

        // --- 2. Back substitution ---
        let mut c = vec![0.0; n];
        let mut b = vec![0.0; segments];
        let mut d = vec![0.0; segments];
        for j in (0..segments).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            b[j] = (ys[j + 1] - ys[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            d[j] = (c[j + 1] - c[j]) / (3.0 * h[j]);
        }
        c.truncate(segments);

        Some(CubicSpline {
            knots: xs.to_vec(),
            a: ys[..segments].to_vec(),
            b,
            c,
            d,
        })
    }

    fn segment(&self, x: f64) -> usize {
        let last = self.a.len() - 1;
        match self.knots.partition_point(|&k| k <= x) {
            0 => 0,
            i => (i - 1).min(last),
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let j = self.segment(x);
        let t = x - self.knots[j];
        self.a[j] + t * (self.b[j] + t * (self.c[j] + t * self.d[j]))
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let j = self.segment(x);
        let t = x - self.knots[j];
        self.b[j] + t * (2.0 * self.c[j] + t * 3.0 * self.d[j])
    }

    /// Abscissae where the first derivative crosses zero, ascending.
    pub fn derivative_roots(&self) -> Vec<f64> {
        let segments = self.a.len();
        let mut roots = Vec::new();
        for j in 0..segments {
            let width = self.knots[j + 1] - self.knots[j];
            let last = j + 1 == segments;
            for t in quadratic_roots(3.0 * self.d[j], 2.0 * self.c[j], self.b[j]) {
                // Half-open segments so a root on a shared knot is reported once.
                if t >= 0.0 && (t < width || (last && t <= width)) {
                    roots.push(self.knots[j] + t);
                }
            }
        }
        roots
    }
}

/// Real roots of `p*t^2 + q*t + r`, ascending.
fn quadratic_roots(p: f64, q: f64, r: f64) -> Vec<f64> {
    const TINY: f64 = 1e-12;
    if p.abs() < TINY {
        if q.abs() < TINY {
            return Vec::new();
        }
        return vec![-r / q];
    }
    let disc = q * q - 4.0 * p * r;
    if disc < 0.0 {
        return Vec::new();
    }
    let sq = disc.sqrt();
    // Stable form: avoid cancelling q against the square root.
    let k = -0.5 * (q + q.signum() * sq);
    let mut roots = if k.abs() < TINY {
        vec![0.0]
    } else {
        vec![k / p, r / k]
    };
    roots.sort_by(f64::total_cmp);
    roots.dedup();
    roots
}

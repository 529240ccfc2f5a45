use ndarray::{ArrayView1, NdFloat};
use num_traits::{Float, FromPrimitive};

/// Ordinary-least-squares line fit with its goodness of fit.
#[derive(Clone, Copy, Debug)]
pub struct LinearFit<E> {
    pub slope: E,
    pub intercept: E,
    pub r_squared: E,
}

impl<E: NdFloat> LinearFit<E> {
    /// Evaluate the fitted line at `x`.
    #[must_use]
    pub fn predict(&self, x: E) -> E {
        self.slope * x + self.intercept
    }
}

/// Fit `y = slope * x + intercept` by ordinary least squares.
///
/// Returns `None` when the inputs disagree in length, carry fewer than two
/// observations, or when all `x` values coincide (the normal-equation
/// denominator vanishes and no line is determined).
///
/// # Examples
///
/// ```
/// use assay_correction::regression::linear_fit;
/// use ndarray::arr1;
///
/// let x = arr1(&[0.0, 1.0, 2.0, 3.0]);
/// let y = arr1(&[1.0, 3.0, 5.0, 7.0]);
/// let fit = linear_fit(x.view(), y.view()).unwrap();
///
/// approx::assert_relative_eq!(fit.slope, 2.0);
/// approx::assert_relative_eq!(fit.intercept, 1.0);
/// approx::assert_relative_eq!(fit.r_squared, 1.0);
/// ```
pub fn linear_fit<E: NdFloat>(x: ArrayView1<E>, y: ArrayView1<E>) -> Option<LinearFit<E>> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = E::from(x.len())?;
    let sum_x = x.sum();
    let sum_y = y.sum();
    let sum_xy = x.dot(&y);
    let sum_x2 = x.dot(&x);

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < E::from(1e-10)? {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let y_mean = sum_y / n;
    let ss_total = y.iter().map(|&yi| (yi - y_mean) * (yi - y_mean)).fold(E::zero(), |a, b| a + b);
    let ss_residual = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = yi - (slope * xi + intercept);
            r * r
        })
        .fold(E::zero(), |a, b| a + b);

    // A flat response is a perfect fit of a flat line.
    let r_squared = if ss_total == E::zero() {
        E::one()
    } else {
        E::one() - ss_residual / ss_total
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Arithmetic mean of a slice, `None` when empty.
///
/// # Examples
///
/// ```
/// use assay_correction::regression::mean;
///
/// approx::assert_relative_eq!(mean(&[10.0, 12.0, 14.0]).unwrap(), 12.0);
/// assert!(mean::<f64>(&[]).is_none());
/// ```
pub fn mean<E: Float + FromPrimitive>(values: &[E]) -> Option<E> {
    if values.is_empty() {
        return None;
    }
    let n = E::from_usize(values.len())?;
    Some(values.iter().fold(E::zero(), |a, &b| a + b) / n)
}

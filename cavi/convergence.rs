use crate::tensor::IndividualMatrix;

/// Outcome of comparing the mixture tensor against an earlier snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergenceCheck {
    pub converged: bool,
    /// Mean absolute difference of the expected mixture proportions.
    pub change: f64,
}

/// Compares expected proportions `θ / Σθ` entry by entry.
///
/// Both tensors must share the same shape. An empty tensor counts as
/// converged with zero change.
pub fn check_theta_convergence(
    current: &IndividualMatrix,
    previous: &IndividualMatrix,
    tolerance: f64,
) -> ConvergenceCheck {
    let mut total = 0.0;
    let mut entries = 0usize;
    for (now, before) in current.iter().zip(previous.iter()) {
        for (row_now, row_before) in now.rows().into_iter().zip(before.rows()) {
            let sum_now = row_now.sum();
            let sum_before = row_before.sum();
            for (&a, &b) in row_now.iter().zip(row_before.iter()) {
                total += (a / sum_now - b / sum_before).abs();
                entries += 1;
            }
        }
    }
    let change = if entries == 0 {
        0.0
    } else {
        total / entries as f64
    };
    ConvergenceCheck {
        converged: change < tolerance,
        change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn theta() -> IndividualMatrix {
        IndividualMatrix::from_blocks(vec![
            array![[1.0, 3.0], [2.0, 2.0]],
            array![[0.5, 9.5]],
        ])
    }

    #[test]
    fn tensor_compared_with_itself_has_converged() {
        let current = theta();
        let check = check_theta_convergence(&current, &current.clone(), 1e-4);
        assert!(check.converged);
        assert_eq!(check.change, 0.0);
    }

    #[test]
    fn change_is_the_mean_proportion_difference() {
        let previous = theta();
        let mut current = theta();
        // First individual moves from (0.25, 0.75) to (0.75, 0.25).
        current.individual_mut(0, 0).assign(&array![3.0, 1.0]);
        let check = check_theta_convergence(&current, &previous, 1e-4);
        assert_abs_diff_eq!(check.change, (0.5 + 0.5) / 6.0, epsilon = 1e-12);
        assert!(!check.converged);
    }

    #[test]
    fn rescaled_parameters_are_not_a_change() {
        let previous = theta();
        let mut current = theta();
        current.individual_mut(1, 0).mapv_inplace(|v| v * 10.0);
        let check = check_theta_convergence(&current, &previous, 1e-4);
        assert_abs_diff_eq!(check.change, 0.0, epsilon = 1e-15);
    }
}

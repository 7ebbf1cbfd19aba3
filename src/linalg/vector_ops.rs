use faer::{unzip, zip, ColRef};

use crate::E;

/// Inner product of two dense columns.
pub(crate) fn dot(x1: ColRef<'_, E>, x2: ColRef<'_, E>) -> E {
    let mut out = 0.;

    zip!(x1, x2).for_each(|unzip!(x1, x2)| out += *x1 * *x2);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Col;

    #[test]
    fn test_dot() {
        let x1 = Col::from_fn(3, |i| [1., 2., 3.][i]);
        let x2 = Col::from_fn(3, |i| [4., 5., 6.][i]);

        assert_eq!(dot(x1.as_ref(), x2.as_ref()), 32.);
    }
}

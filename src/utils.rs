use crate::model::Theta;
use anyhow::{Context, Result, bail};
use std::{fmt::Debug, ops::RangeBounds};

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }

    Ok(())
}

/// Observation times must be finite and strictly increasing.
pub fn check_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        bail!("at least one observation time is required");
    }
    if let Some(t) = times.iter().find(|t| !t.is_finite()) {
        bail!("observation times must be finite, but found {t}");
    }
    for (i_time, pair) in times.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            bail!(
                "observation times must be strictly increasing, but t[{}] = {} <= t[{}] = {}",
                i_time + 1,
                pair[1],
                i_time,
                pair[0]
            );
        }
    }

    Ok(())
}

pub fn check_theta(theta: &Theta) -> Result<()> {
    let open_unit = f64::MIN_POSITIVE..1.0;
    check_num(theta.mu, open_unit.clone()).context("invalid birth rate")?;
    check_num(theta.delta, open_unit.clone()).context("invalid predation rate")?;
    check_num(theta.nu, open_unit).context("invalid death rate")?;

    Ok(())
}

//! Screen stability polling
//!
//! Samples are taken repeatedly until two consecutive ones differ by no more
//! than [`SCREENSHOT_DIFF_THRESHOLD`] or the deadline passes. Expiry is not an
//! error: the last sample is returned with `stable == false`.

use devrig_core::prelude::*;
use devrig_core::TreeNode;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum fraction of differing pixels or attributes for two samples to match
pub const SCREENSHOT_DIFF_THRESHOLD: f64 = 0.005;

/// Outcome of [`poll_until_stable`]
#[derive(Debug, Clone, PartialEq)]
pub struct Settled<T> {
    pub sample: T,
    pub stable: bool,
}

/// Fraction of bytes that differ; images of different size count as fully different
pub fn screenshot_difference(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() {
        return 1.0;
    }
    if a.is_empty() {
        return 0.0;
    }
    let differing = a.iter().zip(b).filter(|(x, y)| x != y).count();
    differing as f64 / a.len() as f64
}

/// Fraction of nodes, in pre-order, whose attributes differ
pub fn hierarchy_difference(a: &TreeNode, b: &TreeNode) -> f64 {
    let left: Vec<_> = a.iter().collect();
    let right: Vec<_> = b.iter().collect();
    let total = left.len().max(right.len());
    if total == 0 {
        return 0.0;
    }

    let mismatched = left
        .iter()
        .zip(&right)
        .filter(|(x, y)| x.attributes != y.attributes)
        .count();
    let missing = left.len().abs_diff(right.len());

    (mismatched + missing) as f64 / total as f64
}

/// Sample until two consecutive samples are within the threshold
///
/// A failing sample aborts the poll; callers that want to tolerate
/// individual failures fold them into `T`.
pub async fn poll_until_stable<T, S, Fut, D>(
    timeout: Duration,
    interval: Duration,
    mut sample: S,
    difference: D,
) -> Result<Settled<T>>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: Fn(&T, &T) -> f64,
{
    let deadline = Instant::now() + timeout;
    let mut previous = sample().await?;

    loop {
        if Instant::now() >= deadline {
            trace!("Screen did not settle within {:?}", timeout);
            return Ok(Settled {
                sample: previous,
                stable: false,
            });
        }

        tokio::time::sleep(interval).await;
        let current = sample().await?;

        if difference(&previous, &current) <= SCREENSHOT_DIFF_THRESHOLD {
            return Ok(Settled {
                sample: current,
                stable: true,
            });
        }
        previous = current;
    }
}

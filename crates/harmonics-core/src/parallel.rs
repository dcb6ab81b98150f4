//! Parallel iteration switch.
//!
//! With the `threading` feature, iteration goes through rayon; without it the
//! same call sites fall back to sequential std iterators with identical
//! results. Call sites need `rayon::iter::ParallelIterator` in scope under the
//! feature so adaptor methods resolve on both paths.

/// Conditionally parallel consuming iteration (ranges, vectors).
macro_rules! iter_maybe_parallel {
    ($expr:expr) => {{
        #[cfg(feature = "threading")]
        {
            use rayon::iter::IntoParallelIterator;
            IntoParallelIterator::into_par_iter($expr)
        }
        #[cfg(not(feature = "threading"))]
        {
            IntoIterator::into_iter($expr)
        }
    }};
}

pub(crate) use iter_maybe_parallel;

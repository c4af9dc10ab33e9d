/// Bump a counter in the stats module by an arbitrary amount.
///
/// Expands to nothing unless the crate is built with the `stats` feature,
/// so hot paths pay for the bookkeeping only when somebody asked for it.
#[macro_export]
macro_rules! stat_add {
    ($counter:ident, $amount:expr) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add($amount as u64, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Count one event on a stats counter: shorthand for `stat_add!(c, 1)`.
#[macro_export]
macro_rules! stat_inc {
    ($counter:ident) => {
        $crate::stat_add!($counter, 1u64)
    };
}

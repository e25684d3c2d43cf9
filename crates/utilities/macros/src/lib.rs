#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Macros for recording metrics.
//!
//! Every macro expands to nothing unless the *calling* crate enables its own `metrics` feature,
//! so crates can record unconditionally and let the feature decide whether a recorder is
//! involved. The calling crate must depend on `metrics` when the feature is on.

/// Sets a metric value, optionally with a specified label.
#[macro_export]
macro_rules! set {
    ($instrument:ident, $metric:path, $key:expr => $label:expr, $value:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).set($value);
    };
    ($instrument:ident, $metric:path, $value:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).set($value);
    };
}

/// Increments a metric value, optionally with a specified label.
#[macro_export]
macro_rules! inc {
    ($instrument:ident, $metric:path, $key:expr => $label:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).increment(1);
    };
    ($instrument:ident, $metric:path) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).increment(1);
    };
}

/// Decrements a gauge, optionally with a specified label.
#[macro_export]
macro_rules! dec {
    ($instrument:ident, $metric:path, $key:expr => $label:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).decrement(1);
    };
    ($instrument:ident, $metric:path) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).decrement(1);
    };
}

/// Records a value, optionally with a specified label.
#[macro_export]
macro_rules! record {
    ($instrument:ident, $metric:path, $key:expr => $label:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $label).record($amount);
    };
    ($instrument:ident, $metric:path, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).record($amount);
    };
}

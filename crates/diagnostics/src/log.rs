//! Log facade.
//!
//! Hardware builds go through `defmt`, host builds through `tracing`. With
//! neither backend the macros expand to a `format_args!` that is discarded,
//! so arguments still type-check and nothing is emitted.
//!
//! Format strings must stay within `{}` and `{:#x}`, the subset both backends
//! accept. Enums are logged through their `as_str()`.

macro_rules! diag_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
        #[cfg(feature = "tracing")]
        tracing::trace!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! diag_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
        #[cfg(feature = "tracing")]
        tracing::debug!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! diag_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::info!($($arg)*);
        #[cfg(feature = "tracing")]
        tracing::info!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! diag_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);
        #[cfg(feature = "tracing")]
        tracing::warn!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! diag_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::error!($($arg)*);
        #[cfg(feature = "tracing")]
        tracing::error!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

pub(crate) use {diag_debug, diag_error, diag_info, diag_trace, diag_warn};

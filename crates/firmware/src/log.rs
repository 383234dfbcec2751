//! Log facade: `defmt` on the target, `tracing` in the emulator, nothing
//! otherwise. Format strings stay within `{}` and `{:#x}`.

macro_rules! fw_debug {
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

macro_rules! fw_info {
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

macro_rules! fw_warn {
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

macro_rules! fw_error {
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

pub(crate) use {fw_debug, fw_error, fw_info, fw_warn};

//! Macros for building and returning [`crate::error::TapError`] values.

/// Creates a [`crate::error::TapError`] from a kind, a static description and an optional
/// detail.
#[macro_export]
macro_rules! tap_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::TapError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::TapError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::TapError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::tap_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::tap_error!($kind, $desc, $detail))
    };
}

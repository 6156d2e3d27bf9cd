//! Macros for building and returning [`crate::error::AdapterError`] values.

/// Creates an [`crate::error::AdapterError`] from an error kind and a static description.
///
/// Accepts optional dynamic detail (anything implementing [`ToString`], or `detail =` to move an
/// owned [`String`]) and an optional `source:` error.
#[macro_export]
macro_rules! adapter_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::AdapterError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::AdapterError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::AdapterError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::AdapterError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::AdapterError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::AdapterError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Creates an [`crate::error::AdapterError`] and returns it from the current function.
///
/// Supports the same arguments as [`adapter_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::adapter_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::adapter_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::adapter_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::adapter_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}

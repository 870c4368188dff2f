//! Database dispatch macros for reducing code duplication.
//!
//! The vendor-specific handles in [`crate::db::pool`] are enums with one
//! variant per `sqlx` driver. These macros generate the match arms so each
//! call site reads as one line per vendor.

/// Generate match arms over one of the driver enums in [`crate::db::pool`].
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:pat) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

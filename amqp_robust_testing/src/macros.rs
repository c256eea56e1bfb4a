//! Assertion macros shared by integration tests.

/// Await a channel operation and panic with contextual diagnostics on
/// failure.
#[macro_export]
macro_rules! op_expect {
    ($fut:expr) => {{
        $fut.await
            .expect(concat!("channel operation failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $fut.await.expect(&m)
    }};
}

/// Await `$fut`, panicking if it does not finish within `$ms` milliseconds.
#[macro_export]
macro_rules! within {
    ($ms:expr, $fut:expr) => {{
        ::tokio::time::timeout(::std::time::Duration::from_millis($ms), $fut)
            .await
            .expect(concat!("timed out at ", file!(), ":", line!()))
    }};
}

pub use crate::{op_expect, within};

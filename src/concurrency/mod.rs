//! Cancellation primitives shared by the execution context and by the
//! operators that need to observe an in-flight run being cancelled
//! (Delay's sleep, Retry's backoff sleep, HTTP's in-flight request).

pub mod cancel_token;

pub use cancel_token::{CancelScope, CancelToken};

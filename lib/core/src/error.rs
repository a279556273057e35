//! Error handling foundation for callflow.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums next to the code that raises them and wraps them in a rootcause
//! [`Report`] at API boundaries, attaching context as they propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }
}

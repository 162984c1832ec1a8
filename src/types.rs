//! Re-exported types from external crates for convenience.
//!
//! Prices, units and profits in streamed events are exact decimals; these re-exports let callers
//! work with them without adding `rust_decimal` to their own `Cargo.toml`.

/// Arbitrary precision decimal type for rates, units and amounts.
pub use rust_decimal::Decimal;
/// Macro for creating [`Decimal`] literals at compile time.
///
/// # Example
/// ```
/// use etoro_client_sdk::types::dec;
/// let ask = dec!(150.25);
/// ```
pub use rust_decimal_macros::dec;

//! Concrete data-source clients built on [`crate::ResilientClient`].
//!
//! Each client normalizes its upstream's schema into a small typed struct
//! and uses one stable cache key per logical request.

pub mod explorer;
pub mod market;
pub mod protocols;

pub use explorer::{ContractInfo, ExplorerClient};
pub use market::{MarketClient, MarketOverview};
pub use protocols::{ProtocolData, ProtocolDataClient};

/// Parse a number the upstream may send as either a JSON number or a string.
pub(crate) fn lenient_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_f64() {
        assert_eq!(lenient_f64(&json!(2)), Some(2.0));
        assert_eq!(lenient_f64(&json!(" 1.5 ")), Some(1.5));
        assert_eq!(lenient_f64(&json!(null)), None);
        assert_eq!(lenient_f64(&json!("n/a")), None);
    }
}

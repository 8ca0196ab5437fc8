use serde::{Deserialize, Serialize};

use crate::record::Record;

/// One listed or delisted instrument.
///
/// `code` is the 12-character standard code (e.g. `KR7005930003`);
/// `short_code` is the `A`-prefixed six-digit ticker used by KRX screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMaster {
    pub code: String,
    pub short_code: String,
    pub company_name: String,
    pub market_name: String,
}

impl Record for StockMaster {
    type Key = String;

    fn key(&self) -> String {
        self.code.clone()
    }

    fn code(&self) -> &str {
        &self.code
    }
}

/// Normalise a raw KRX ticker into the `A000000` short-code form.
pub fn normalize_short_code(raw: &str) -> String {
    let digits = raw.trim().trim_start_matches('A');
    format!("A{digits:0>6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_code_is_zero_padded_and_prefixed() {
        assert_eq!(normalize_short_code("5930"), "A005930");
        assert_eq!(normalize_short_code("A005930"), "A005930");
        assert_eq!(normalize_short_code(" 35720 "), "A035720");
    }
}

//! Static metadata for the cached tables.

/// Name, origin and key layout of one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    /// Where the flat CSV is published, if anywhere.
    pub remote_url: Option<&'static str>,
    /// Composite key columns, in sort order.
    pub key: &'static [&'static str],
    /// Column parsed as a timestamp on load.
    pub date_column: Option<&'static str>,
    /// Multiplier from the flat file's `listed_stocks_number` to shares.
    /// The published daily-price file counts thousands of shares.
    pub flat_share_unit: i64,
}

impl TableDescriptor {
    pub fn is_dated(&self) -> bool {
        self.date_column.is_some()
    }
}

pub const STOCK_MASTER: TableDescriptor = TableDescriptor {
    name: "stock_master",
    remote_url: Some("https://www.dropbox.com/s/2m8lc1nirln014g/stock_master.csv?dl=1"),
    key: &["code"],
    date_column: None,
    flat_share_unit: 1,
};

pub const STOCK_DAILY_PRICE: TableDescriptor = TableDescriptor {
    name: "stock_daily_price",
    remote_url: Some("https://www.dropbox.com/s/xqcpwavozoyjw4m/stock_daily_price.csv?dl=1"),
    key: &["code", "date"],
    date_column: Some("date"),
    flat_share_unit: 1000,
};

pub const STOCK_MINUTE_PRICE: TableDescriptor = TableDescriptor {
    name: "stock_minute_price",
    remote_url: Some("https://www.dropbox.com/s/x6ledb2y0r4s1tj/stock_minute_price.csv?dl=1"),
    key: &["code", "date"],
    date_column: Some("date"),
    flat_share_unit: 1,
};

/// Investor trends are only ever built from the store, never published.
pub const STOCK_TREND: TableDescriptor = TableDescriptor {
    name: "stock_trend",
    remote_url: None,
    key: &["code", "date"],
    date_column: Some("date"),
    flat_share_unit: 1,
};

pub const ALL_TABLES: [&TableDescriptor; 4] = [
    &STOCK_MASTER,
    &STOCK_DAILY_PRICE,
    &STOCK_MINUTE_PRICE,
    &STOCK_TREND,
];

/// Look a descriptor up by table name.
pub fn descriptor_by_name(name: &str) -> Option<&'static TableDescriptor> {
    ALL_TABLES.into_iter().find(|d| d.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(descriptor_by_name("stock_trend"), Some(&STOCK_TREND));
        assert!(descriptor_by_name("stock_weekly_price").is_none());
    }

    #[test]
    fn only_daily_prices_count_shares_in_thousands() {
        assert_eq!(STOCK_DAILY_PRICE.flat_share_unit, 1000);
        for d in ALL_TABLES.into_iter().filter(|d| d.name != STOCK_DAILY_PRICE.name) {
            assert_eq!(d.flat_share_unit, 1);
        }
    }

    #[test]
    fn dated_tables_key_on_code_and_date() {
        for d in ALL_TABLES.into_iter().filter(|d| d.is_dated()) {
            assert_eq!(d.key, &["code", "date"]);
        }
    }
}

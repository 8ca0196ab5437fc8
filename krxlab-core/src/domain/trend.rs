use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Investor categories reported by the KRX per-instrument trading trend screen.
///
/// Declaration order is the column order used everywhere a trend row is
/// flattened (store columns, CSV export).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Investor {
    Bank,
    Foreigner,
    Government,
    Individual,
    Insurance,
    InvestingOrganization,
    InvestmentTrust,
    OtherCorporation,
    OtherFinance,
    OtherForeigner,
    PensionFund,
    PrivateEquityFund,
}

impl Investor {
    pub const ALL: [Investor; 12] = [
        Investor::Bank,
        Investor::Foreigner,
        Investor::Government,
        Investor::Individual,
        Investor::Insurance,
        Investor::InvestingOrganization,
        Investor::InvestmentTrust,
        Investor::OtherCorporation,
        Investor::OtherFinance,
        Investor::OtherForeigner,
        Investor::PensionFund,
        Investor::PrivateEquityFund,
    ];

    /// Column prefix, e.g. `pension_fund` for `pension_fund_buy`.
    pub fn column_prefix(self) -> &'static str {
        match self {
            Investor::Bank => "bank",
            Investor::Foreigner => "foreigner",
            Investor::Government => "government",
            Investor::Individual => "individual",
            Investor::Insurance => "insurance",
            Investor::InvestingOrganization => "investing_organization",
            Investor::InvestmentTrust => "investment_trust",
            Investor::OtherCorporation => "other_corporation",
            Investor::OtherFinance => "other_finance",
            Investor::OtherForeigner => "other_foreigner",
            Investor::PensionFund => "pension_fund",
            Investor::PrivateEquityFund => "private_equity_fund",
        }
    }

    /// Label KRX prints in the `투자자명` column.
    pub fn krx_label(self) -> &'static str {
        match self {
            Investor::Bank => "은행",
            Investor::Foreigner => "외국인",
            Investor::Government => "국가.지자체",
            Investor::Individual => "개인",
            Investor::Insurance => "보험",
            Investor::InvestingOrganization => "금융투자",
            Investor::InvestmentTrust => "투신",
            Investor::OtherCorporation => "기타법인",
            Investor::OtherFinance => "기타금융",
            Investor::OtherForeigner => "기타외국인",
            Investor::PensionFund => "연기금",
            Investor::PrivateEquityFund => "사모",
        }
    }

    pub fn from_krx_label(label: &str) -> Option<Investor> {
        Investor::ALL
            .into_iter()
            .find(|investor| investor.krx_label() == label.trim())
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Buy/sell volume of one investor category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub buy: i64,
    pub sell: i64,
}

/// Daily buy/sell volume per investor category for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorTrend {
    pub code: String,
    pub date: NaiveDateTime,
    pub flows: [Flow; 12],
}

impl InvestorTrend {
    pub fn new(code: impl Into<String>, date: NaiveDateTime) -> Self {
        Self {
            code: code.into(),
            date,
            flows: [Flow::default(); 12],
        }
    }

    pub fn flow(&self, investor: Investor) -> Flow {
        self.flows[investor.index()]
    }

    pub fn set_flow(&mut self, investor: Investor, flow: Flow) {
        self.flows[investor.index()] = flow;
    }

    /// Flattened `{prefix}_buy`, `{prefix}_sell` column names in store order.
    pub fn flow_columns() -> Vec<String> {
        Investor::ALL
            .iter()
            .flat_map(|investor| {
                let prefix = investor.column_prefix();
                [format!("{prefix}_buy"), format!("{prefix}_sell")]
            })
            .collect()
    }

    /// Flow values in the same order as [`InvestorTrend::flow_columns`].
    pub fn flow_values(&self) -> Vec<i64> {
        self.flows.iter().flat_map(|f| [f.buy, f.sell]).collect()
    }
}

impl Record for InvestorTrend {
    type Key = (String, NaiveDateTime);

    fn key(&self) -> Self::Key {
        (self.code.clone(), self.date)
    }

    fn code(&self) -> &str {
        &self.code
    }

    fn date(&self) -> Option<NaiveDateTime> {
        Some(self.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn labels_round_trip_for_every_category() {
        for investor in Investor::ALL {
            assert_eq!(Investor::from_krx_label(investor.krx_label()), Some(investor));
        }
        assert_eq!(Investor::from_krx_label("합계"), None);
    }

    #[test]
    fn flow_columns_line_up_with_values() {
        let date = NaiveDate::from_ymd_opt(2017, 12, 11)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut trend = InvestorTrend::new("KR7005930003", date);
        trend.set_flow(Investor::PensionFund, Flow { buy: 7, sell: 3 });

        let columns = InvestorTrend::flow_columns();
        let values = trend.flow_values();
        assert_eq!(columns.len(), 24);
        let at = columns.iter().position(|c| c == "pension_fund_buy").unwrap();
        assert_eq!(values[at], 7);
        assert_eq!(values[at + 1], 3);
    }
}

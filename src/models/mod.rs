use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Flow direction ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Export,
    Import,
}

impl FlowDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Export => Self::Import,
            Self::Import => Self::Export,
        }
    }
}

impl fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "export" | "exports" | "exp" => Ok(Self::Export),
            "import" | "imports" | "imp" => Ok(Self::Import),
            other => Err(format!("unknown flow '{other}', expected export or import")),
        }
    }
}

// ── Raw API record ────────────────────────────────────────────────────────────

/// One row of a Comex Stat `general` response.
///
/// Every metric is kept as the raw JSON value: the API sends numbers as
/// strings in some responses and as numbers in others. Coercion happens in
/// the normalizer, never here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<Value>,
    #[serde(default, rename = "monthNumber", skip_serializing_if = "Option::is_none")]
    pub month: Option<Value>,
    #[serde(default, rename = "metricFOB", skip_serializing_if = "Option::is_none")]
    pub fob: Option<Value>,
    #[serde(default, rename = "metricKG", skip_serializing_if = "Option::is_none")]
    pub kg: Option<Value>,
    #[serde(default, rename = "metricFreight", skip_serializing_if = "Option::is_none")]
    pub freight: Option<Value>,
    #[serde(default, rename = "metricInsurance", skip_serializing_if = "Option::is_none")]
    pub insurance: Option<Value>,
    #[serde(default, rename = "metricCIF", skip_serializing_if = "Option::is_none")]
    pub cif: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

// ── Time keys ─────────────────────────────────────────────────────────────────

/// Grouping key of a reporting bucket. `month` is `None` for annual rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeKey {
    pub year: i32,
    pub month: Option<u32>,
}

impl TimeKey {
    pub const fn annual(year: i32) -> Self {
        Self { year, month: None }
    }

    pub const fn monthly(year: i32, month: u32) -> Self {
        Self { year, month: Some(month) }
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(m) => write!(f, "{}-{:02}", self.year, m),
            None => write!(f, "{}", self.year),
        }
    }
}

/// A `YYYY-MM` bound used in API query windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub const fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

// ── Canonical row ─────────────────────────────────────────────────────────────

/// Normalized trade row. Every metric is a finite number; absent values are 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub time_key: TimeKey,
    pub export_fob: f64,
    pub export_kg: f64,
    pub import_fob: f64,
    pub import_kg: f64,
    pub import_freight: f64,
    pub import_insurance: f64,
    pub import_cif: f64,
}

impl CanonicalRow {
    pub const fn zeroed(time_key: TimeKey) -> Self {
        Self {
            time_key,
            export_fob: 0.0,
            export_kg: 0.0,
            import_fob: 0.0,
            import_kg: 0.0,
            import_freight: 0.0,
            import_insurance: 0.0,
            import_cif: 0.0,
        }
    }

    /// Add every metric of `other` into `self`, keeping `self.time_key`.
    pub fn absorb(&mut self, other: &CanonicalRow) {
        self.export_fob += other.export_fob;
        self.export_kg += other.export_kg;
        self.import_fob += other.import_fob;
        self.import_kg += other.import_kg;
        self.import_freight += other.import_freight;
        self.import_insurance += other.import_insurance;
        self.import_cif += other.import_cif;
    }

    pub fn metrics(&self) -> [f64; 7] {
        [
            self.export_fob,
            self.export_kg,
            self.import_fob,
            self.import_kg,
            self.import_freight,
            self.import_insurance,
            self.import_cif,
        ]
    }

    pub fn fob(&self, flow: FlowDirection) -> f64 {
        match flow {
            FlowDirection::Export => self.export_fob,
            FlowDirection::Import => self.import_fob,
        }
    }

    pub fn kg(&self, flow: FlowDirection) -> f64 {
        match flow {
            FlowDirection::Export => self.export_kg,
            FlowDirection::Import => self.import_kg,
        }
    }
}

// ── Periods ───────────────────────────────────────────────────────────────────

const MONTH_ABBREV: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub fn month_abbrev(month: u32) -> &'static str {
    match month {
        1..=12 => MONTH_ABBREV[(month - 1) as usize],
        _ => "?",
    }
}

/// Reporting period of an aggregated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Year(i32),
    PartialYear { year: i32, from_month: u32, to_month: u32 },
}

impl Period {
    pub const fn year(&self) -> i32 {
        match self {
            Self::Year(y) => *y,
            Self::PartialYear { year, .. } => *year,
        }
    }

    pub const fn months(&self) -> Option<(u32, u32)> {
        match self {
            Self::Year(_) => None,
            Self::PartialYear { from_month, to_month, .. } => Some((*from_month, *to_month)),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year(y) => write!(f, "{y}"),
            Self::PartialYear { year, from_month, to_month } => write!(
                f,
                "{} ({}-{})",
                year,
                month_abbrev(*from_month),
                month_abbrev(*to_month)
            ),
        }
    }
}

// ── Price unit ────────────────────────────────────────────────────────────────

/// Unit the average price is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    #[default]
    PerKilogram,
    PerTon,
}

impl PriceUnit {
    /// Kilograms in one pricing unit.
    pub const fn kg_per_unit(self) -> f64 {
        match self {
            Self::PerKilogram => 1.0,
            Self::PerTon => 1000.0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerKilogram => "per_kilogram",
            Self::PerTon => "per_ton",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::PerKilogram => "US$ FOB/KG",
            Self::PerTon => "US$ FOB/t",
        }
    }
}

impl fmt::Display for PriceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_kilogram" | "kg" | "per_kg" => Ok(Self::PerKilogram),
            "per_ton" | "ton" | "t" => Ok(Self::PerTon),
            other => Err(format!("unknown price unit '{other}', expected kg or ton")),
        }
    }
}

// ── Aggregated row ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub period: Period,
    pub export_fob: f64,
    pub export_kg: f64,
    pub import_fob: f64,
    pub import_kg: f64,
    pub import_freight: f64,
    pub import_insurance: f64,
    pub import_cif: f64,
    pub trade_balance_fob: f64,
    pub trade_balance_kg: f64,
    pub avg_price_export: f64,
    pub avg_price_import: f64,
    pub price_unit: PriceUnit,
}

// ── Supplementary outputs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryShare {
    pub country: String,
    pub fob: f64,
    pub share_pct: f64,
}

/// Trailing-window sum ending at (`year`, `month`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingPoint {
    pub year: i32,
    pub month: u32,
    pub window_sum: f64,
}

/// Latest period the statistics API has published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUpdate {
    pub updated: String,
    pub year: i32,
    pub month: u32,
}

impl LastUpdate {
    pub const fn through(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }
}

// ── NCM code ──────────────────────────────────────────────────────────────────

/// An 8-digit NCM product code. Only constructible through [`NcmCode::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NcmCode(String);

impl NcmCode {
    pub const LEN: usize = 8;

    /// Normalize a raw code: `"1234.56.78"`, `" 12345678 "` and the spreadsheet
    /// float rendering `"12345678.0"` all yield `12345678`. Anything that does
    /// not leave exactly 8 digits is rejected; codes are never padded or cut.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut s = raw.trim();
        if let Some((int_part, frac)) = s.split_once('.') {
            let plain_int = !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit());
            if plain_int && !frac.is_empty() && frac.chars().all(|c| c == '0') {
                s = int_part;
            }
        }
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == Self::LEN {
            Some(Self(digits))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `1234.56.78` display form.
    pub fn dotted(&self) -> String {
        format!("{}.{}.{}", &self.0[..4], &self.0[4..6], &self.0[6..])
    }
}

impl fmt::Display for NcmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NcmCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("'{s}' is not an 8-digit NCM code"))
    }
}

impl TryFrom<String> for NcmCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NcmCode> for String {
    fn from(code: NcmCode) -> Self {
        code.0
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// One row of an ownership registry sheet, keyed by its normalized code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub sheet: String,
    pub ncm: NcmCode,
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ncm_parse_accepts_separators_and_float_rendering() {
        assert_eq!(NcmCode::parse("1234.56.78").unwrap().as_str(), "12345678");
        assert_eq!(NcmCode::parse(" 12345678 ").unwrap().as_str(), "12345678");
        assert_eq!(NcmCode::parse("12345678.0").unwrap().as_str(), "12345678");
        assert_eq!(NcmCode::parse("0101.21.00").unwrap().as_str(), "01012100");
    }

    #[test]
    fn test_ncm_parse_rejects_wrong_length() {
        assert!(NcmCode::parse("bad").is_none());
        assert!(NcmCode::parse("").is_none());
        assert!(NcmCode::parse("1012100").is_none());
        assert!(NcmCode::parse("123456789").is_none());
        assert!(NcmCode::parse("12345678.5").is_none());
    }

    #[test]
    fn test_ncm_dotted() {
        let code = NcmCode::parse("39269090").unwrap();
        assert_eq!(code.dotted(), "3926.90.90");
        assert_eq!(code.to_string(), "39269090");
    }

    #[test]
    fn test_period_label_and_order() {
        assert_eq!(Period::Year(2024).to_string(), "2024");
        let partial = Period::PartialYear { year: 2025, from_month: 1, to_month: 6 };
        assert_eq!(partial.to_string(), "2025 (Jan-Jun)");
        assert!(Period::Year(2023) < Period::Year(2024));
    }

    #[test]
    fn test_trade_record_ignores_unknown_fields() {
        let raw = r#"{"year":"2023","monthNumber":"04","metricFOB":"1000","metricKG":100,"coNcm":"39269090"}"#;
        let rec: TradeRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.year, Some(Value::String("2023".into())));
        assert_eq!(rec.kg, Some(serde_json::json!(100)));
        assert!(rec.freight.is_none());
        assert!(rec.country.is_none());
    }

    #[test]
    fn test_flow_from_str() {
        assert_eq!("Export".parse::<FlowDirection>().unwrap(), FlowDirection::Export);
        assert_eq!("imp".parse::<FlowDirection>().unwrap(), FlowDirection::Import);
        assert!("both".parse::<FlowDirection>().is_err());
    }
}

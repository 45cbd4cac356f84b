use crate::error::{AppError, AppResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DEFAULT_LOCALE: &str = "en-ID";
const DEFAULT_CURRENCY: &str = "IDR";
const DEFAULT_LOW_PRICE_SOURCE: &str = "searchForm";

/// Trip type, coded the way the search API numbers it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
    Multi,
}

impl TripType {
    pub fn code(self) -> u8 {
        match self {
            TripType::OneWay => 1,
            TripType::RoundTrip => 2,
            TripType::Multi => 3,
        }
    }

    /// Short form used in search URLs and the signing payload
    pub fn short(self) -> &'static str {
        match self {
            TripType::OneWay => "OW",
            TripType::RoundTrip => "RT",
            TripType::Multi => "MT",
        }
    }

    /// Lenient parse; anything unrecognised is a round trip
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "ONE_WAY" | "ONEWAY" | "OW" | "1" => TripType::OneWay,
            "MULTI" | "MULTI_CITY" | "MT" | "3" => TripType::Multi,
            _ => TripType::RoundTrip,
        }
    }
}

/// Cabin class. Its codes are a separate scheme from [`TripType::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    Economy,
    Business,
    First,
}

impl CabinClass {
    pub fn code(self) -> u8 {
        match self {
            CabinClass::Economy => 1,
            CabinClass::Business => 4,
            CabinClass::First => 8,
        }
    }

    /// Single-letter fare class used in search URLs
    pub fn letter(self) -> &'static str {
        match self {
            CabinClass::Economy => "Y",
            CabinClass::Business => "C",
            CabinClass::First => "F",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CabinClass::Economy => "Economy",
            CabinClass::Business => "Business",
            CabinClass::First => "First",
        }
    }

    /// Inverse of [`CabinClass::code`]; unknown codes are economy
    pub fn from_code(code: u8) -> Self {
        match code {
            4 => CabinClass::Business,
            8 => CabinClass::First,
            _ => CabinClass::Economy,
        }
    }

    /// Lenient parse; anything unrecognised is economy
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "BUSINESS" | "C" | "4" => CabinClass::Business,
            "FIRST" | "F" | "8" => CabinClass::First,
            _ => CabinClass::Economy,
        }
    }
}

/// A code given either as a name or a number in request JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Number(i64),
    Text(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Text(s) => f.write_str(s),
        }
    }
}

/// Search parameters as they arrive over HTTP, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInput {
    #[serde(alias = "origin")]
    pub dcity: Option<String>,
    #[serde(alias = "destination")]
    pub acity: Option<String>,
    pub dairport: Option<String>,
    pub aairport: Option<String>,
    #[serde(alias = "departDate")]
    pub ddate: Option<String>,
    #[serde(alias = "returnDate")]
    pub rdate: Option<String>,
    #[serde(alias = "triptype")]
    pub trip_type: Option<Token>,
    #[serde(alias = "class")]
    pub cabin_class: Option<Token>,
    pub adult: Option<i64>,
    pub child: Option<i64>,
    pub infant: Option<i64>,
    pub locale: Option<String>,
    pub currency: Option<String>,
    pub low_price_source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Passengers {
    pub adult: u8,
    pub child: u8,
    pub infant: u8,
}

/// Validated flight search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub origin_airport: Option<String>,
    pub destination_airport: Option<String>,
    pub depart_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub trip_type: TripType,
    pub cabin_class: CabinClass,
    pub passengers: Passengers,
    pub locale: String,
    pub currency: String,
    pub low_price_source: String,
}

impl SearchRequest {
    /// Language part of the locale (`en` for `en-ID`)
    pub fn language(&self) -> &str {
        self.locale.split('-').next().unwrap_or(&self.locale)
    }

    /// True when the request describes an outbound plus a return leg
    pub fn has_return_leg(&self) -> bool {
        self.trip_type == TripType::RoundTrip && self.return_date.is_some()
    }
}

impl TryFrom<SearchInput> for SearchRequest {
    type Error = AppError;

    fn try_from(input: SearchInput) -> AppResult<Self> {
        let origin = location_code("dcity", input.dcity)?;
        let destination = location_code("acity", input.acity)?;
        if origin == destination {
            return Err(AppError::InvalidInput(format!(
                "dcity and acity must differ (both {})",
                origin
            )));
        }

        let origin_airport = optional_code("dairport", input.dairport)?;
        let destination_airport = optional_code("aairport", input.aairport)?;

        let depart_date = match input.ddate.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_date("ddate", raw)?,
            _ => return Err(AppError::InvalidInput("ddate is required".to_string())),
        };
        let return_date = match input.rdate.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(parse_date("rdate", raw)?),
            _ => None,
        };
        if let Some(rdate) = return_date {
            if rdate < depart_date {
                return Err(AppError::InvalidInput(format!(
                    "rdate {} is before ddate {}",
                    rdate, depart_date
                )));
            }
        }

        let trip_type = match &input.trip_type {
            Some(token) => TripType::from_token(&token.to_string()),
            None if return_date.is_some() => TripType::RoundTrip,
            None => TripType::OneWay,
        };
        let cabin_class = input
            .cabin_class
            .as_ref()
            .map(|token| CabinClass::from_token(&token.to_string()))
            .unwrap_or(CabinClass::Economy);

        let adult = count("adult", input.adult.unwrap_or(1), 1)?;
        let child = count("child", input.child.unwrap_or(0), 0)?;
        let infant = count("infant", input.infant.unwrap_or(0), 0)?;
        if infant > adult {
            return Err(AppError::InvalidInput(format!(
                "{} infants need at least as many adults (got {})",
                infant, adult
            )));
        }

        let locale = non_blank(input.locale).unwrap_or_else(|| DEFAULT_LOCALE.to_string());
        let currency = match non_blank(input.currency) {
            Some(c) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()) => {
                c.to_ascii_uppercase()
            }
            Some(c) => {
                return Err(AppError::InvalidInput(format!(
                    "currency must be a 3-letter code, got {:?}",
                    c
                )))
            }
            None => DEFAULT_CURRENCY.to_string(),
        };
        let low_price_source = non_blank(input.low_price_source)
            .unwrap_or_else(|| DEFAULT_LOW_PRICE_SOURCE.to_string());

        Ok(SearchRequest {
            origin,
            destination,
            origin_airport,
            destination_airport,
            depart_date,
            return_date,
            trip_type,
            cabin_class,
            passengers: Passengers {
                adult,
                child,
                infant,
            },
            locale,
            currency,
            low_price_source,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn location_code(field: &str, value: Option<String>) -> AppResult<String> {
    match optional_code(field, value)? {
        Some(code) => Ok(code),
        None => Err(AppError::InvalidInput(format!("{} is required", field))),
    }
}

fn optional_code(field: &str, value: Option<String>) -> AppResult<Option<String>> {
    let Some(code) = non_blank(value) else {
        return Ok(None);
    };
    if !(2..=4).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::InvalidInput(format!(
            "{} must be a 2-4 letter code, got {:?}",
            field, code
        )));
    }
    Ok(Some(code.to_ascii_uppercase()))
}

fn parse_date(field: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
        AppError::InvalidInput(format!("{} must be YYYY-MM-DD, got {:?}", field, raw))
    })
}

fn count(field: &str, value: i64, min: i64) -> AppResult<u8> {
    if value < min || value > 9 {
        return Err(AppError::InvalidInput(format!(
            "{} must be between {} and 9, got {}",
            field, min, value
        )));
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: serde_json::Value) -> SearchInput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn trip_and_cabin_codes_use_separate_schemes() {
        let trips: Vec<u8> = [TripType::OneWay, TripType::RoundTrip, TripType::Multi]
            .iter()
            .map(|t| t.code())
            .collect();
        let cabins: Vec<u8> = [CabinClass::Economy, CabinClass::Business, CabinClass::First]
            .iter()
            .map(|c| c.code())
            .collect();
        assert_eq!(trips, vec![1, 2, 3]);
        assert_eq!(cabins, vec![1, 4, 8]);

        for cabin in [CabinClass::Economy, CabinClass::Business, CabinClass::First] {
            assert_eq!(CabinClass::from_code(cabin.code()), cabin);
        }
        assert_eq!(CabinClass::from_code(2), CabinClass::Economy);
    }

    #[test]
    fn unknown_tokens_fall_back_to_round_trip_economy() {
        assert_eq!(TripType::from_token("SPACESHIP"), TripType::RoundTrip);
        assert_eq!(TripType::from_token(""), TripType::RoundTrip);
        assert_eq!(CabinClass::from_token("premium-ish"), CabinClass::Economy);
        assert_eq!(TripType::from_token("one-way"), TripType::OneWay);
        assert_eq!(TripType::from_token("mt"), TripType::Multi);
        assert_eq!(CabinClass::from_token("c"), CabinClass::Business);
        assert_eq!(CabinClass::from_token("FIRST"), CabinClass::First);
    }

    #[test]
    fn validates_and_normalizes_a_round_trip() {
        let req = SearchRequest::try_from(input(serde_json::json!({
            "dcity": "jkt",
            "acity": "sin",
            "ddate": "2026-02-01",
            "rdate": "2026-02-03",
            "adult": 1
        })))
        .unwrap();

        assert_eq!(req.origin, "JKT");
        assert_eq!(req.destination, "SIN");
        assert_eq!(req.trip_type, TripType::RoundTrip);
        assert_eq!(req.cabin_class, CabinClass::Economy);
        assert_eq!(req.locale, "en-ID");
        assert_eq!(req.language(), "en");
        assert_eq!(req.currency, "IDR");
        assert!(req.has_return_leg());
    }

    #[test]
    fn numeric_trip_type_tokens_are_accepted() {
        let req = SearchRequest::try_from(input(serde_json::json!({
            "dcity": "JKT",
            "acity": "SIN",
            "ddate": "2026-02-01",
            "tripType": 1,
            "cabinClass": "BUSINESS"
        })))
        .unwrap();
        assert_eq!(req.trip_type, TripType::OneWay);
        assert_eq!(req.cabin_class, CabinClass::Business);
        assert!(!req.has_return_leg());
    }

    #[test]
    fn rejects_missing_and_malformed_fields() {
        let cases = [
            serde_json::json!({ "acity": "SIN", "ddate": "2026-02-01" }),
            serde_json::json!({ "dcity": "JKT", "acity": "SIN" }),
            serde_json::json!({ "dcity": "JKT", "acity": "SIN", "ddate": "01/02/2026" }),
            serde_json::json!({ "dcity": "JKT", "acity": "SIN", "ddate": "2026-02-01", "adult": 0 }),
            serde_json::json!({ "dcity": "J1", "acity": "SIN", "ddate": "2026-02-01" }),
            serde_json::json!({ "dcity": "JKT", "acity": "JKT", "ddate": "2026-02-01" }),
            serde_json::json!({
                "dcity": "JKT", "acity": "SIN", "ddate": "2026-02-03", "rdate": "2026-02-01"
            }),
            serde_json::json!({
                "dcity": "JKT", "acity": "SIN", "ddate": "2026-02-01", "adult": 1, "infant": 2
            }),
            serde_json::json!({
                "dcity": "JKT", "acity": "SIN", "ddate": "2026-02-01", "currency": "RUPIAH"
            }),
        ];

        for case in cases {
            let err = SearchRequest::try_from(input(case.clone())).unwrap_err();
            assert!(
                matches!(err, AppError::InvalidInput(_)),
                "expected validation error for {}",
                case
            );
        }
    }
}

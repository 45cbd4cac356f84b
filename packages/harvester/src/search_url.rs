//! Conversions between search URLs (`/flights/showfarefirst?...`) and
//! [`SearchRequest`].

use crate::error::{AppError, AppResult};
use crate::search::{SearchInput, SearchRequest, Token, DATE_FORMAT};
use std::collections::HashMap;
use url::Url;

const DEFAULT_HOST: &str = "id.trip.com";

/// A parsed search page URL
#[derive(Debug, Clone, PartialEq)]
pub struct SearchUrl {
    pub url: String,
    pub host: String,
    /// First host label, e.g. `id` for `id.trip.com`
    pub region: String,
    pub request: SearchRequest,
}

impl SearchUrl {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let parsed = Url::parse(raw)
            .map_err(|e| AppError::InvalidInput(format!("invalid url {:?}: {}", raw, e)))?;
        let host = parsed.host_str().unwrap_or(DEFAULT_HOST).to_ascii_lowercase();
        let region = host.split('.').next().unwrap_or("id").to_string();

        let mut query: HashMap<String, String> = HashMap::new();
        for (key, value) in parsed.query_pairs() {
            query.entry(key.to_ascii_lowercase()).or_insert_with(|| value.into_owned());
        }
        let param = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();

        let input = SearchInput {
            dcity: param("dcity"),
            acity: param("acity"),
            dairport: param("dairport"),
            aairport: param("aairport"),
            ddate: param("ddate"),
            rdate: param("rdate"),
            trip_type: Some(Token::Text(param("triptype").unwrap_or_else(|| "rt".to_string()))),
            cabin_class: Some(Token::Text(param("class").unwrap_or_else(|| "y".to_string()))),
            adult: count(&query, "quantity")?,
            child: count(&query, "childqty")?,
            infant: count(&query, "babyqty")?,
            locale: Some(
                param("locale").unwrap_or_else(|| format!("en-{}", region.to_ascii_uppercase())),
            ),
            currency: Some(param("curr").unwrap_or_else(|| {
                if region == "id" { "IDR" } else { "USD" }.to_string()
            })),
            low_price_source: param("lowpricesource"),
        };

        Ok(SearchUrl {
            url: raw.to_string(),
            host,
            region,
            request: SearchRequest::try_from(input)?,
        })
    }

    /// `https://<host>`
    pub fn origin(&self) -> String {
        format!("https://{}", self.host)
    }
}

fn count(query: &HashMap<String, String>, key: &str) -> AppResult<Option<i64>> {
    match query.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| AppError::InvalidInput(format!("{} must be an integer, got {:?}", key, v))),
    }
}

/// Search page URL that gives the signing functions their page context
pub fn context_url(base: &str, req: &SearchRequest) -> AppResult<String> {
    let mut url = Url::parse(&format!("{}/showfarefirst", base.trim_end_matches('/')))
        .map_err(|e| AppError::InvalidInput(format!("invalid base url {:?}: {}", base, e)))?;

    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("pagesource", "list")
            .append_pair("lowpricesource", &req.low_price_source)
            .append_pair("triptype", req.trip_type.short())
            .append_pair("class", req.cabin_class.letter())
            .append_pair("quantity", &req.passengers.adult.to_string())
            .append_pair("childqty", &req.passengers.child.to_string())
            .append_pair("babyqty", &req.passengers.infant.to_string())
            .append_pair("dcity", &req.origin.to_ascii_lowercase())
            .append_pair("acity", &req.destination.to_ascii_lowercase())
            .append_pair("ddate", &req.depart_date.format(DATE_FORMAT).to_string())
            .append_pair("locale", &req.locale)
            .append_pair("curr", &req.currency);
        if let Some(airport) = &req.origin_airport {
            pairs.append_pair("dairport", airport);
        }
        if let Some(airport) = &req.destination_airport {
            pairs.append_pair("aairport", airport);
        }
        if let Some(rdate) = req.return_date {
            pairs.append_pair("rdate", &rdate.format(DATE_FORMAT).to_string());
        }
    }

    Ok(url.into())
}

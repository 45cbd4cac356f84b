//! Canonical search payload.
//!
//! Mirrors the nested request object the flight search API expects. The
//! `head.extension` list is positional and feeds the content digest, so its
//! order is fixed here and must not be re-sorted.

use crate::search::{SearchRequest, DATE_FORMAT};
use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PAGE_ID: &str = "10320667452";
const APP_ID: &str = "700020";
const X_UA: &str = "v=3_os=ONLINE_osv=10";

const DEFAULT_AB_TESTS: [(&str, &str); 4] = [
    ("250811_IBU_wjrankol", "A"),
    ("250806_IBU_FiltersOpt", "A"),
    ("250812_IBU_FiltersOp2", "A"),
    ("251023_IBU_pricetool", "D"),
];

/// Identifiers scoped to one browser session / one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIds {
    pub batch_id: String,
    pub transaction_id: String,
    pub client_id: String,
    pub visitor_id: String,
    pub page_id: String,
    pub client_time: String,
}

impl SessionIds {
    /// 14 random digits, the shape of the site's GUID cookie
    pub fn generate_client_id() -> String {
        let mut rng = rand::thread_rng();
        (0..14)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    /// `<epoch-ms>.<12 alphanumerics>`, the shape of the UBT_VID cookie
    pub fn generate_visitor_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        format!("{}.{}", Utc::now().timestamp_millis(), suffix)
    }

    /// `1-mf-YYYYMMDDHHMMSSmmm-WEB`
    pub fn generate_transaction_id() -> String {
        format!("1-mf-{}-WEB", Utc::now().format("%Y%m%d%H%M%S%3f"))
    }
}

/// Session ids as supplied by a caller; gaps are generated
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdsInput {
    pub batch_id: Option<String>,
    pub transaction_id: Option<String>,
    pub client_id: Option<String>,
    pub visitor_id: Option<String>,
    pub page_id: Option<String>,
    pub client_time: Option<String>,
}

impl SessionIdsInput {
    pub fn resolve(self) -> SessionIds {
        SessionIds {
            batch_id: self
                .batch_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            transaction_id: self
                .transaction_id
                .unwrap_or_else(SessionIds::generate_transaction_id),
            client_id: self.client_id.unwrap_or_else(SessionIds::generate_client_id),
            visitor_id: self
                .visitor_id
                .unwrap_or_else(SessionIds::generate_visitor_id),
            page_id: self.page_id.unwrap_or_else(|| DEFAULT_PAGE_ID.to_string()),
            client_time: self
                .client_time
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPayload {
    pub mode: u8,
    pub search_criteria: SearchCriteria,
    pub sort_info_type: SortInfo,
    pub tag_list: Vec<String>,
    pub flag_list: Vec<String>,
    pub filter_type: FilterType,
    pub abt_list: Vec<AbTest>,
    pub head: Head,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub grade: u8,
    pub real_grade: u8,
    pub trip_type: u8,
    pub journey_no: u8,
    pub passenger_info_type: PassengerInfo,
    pub journey_info_types: Vec<JourneyInfo>,
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerInfo {
    pub adult_count: u8,
    pub child_count: u8,
    pub infant_count: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyInfo {
    pub journey_no: u8,
    pub depart_date: String,
    pub depart_code: String,
    pub arrive_code: String,
    pub depart_airport: String,
    pub arrive_airport: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortInfo {
    pub direction: bool,
    pub order_by: String,
    pub top_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterType {
    pub filter_flag_types: Vec<String>,
    pub query_item_settings: Vec<String>,
    pub students_selected_status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbTest {
    pub ab_code: String,
    pub ab_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub cid: String,
    pub ctok: String,
    pub cver: String,
    pub lang: String,
    pub sid: String,
    pub syscode: String,
    pub auth: String,
    pub xsid: String,
    pub extension: Extensions,
    #[serde(rename = "Locale")]
    pub locale: String,
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    pub appid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Ordered name/value metadata. Lookups return the first entry for a name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(Vec<Extension>);

impl Extensions {
    pub fn push(&mut self, name: &str, value: Option<&str>) {
        self.0.push(Extension {
            name: name.to_string(),
            value: value.map(str::to_string),
        });
    }

    /// Value of the first entry named `name`; entries without a value read as ""
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|ext| ext.name == name)
            .map(|ext| ext.value.as_deref().unwrap_or(""))
    }

    /// Like [`Extensions::get`] but treats an empty value as absent
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    #[cfg(test)]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|ext| ext.name.as_str())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build the canonical payload for a search. Pure: identical inputs produce
/// identical payloads.
pub fn build(req: &SearchRequest, ids: &SessionIds) -> CanonicalPayload {
    let mut journeys = vec![journey(
        1,
        &req.depart_date.format(DATE_FORMAT).to_string(),
        (req.origin.as_str(), req.origin_airport.as_deref()),
        (req.destination.as_str(), req.destination_airport.as_deref()),
    )];

    if let (true, Some(rdate)) = (req.has_return_leg(), req.return_date) {
        journeys.push(journey(
            2,
            &rdate.format(DATE_FORMAT).to_string(),
            (req.destination.as_str(), req.destination_airport.as_deref()),
            (req.origin.as_str(), req.origin_airport.as_deref()),
        ));
    }

    CanonicalPayload {
        mode: 0,
        search_criteria: SearchCriteria {
            grade: 3,
            real_grade: req.cabin_class.code(),
            trip_type: req.trip_type.code(),
            journey_no: 1,
            passenger_info_type: PassengerInfo {
                adult_count: req.passengers.adult,
                child_count: req.passengers.child,
                infant_count: req.passengers.infant,
            },
            journey_info_types: journeys,
            policy_id: None,
        },
        sort_info_type: SortInfo {
            direction: true,
            order_by: "Direct".to_string(),
            top_list: Vec::new(),
        },
        tag_list: Vec::new(),
        flag_list: vec!["NEED_RESET_SORT".to_string()],
        filter_type: FilterType {
            filter_flag_types: Vec::new(),
            query_item_settings: Vec::new(),
            students_selected_status: true,
        },
        abt_list: DEFAULT_AB_TESTS
            .iter()
            .map(|(code, version)| AbTest {
                ab_code: code.to_string(),
                ab_version: version.to_string(),
            })
            .collect(),
        head: Head {
            cid: ids.client_id.clone(),
            ctok: String::new(),
            cver: "3".to_string(),
            lang: "01".to_string(),
            sid: "8888".to_string(),
            syscode: "40".to_string(),
            auth: String::new(),
            xsid: String::new(),
            extension: extensions(req, ids),
            locale: req.locale.clone(),
            language: req.language().to_string(),
            currency: req.currency.clone(),
            client_id: String::new(),
            appid: APP_ID.to_string(),
        },
    }
}

fn journey(
    journey_no: u8,
    date: &str,
    (from_city, from_airport): (&str, Option<&str>),
    (to_city, to_airport): (&str, Option<&str>),
) -> JourneyInfo {
    // An explicit airport replaces the city code rather than refining it
    JourneyInfo {
        journey_no,
        depart_date: date.to_string(),
        depart_code: if from_airport.is_some() { String::new() } else { from_city.to_string() },
        arrive_code: if to_airport.is_some() { String::new() } else { to_city.to_string() },
        depart_airport: from_airport.unwrap_or_default().to_string(),
        arrive_airport: to_airport.unwrap_or_default().to_string(),
    }
}

fn extensions(req: &SearchRequest, ids: &SessionIds) -> Extensions {
    let mut ext = Extensions::default();
    ext.push("source", Some("ONLINE"));
    ext.push("sotpGroup", Some("Trip"));
    ext.push("sotpLocale", Some(&req.locale));
    ext.push("sotpCurrency", Some(&req.currency));
    ext.push("allianceID", Some("0"));
    ext.push("sid", Some("0"));
    ext.push("ouid", Some(""));
    ext.push("uuid", None);
    ext.push("useDistributionType", Some("1"));
    ext.push("flt_app_session_transactionId", Some(&ids.transaction_id));
    ext.push("vid", Some(&ids.visitor_id));
    ext.push("pvid", Some("1"));
    ext.push("Flt_SessionId", Some("1"));
    ext.push("channel", None);
    ext.push("x-ua", Some(X_UA));
    ext.push("PageId", Some(&ids.page_id));
    ext.push("clientTime", Some(&ids.client_time));
    ext.push("LowPriceSource", Some(&req.low_price_source));
    ext.push("Flt_BatchId", Some(&ids.batch_id));
    ext.push("BlockTokenTimeout", Some("0"));
    ext.push("full_link_time_scene", Some("pure_list_page"));
    ext.push("xproduct", Some("baggage"));
    ext.push("units", Some("METRIC"));
    ext.push("sotpUnit", Some("METRIC"));
    ext
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::search::SearchInput;

    pub(crate) fn fixed_ids() -> SessionIds {
        SessionIds {
            batch_id: "6f1c2a7e-0000-4000-8000-000000000001".to_string(),
            transaction_id: "1-mf-20260101120000000-WEB".to_string(),
            client_id: "09034177410240".to_string(),
            visitor_id: "1767225600000.abcdefghijkl".to_string(),
            page_id: DEFAULT_PAGE_ID.to_string(),
            client_time: "2026-01-01T12:00:00.000Z".to_string(),
        }
    }

    pub(crate) fn jkt_sin_round_trip() -> SearchRequest {
        let input: SearchInput = serde_json::from_value(serde_json::json!({
            "dcity": "JKT",
            "acity": "SIN",
            "ddate": "2026-02-01",
            "rdate": "2026-02-03",
            "adult": 1
        }))
        .unwrap();
        SearchRequest::try_from(input).unwrap()
    }

    #[test]
    fn round_trip_has_reversed_second_segment() {
        let payload = build(&jkt_sin_round_trip(), &fixed_ids());
        let journeys = &payload.search_criteria.journey_info_types;

        assert_eq!(journeys.len(), 2);
        assert_eq!(journeys[0].depart_code, "JKT");
        assert_eq!(journeys[0].arrive_code, "SIN");
        assert_eq!(journeys[0].depart_date, "2026-02-01");
        assert_eq!(journeys[1].journey_no, 2);
        assert_eq!(journeys[1].depart_code, "SIN");
        assert_eq!(journeys[1].arrive_code, "JKT");
        assert_eq!(journeys[1].depart_date, "2026-02-03");
        assert_eq!(payload.search_criteria.trip_type, 2);
        assert_eq!(payload.search_criteria.real_grade, 1);
    }

    #[test]
    fn one_way_has_a_single_segment() {
        let mut req = jkt_sin_round_trip();
        req.trip_type = crate::search::TripType::OneWay;
        let payload = build(&req, &fixed_ids());
        assert_eq!(payload.search_criteria.journey_info_types.len(), 1);
        assert_eq!(payload.search_criteria.trip_type, 1);
    }

    #[test]
    fn airports_replace_city_codes() {
        let mut req = jkt_sin_round_trip();
        req.origin_airport = Some("CGK".to_string());
        let payload = build(&req, &fixed_ids());
        let journeys = &payload.search_criteria.journey_info_types;

        assert_eq!(journeys[0].depart_code, "");
        assert_eq!(journeys[0].depart_airport, "CGK");
        assert_eq!(journeys[1].arrive_code, "");
        assert_eq!(journeys[1].arrive_airport, "CGK");
        assert_eq!(journeys[1].depart_code, "SIN");
    }

    #[test]
    fn extension_order_is_fixed_and_carries_session_ids() {
        let ids = fixed_ids();
        let payload = build(&jkt_sin_round_trip(), &ids);
        let ext = &payload.head.extension;

        let names: Vec<&str> = ext.names().collect();
        assert_eq!(names.first(), Some(&"source"));
        assert_eq!(names.last(), Some(&"sotpUnit"));
        assert_eq!(ext.len(), 24);
        assert_eq!(ext.get("Flt_BatchId"), Some(ids.batch_id.as_str()));
        assert_eq!(ext.get("vid"), Some(ids.visitor_id.as_str()));
        assert_eq!(ext.get("uuid"), Some(""));
        assert_eq!(ext.non_empty("uuid"), None);
        assert_eq!(payload.head.cid, ids.client_id);
        assert_eq!(payload.head.language, "en");
    }

    #[test]
    fn valueless_extensions_serialize_without_value_key() {
        let payload = build(&jkt_sin_round_trip(), &fixed_ids());
        let json = serde_json::to_value(&payload).unwrap();
        let uuid_entry = json["head"]["extension"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["name"] == "uuid")
            .unwrap();
        assert!(uuid_entry.get("value").is_none());
        assert_eq!(json["searchCriteria"]["passengerInfoType"]["adultCount"], 1);
        assert_eq!(json["head"]["ClientID"], "");
    }

    #[test]
    fn partial_ids_keep_supplied_values() {
        let ids = SessionIdsInput {
            batch_id: Some("batch-1".to_string()),
            client_id: Some("12345678901234".to_string()),
            ..Default::default()
        }
        .resolve();
        assert_eq!(ids.batch_id, "batch-1");
        assert_eq!(ids.client_id, "12345678901234");
        assert!(ids.transaction_id.starts_with("1-mf-"));
        assert!(ids.transaction_id.ends_with("-WEB"));
        assert_eq!(SessionIds::generate_client_id().len(), 14);
        let vid = SessionIds::generate_visitor_id();
        assert_eq!(vid.split('.').nth(1).map(str::len), Some(12));
    }
}

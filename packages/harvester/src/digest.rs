//! Content digest of the canonical payload.
//!
//! The page-side signer consumes an MD5 of a compact JSON rendering of the
//! "W payload", a flattened view of the canonical payload. The hash is only a
//! correlation token, but it is byte-sensitive: field order is declaration
//! order and separators are `,` / `:` with no whitespace.

use crate::error::AppResult;
use crate::payload::{CanonicalPayload, Extensions, Head};
use crate::search::CabinClass;
use md5::{Digest, Md5};
use serde::Serialize;

const DEFAULT_OS: &str = "Mac OS";
const DEFAULT_OS_VERSION: &str = "10.15.7";

/// Lowercase hex MD5
pub fn md5_hex(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Serialized signing payload and its hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub serialized: String,
    pub hash: String,
}

pub fn digest(payload: &CanonicalPayload) -> AppResult<ContentDigest> {
    let signing = SigningPayload::from_canonical(payload);
    let serialized = serde_json::to_string(&signing)?;
    let hash = md5_hex(&serialized);
    Ok(ContentDigest { serialized, hash })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPayload {
    pub d_city: String,
    pub a_city: String,
    pub d_date: String,
    pub flight_way_type: &'static str,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub cabin_class: &'static str,
    pub transfer_type: &'static str,
    pub search_info: SearchInfo,
    pub abt_list: Vec<serde_json::Value>,
    pub off_set: u32,
    pub a_date: String,
    pub start_interval: u32,
    pub end_interval: u32,
    #[serde(rename = "Head")]
    pub head: SigningHead,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInfo {
    pub traveler_num: TravelerNum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelerNum {
    pub adult: u8,
    pub child: u8,
    pub infant: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SigningHead {
    pub ab_testing: String,
    pub locale: String,
    #[serde(rename = "VID")]
    pub vid: String,
    pub alliance_info: AllianceInfo,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    pub extend_fields: ExtendFields,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    pub group: String,
    pub source: String,
    pub currency: String,
    pub version: String,
    pub session_id: String,
    pub pv_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllianceInfo {
    #[serde(rename = "AllianceID")]
    pub alliance_id: i64,
    #[serde(rename = "SID")]
    pub sid: i64,
    #[serde(rename = "OuID")]
    pub ou_id: String,
    #[serde(rename = "UseDistributionType")]
    pub use_distribution_type: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendFields {
    #[serde(rename = "PageId")]
    pub page_id: String,
    #[serde(rename = "Os")]
    pub os: String,
    #[serde(rename = "OsVersion")]
    pub os_version: String,
    #[serde(rename = "SpecialSupply")]
    pub special_supply: String,
    #[serde(rename = "BatchedId")]
    pub batched_id: String,
    pub flightsignature: String,
}

impl SigningPayload {
    pub fn from_canonical(payload: &CanonicalPayload) -> Self {
        let criteria = &payload.search_criteria;
        let outbound = criteria.journey_info_types.first();
        let inbound = criteria.journey_info_types.get(1);
        let head = &payload.head;
        let ext = &head.extension;

        let passengers = &criteria.passenger_info_type;
        let (os, os_version) = parse_x_ua(ext.non_empty("x-ua"));

        SigningPayload {
            d_city: outbound.map(|j| j.depart_code.to_uppercase()).unwrap_or_default(),
            a_city: outbound.map(|j| j.arrive_code.to_uppercase()).unwrap_or_default(),
            d_date: outbound.map(|j| j.depart_date.clone()).unwrap_or_default(),
            flight_way_type: match criteria.trip_type {
                1 => "OW",
                3 => "MT",
                _ => "RT",
            },
            departure_airport: outbound.map(|j| j.depart_airport.clone()).unwrap_or_default(),
            arrival_airport: outbound.map(|j| j.arrive_airport.clone()).unwrap_or_default(),
            cabin_class: CabinClass::from_code(criteria.real_grade).label(),
            transfer_type: "ANY",
            search_info: SearchInfo {
                traveler_num: TravelerNum {
                    adult: passengers.adult_count,
                    child: passengers.child_count,
                    infant: passengers.infant_count,
                },
            },
            abt_list: Vec::new(),
            off_set: 30,
            a_date: inbound.map(|j| j.depart_date.clone()).unwrap_or_default(),
            start_interval: 2,
            end_interval: 2,
            head: SigningHead {
                ab_testing: ab_testing(payload),
                locale: first_of(&[ext.non_empty("sotpLocale"), non_empty(&head.locale)], "en-ID"),
                vid: ext.get("vid").unwrap_or_default().to_string(),
                alliance_info: AllianceInfo {
                    alliance_id: int_ext(ext, "allianceID", 0),
                    sid: int_ext(ext, "sid", 0),
                    ou_id: ext.get("ouid").unwrap_or_default().to_string(),
                    use_distribution_type: int_ext(ext, "useDistributionType", 1),
                },
                transaction_id: ext
                    .get("flt_app_session_transactionId")
                    .unwrap_or_default()
                    .to_string(),
                extend_fields: ExtendFields {
                    page_id: ext.get("PageId").unwrap_or_default().to_string(),
                    os,
                    os_version,
                    special_supply: String::new(),
                    batched_id: ext.get("Flt_BatchId").unwrap_or_default().to_string(),
                    flightsignature: String::new(),
                },
                client_id: client_id(head),
                group: ext.get("sotpGroup").unwrap_or("Trip").to_string(),
                source: ext.get("source").unwrap_or("ONLINE").to_string(),
                currency: first_of(
                    &[ext.non_empty("sotpCurrency"), non_empty(&head.currency)],
                    "IDR",
                ),
                version: first_of(&[non_empty(&head.cver)], "3"),
                session_id: ext.get("Flt_SessionId").unwrap_or("1").to_string(),
                pv_id: ext.get("pvid").unwrap_or("3").to_string(),
            },
        }
    }
}

/// Client id used for signing: the head `cid`, else the `ClientID` field
pub fn client_id(head: &Head) -> String {
    first_of(&[non_empty(&head.cid), non_empty(&head.client_id)], "")
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

fn first_of(candidates: &[Option<&str>], fallback: &str) -> String {
    candidates
        .iter()
        .flatten()
        .next()
        .copied()
        .unwrap_or(fallback)
        .to_string()
}

fn int_ext(ext: &Extensions, name: &str, fallback: i64) -> i64 {
    ext.non_empty(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

/// `v=3_os=ONLINE_osv=10` -> ("ONLINE", "10")
fn parse_x_ua(x_ua: Option<&str>) -> (String, String) {
    let mut os = DEFAULT_OS.to_string();
    let mut os_version = DEFAULT_OS_VERSION.to_string();
    for part in x_ua.unwrap_or_default().split('_') {
        if let Some(v) = part.strip_prefix("osv=") {
            os_version = v.to_string();
        } else if let Some(v) = part.strip_prefix("os=") {
            os = v.to_string();
        }
    }
    (os, os_version)
}

/// `M:<bucket>,<code>:<version>;` for every ab test. The bucket is stable for
/// a given client so the digest stays reproducible.
fn ab_testing(payload: &CanonicalPayload) -> String {
    let client = client_id(&payload.head);
    payload
        .abt_list
        .iter()
        .map(|abt| {
            format!(
                "M:{},{}:{};",
                ab_bucket(&client, &abt.ab_code),
                abt.ab_code,
                if abt.ab_version.is_empty() { "A" } else { abt.ab_version.as_str() }
            )
        })
        .collect()
}

fn ab_bucket(client_id: &str, ab_code: &str) -> u8 {
    let hash = Md5::digest(format!("{}:{}", client_id, ab_code).as_bytes());
    (u16::from_be_bytes([hash[0], hash[1]]) % 101) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::build;
    use crate::payload::tests::{fixed_ids, jkt_sin_round_trip};

    #[test]
    fn md5_matches_reference_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn digest_is_deterministic_for_identical_inputs() {
        let first = digest(&build(&jkt_sin_round_trip(), &fixed_ids())).unwrap();
        let second = digest(&build(&jkt_sin_round_trip(), &fixed_ids())).unwrap();
        assert_eq!(first.serialized, second.serialized);
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.hash.len(), 32);
        assert!(first.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_changes_with_session_ids() {
        let mut other_ids = fixed_ids();
        other_ids.batch_id = "another-batch".to_string();
        let a = digest(&build(&jkt_sin_round_trip(), &fixed_ids())).unwrap();
        let b = digest(&build(&jkt_sin_round_trip(), &other_ids)).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn serialization_is_compact_and_in_declaration_order() {
        let d = digest(&build(&jkt_sin_round_trip(), &fixed_ids())).unwrap();
        assert!(d.serialized.starts_with(
            r#"{"dCity":"JKT","aCity":"SIN","dDate":"2026-02-01","flightWayType":"RT","#
        ));
        assert!(!d.serialized.contains(": "));
        assert!(!d.serialized.contains(", "));
        assert!(d.serialized.contains(r#""aDate":"2026-02-03""#));
        assert!(d.serialized.contains(r#""Group":"Trip","Source":"ONLINE","Currency":"IDR""#));
        assert!(d.serialized.ends_with(r#""Version":"3","SessionId":"1","PvId":"1"}}"#));
        assert_eq!(d.hash, md5_hex(&d.serialized));
    }

    #[test]
    fn head_fields_fall_back_to_head_block_then_defaults() {
        let mut payload = build(&jkt_sin_round_trip(), &fixed_ids());
        payload.head.extension = Extensions::default();
        payload.head.currency = "SGD".to_string();
        payload.head.locale = String::new();
        payload.head.cid = String::new();
        payload.head.client_id = "fallback-client".to_string();

        let signing = SigningPayload::from_canonical(&payload);
        assert_eq!(signing.head.currency, "SGD");
        assert_eq!(signing.head.locale, "en-ID");
        assert_eq!(signing.head.group, "Trip");
        assert_eq!(signing.head.source, "ONLINE");
        assert_eq!(signing.head.pv_id, "3");
        assert_eq!(signing.head.client_id, "fallback-client");
        assert_eq!(signing.head.extend_fields.os, "Mac OS");
        assert_eq!(signing.head.alliance_info.use_distribution_type, 1);
    }

    #[test]
    fn cabin_label_follows_the_real_grade() {
        let mut req = jkt_sin_round_trip();
        assert_eq!(SigningPayload::from_canonical(&build(&req, &fixed_ids())).cabin_class, "Economy");

        req.cabin_class = CabinClass::Business;
        assert_eq!(SigningPayload::from_canonical(&build(&req, &fixed_ids())).cabin_class, "Business");
    }

    #[test]
    fn x_ua_and_ab_tests_are_projected() {
        let signing = SigningPayload::from_canonical(&build(&jkt_sin_round_trip(), &fixed_ids()));
        assert_eq!(signing.head.extend_fields.os, "ONLINE");
        assert_eq!(signing.head.extend_fields.os_version, "10");

        let parts: Vec<&str> = signing.head.ab_testing.split_terminator(';').collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[0].starts_with("M:"));
        assert!(parts[0].ends_with(",250811_IBU_wjrankol:A"));
        assert!(parts[3].ends_with(",251023_IBU_pricetool:D"));
    }
}

//! Request-token derivation.
//!
//! Two of the three tokens come from functions the site installs on
//! `window`; they are called inside a guard that turns any failure into an
//! `ERROR: ` string so the page never sees an unhandled exception. The
//! third is computed locally.

use crate::config::Settings;
use crate::digest::{client_id, digest, md5_hex};
use crate::error::{AppError, AppResult};
use crate::payload::{build, CanonicalPayload, SessionIds};
use crate::search::SearchRequest;
use crate::search_url::context_url;
use crate::session::{close_session, ExecutionSession, SessionFactory};
use anyhow::Context;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const SENTINEL: &str = "ERROR: ";
const MISSING: &str = "missing ";

/// The three values the search API expects alongside a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub signature: String,
    pub w_payload_source: String,
    pub x_ctx_header: String,
}

pub struct TokenPipeline {
    factory: Arc<dyn SessionFactory>,
    settings: Arc<Settings>,
}

impl TokenPipeline {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: Arc<Settings>) -> Self {
        Self { factory, settings }
    }

    /// Derive tokens on a dedicated session that is always torn down
    #[instrument(skip_all, fields(origin = %req.origin, destination = %req.destination))]
    pub async fn derive(&self, req: &SearchRequest, ids: &SessionIds) -> AppResult<TokenSet> {
        let mut session = self
            .factory
            .create_session()
            .await
            .context("failed to start execution session")?;

        let result = self.derive_on(session.as_mut(), req, ids).await;
        close_session(session, "signing").await;
        result
    }

    async fn derive_on(
        &self,
        session: &mut dyn ExecutionSession,
        req: &SearchRequest,
        ids: &SessionIds,
    ) -> AppResult<TokenSet> {
        let url = context_url(&self.settings.browser.home_url, req)?;
        session.navigate(&url).await?;
        tokio::time::sleep(self.settings.signing.bootstrap_wait()).await;

        let payload = build(req, ids);
        self.derive_with_session(&*session, &payload).await
    }

    /// Derive tokens for `payload` on a session the caller owns and has
    /// already pointed at a page carrying the signing functions
    pub async fn derive_with_session(
        &self,
        session: &dyn ExecutionSession,
        payload: &CanonicalPayload,
    ) -> AppResult<TokenSet> {
        let signing = &self.settings.signing;

        let payload_json = serde_json::to_string(payload)?;
        let signature = call_guarded(
            session,
            &signing.signature_function,
            &call_function_script(&signing.signature_function, &payload_json),
        )
        .await?;
        debug!(length = signature.len(), "Derived signature");

        let content = digest(payload)?;
        let w_payload_source = call_guarded(
            session,
            &signing.payload_signer,
            &payload_signer_script(&signing.payload_signer, &content.hash),
        )
        .await?;
        debug!(hash = %content.hash, "Derived w-payload-source");

        let visitor_id = payload.head.extension.get("vid").unwrap_or_default();
        let x_ctx_header = x_ctx_header(&signing.endpoint, &client_id(&payload.head), visitor_id);

        info!("Request tokens derived");
        Ok(TokenSet {
            signature,
            w_payload_source,
            x_ctx_header,
        })
    }
}

/// `md5("POST" + endpoint + "-<ms>-<7 digits>" + clientId + visitorId)`
pub fn x_ctx_header(endpoint: &str, client_id: &str, visitor_id: &str) -> String {
    let nonce = rand::thread_rng().gen_range(1_000_000..=9_999_999);
    x_ctx_header_at(endpoint, Utc::now().timestamp_millis(), nonce, client_id, visitor_id)
}

fn x_ctx_header_at(
    endpoint: &str,
    epoch_ms: i64,
    nonce: u32,
    client_id: &str,
    visitor_id: &str,
) -> String {
    md5_hex(format!(
        "POST{}-{}-{}{}{}",
        endpoint, epoch_ms, nonce, client_id, visitor_id
    ))
}

/// `window[name](argJson)`, guarded
fn call_function_script(name: &str, arg_json: &str) -> String {
    let key = Value::from(name).to_string();
    format!(
        r#"(() => {{
  try {{
    const fn = window[{key}];
    if (typeof fn !== 'function') {{
      return "{SENTINEL}{MISSING}window." + {key};
    }}
    return fn({arg_json});
  }} catch (err) {{
    return "{SENTINEL}" + String(err);
  }}
}})()"#
    )
}

/// `window[name].toString(hash)`, guarded
fn payload_signer_script(name: &str, hash: &str) -> String {
    let key = Value::from(name).to_string();
    let hash = Value::from(hash).to_string();
    format!(
        r#"(() => {{
  try {{
    const signer = window[{key}];
    if (signer === undefined || signer === null) {{
      return "{SENTINEL}{MISSING}window." + {key};
    }}
    return signer.toString({hash});
  }} catch (err) {{
    return "{SENTINEL}" + String(err);
  }}
}})()"#
    )
}

async fn call_guarded(
    session: &dyn ExecutionSession,
    function: &str,
    script: &str,
) -> AppResult<String> {
    let value = session.evaluate(script).await?;
    interpret(function, value)
}

/// Turn a guarded call's result into a token or a signing error
fn interpret(function: &str, value: Value) -> AppResult<String> {
    let function = format!("window.{}", function);
    match value {
        Value::String(s) => match s.strip_prefix(SENTINEL) {
            Some(rest) if rest.starts_with(MISSING) => {
                Err(AppError::SigningFunctionMissing { function })
            }
            Some(rest) => Err(AppError::SigningFunctionThrew {
                function,
                message: rest.to_string(),
            }),
            None if s.is_empty() => Err(AppError::SigningFunctionThrew {
                function,
                message: "returned an empty string".to_string(),
            }),
            None => Ok(s),
        },
        other => Err(AppError::SigningFunctionThrew {
            function,
            message: format!("expected a string result, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::tests::{fixed_ids, jkt_sin_round_trip};
    use crate::session::fake::FakeFactory;
    use crate::session::ExecError;

    fn pipeline(factory: Arc<FakeFactory>) -> TokenPipeline {
        TokenPipeline::new(factory, Arc::new(Settings::fast()))
    }

    fn site_functions(script: &str) -> Result<Value, ExecError> {
        if script.contains(r#"window["c_sign"]"#) {
            Ok(Value::from("wps-token"))
        } else if script.contains(r#"window["signature"]"#) {
            Ok(Value::from("sig-token"))
        } else {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn derives_all_three_tokens_and_closes_the_session() {
        let factory = Arc::new(FakeFactory::new(site_functions));
        let tokens = pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap();

        assert_eq!(tokens.signature, "sig-token");
        assert_eq!(tokens.w_payload_source, "wps-token");
        assert_eq!(tokens.x_ctx_header.len(), 32);

        let log = factory.log();
        assert_eq!(log.created, 1);
        assert_eq!(log.closed, 1);
        assert_eq!(log.navigations.len(), 1);
        assert!(log.navigations[0].contains("/showfarefirst?"));
        assert!(log.scripts[0].contains(r#""cid":"09034177410240""#));
    }

    #[tokio::test]
    async fn payload_signer_receives_the_content_digest() {
        let factory = Arc::new(FakeFactory::new(site_functions));
        pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap();

        let expected = digest(&build(&jkt_sin_round_trip(), &fixed_ids())).unwrap();
        let log = factory.log();
        assert!(log.scripts[1].contains(&format!("toString(\"{}\")", expected.hash)));
    }

    #[tokio::test]
    async fn missing_signing_function_is_reported_and_session_closed() {
        let factory = Arc::new(FakeFactory::new(|_| {
            Ok(Value::from("ERROR: missing window.signature"))
        }));
        let err = pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap_err();

        assert!(
            matches!(err, AppError::SigningFunctionMissing { ref function } if function == "window.signature")
        );
        assert_eq!(factory.log().closed, 1);
    }

    #[tokio::test]
    async fn thrown_errors_keep_their_message() {
        let factory = Arc::new(FakeFactory::new(|script: &str| {
            if script.contains("c_sign") {
                Ok(Value::from("ERROR: TypeError: c_sign.toString is not a function"))
            } else {
                Ok(Value::from("sig"))
            }
        }));
        let err = pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap_err();

        match err {
            AppError::SigningFunctionThrew { function, message } => {
                assert_eq!(function, "window.c_sign");
                assert_eq!(message, "TypeError: c_sign.toString is not a function");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn lost_environment_and_failed_launch() {
        let factory = Arc::new(
            FakeFactory::new(site_functions)
                .failing_navigation(ExecError::EnvironmentLost("Target closed".into())),
        );
        let err = pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EnvironmentLost(_)));
        assert_eq!(factory.log().closed, 1);

        let factory = Arc::new(FakeFactory::new(site_functions).failing_launch());
        let err = pipeline(factory.clone())
            .derive(&jkt_sin_round_trip(), &fixed_ids())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(factory.log().created, 0);
    }

    #[test]
    fn non_string_results_are_rejected() {
        assert!(matches!(
            interpret("signature", Value::Null),
            Err(AppError::SigningFunctionThrew { .. })
        ));
        assert!(matches!(
            interpret("signature", Value::from("")),
            Err(AppError::SigningFunctionThrew { .. })
        ));
        assert_eq!(interpret("signature", Value::from("abc")).unwrap(), "abc");
    }

    #[test]
    fn x_ctx_header_is_md5_of_the_documented_concatenation() {
        let header = x_ctx_header_at("/api", 1700000000000, 1234567, "0903", "vid");
        assert_eq!(header, md5_hex("POST/api-1700000000000-12345670903vid"));
        assert_eq!(x_ctx_header("/api", "0903", "vid").len(), 32);
    }

    #[test]
    fn scripts_quote_their_arguments() {
        let script = payload_signer_script("c_sign", "abc\"def");
        assert!(script.contains(r#"window["c_sign"]"#));
        assert!(script.contains(r#"toString("abc\"def")"#));
        assert!(call_function_script("signature", "{}").contains("fn({})"));
    }
}

//! Request and response bodies of the catalog server API.
//!
//! The server speaks three dialects: XML request documents for the catalog
//! endpoints, JSON for the admin RPC methods and XML-RPC for metadata edits.

use std::fmt::Write as _;
use std::io::{Cursor, Write as _};

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{AttributeValue, ObjectKey, Watermark};
use crate::domain::ports::RemoteResponse;

const XML_DECLARATION: &str = "<?xml version='1.0' encoding='utf-8'?>";

/// Appended to error summaries of 403 responses.
pub const FORBIDDEN_HINT: &str =
    "The account may lack the required role on the server this one authenticates against.";

/// Escape text for use in markup content or a quoted attribute.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn parcel_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn request(body: &str) -> String {
    format!(
        "{XML_DECLARATION}<request><header parcel_id=\"{}\"/>{body}</request>",
        parcel_id()
    )
}

/// Body of a `GetCatalog` call, incremental from `from`.
pub fn catalog_request(from: Watermark) -> String {
    request(&format!("<getCatalog from=\"{from}\"/>"))
}

/// Body of a `GetArchiveCatalog` call for one object.
pub fn archive_catalog_request(id: &str) -> String {
    request(&format!(
        "<objects><object object_id=\"{}\"/></objects>",
        escape(id)
    ))
}

/// Body of a `DeleteObjects` call removing one version.
pub fn delete_version_request(key: &ObjectKey) -> String {
    request(&format!(
        "<deleteVersion objectId=\"{}\" versionNumber=\"{}\"/>",
        escape(&key.id),
        key.version
    ))
}

/// Read the key assigned by the server from a `PutObject` response.
pub fn parse_upload_response(body: &str) -> HarnessResult<ObjectKey> {
    let doc = roxmltree::Document::parse(body)?;
    let object = doc
        .descendants()
        .find(|n| n.has_tag_name("object"))
        .ok_or_else(|| HarnessError::Parse("upload response has no object element".to_string()))?;
    let id = object
        .attribute("objectId")
        .ok_or_else(|| HarnessError::Parse("upload response has no objectId".to_string()))?;
    let version = object
        .attribute("version")
        .and_then(ObjectKey::parse_version)
        .ok_or_else(|| HarnessError::Parse(format!("upload response for {id} has no valid version")))?;
    Ok(ObjectKey::new(id, version))
}

/// A value in an XML-RPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    String(String),
    Int(i64),
    Double(f64),
    Boolean(bool),
    Array(Vec<XmlRpcValue>),
    Struct(Vec<(String, XmlRpcValue)>),
}

impl XmlRpcValue {
    fn write_to(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Self::String(s) => {
                let _ = write!(out, "<string>{}</string>", escape(s));
            }
            Self::Int(i) => {
                let _ = write!(out, "<int>{i}</int>");
            }
            Self::Double(d) => {
                let _ = write!(out, "<double>{d}</double>");
            }
            Self::Boolean(b) => {
                let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
            }
            Self::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_to(out);
                }
                out.push_str("</data></array>");
            }
            Self::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    let _ = write!(out, "<member><name>{}</name>", escape(name));
                    value.write_to(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
        }
        out.push_str("</value>");
    }
}

impl From<&AttributeValue> for XmlRpcValue {
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::Integer(i) => Self::Int(*i),
            AttributeValue::Text(s) => Self::String(s.clone()),
        }
    }
}

/// Encode an XML-RPC method call.
pub fn xmlrpc_call(method: &str, params: &[XmlRpcValue]) -> String {
    let mut out = format!(
        "{XML_DECLARATION}<methodCall><methodName>{}</methodName><params>",
        escape(method)
    );
    for param in params {
        out.push_str("<param>");
        param.write_to(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Outcome reported inside an XML-RPC response. The HTTP status of these
/// responses is always 200 and carries no information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlRpcStatus {
    pub success: bool,
    pub message: Option<String>,
}

/// Read the `success`/`msg` members of an XML-RPC response. A fault is
/// reported as a failure carrying its `faultString`.
pub fn parse_xmlrpc_status(body: &str) -> HarnessResult<XmlRpcStatus> {
    let doc = roxmltree::Document::parse(body)?;

    let member = |wanted: &str| {
        doc.descendants()
            .filter(|n| n.has_tag_name("member"))
            .find(|m| {
                m.children()
                    .find(|c| c.has_tag_name("name"))
                    .and_then(|name| name.text())
                    .is_some_and(|text| text.trim() == wanted)
            })
            .and_then(|m| m.children().find(|c| c.has_tag_name("value")))
            .map(|value| {
                // Untyped values carry their text directly.
                value
                    .children()
                    .find(roxmltree::Node::is_element)
                    .and_then(|typed| typed.text())
                    .or_else(|| value.text())
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            })
    };

    if doc.descendants().any(|n| n.has_tag_name("fault")) {
        return Ok(XmlRpcStatus {
            success: false,
            message: member("faultString"),
        });
    }

    let success = member("success")
        .ok_or_else(|| HarnessError::Parse("XML-RPC response has no success member".to_string()))?;
    Ok(XmlRpcStatus {
        success: success == "1" || success.eq_ignore_ascii_case("true"),
        message: member("msg"),
    })
}

/// JSON body returned by the admin RPC methods.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    msg: Value,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// A replication target registered on the primary server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Replicant {
    #[serde(rename = "replicantId")]
    pub replicant_id: Value,
    pub username: String,
}

impl JobResult {
    pub fn parse(body: &[u8]) -> HarnessResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// The `msg` field as text.
    pub fn message(&self) -> String {
        value_text(&self.msg)
    }

    /// Rows of an `admin.get_list_db` result.
    pub fn replicants(&self) -> HarnessResult<Vec<Replicant>> {
        match self.extra.get("rows") {
            Some(rows) => Ok(serde_json::from_value(rows.clone())?),
            None => Ok(Vec::new()),
        }
    }

    /// `md_version` of an `admin.md_classifier_version` result.
    pub fn md_version(&self) -> Option<String> {
        self.extra
            .get("md_version")
            .filter(|v| !v.is_null())
            .map(value_text)
    }
}

/// Render a JSON scalar without quotes.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable account of a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub message: String,
    /// Whether the body was markup; unparsable bodies are worth saving.
    pub parsed: bool,
}

/// Summarise a non-success response from the `result_message` attributes of
/// its `result` elements.
pub fn summarize_error(response: &RemoteResponse) -> ErrorSummary {
    let mut message = format!("(status {}: {})", response.status, response.reason);
    let text = response.text();
    match roxmltree::Document::parse(&text) {
        Ok(doc) => {
            for result in doc.descendants().filter(|n| n.has_tag_name("result")) {
                if let Some(detail) = result.attribute("result_message") {
                    message.push(' ');
                    message.push_str(detail);
                }
            }
            if response.status == 403 {
                message.push(' ');
                message.push_str(FORBIDDEN_HINT);
            }
            ErrorSummary {
                message,
                parsed: true,
            }
        }
        Err(_) => {
            message.push_str(" unparsable response body");
            ErrorSummary {
                message,
                parsed: false,
            }
        }
    }
}

/// Pack a single document into a zip bundle, the way the server ships
/// catalogs.
pub fn pack_bundle(entry: &str, document: &str) -> HarnessResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(entry, SimpleFileOptions::default())?;
    writer.write_all(document.as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CatalogSnapshot;

    #[test]
    fn test_catalog_request_carries_cursor_and_parcel() {
        let body = catalog_request(1_700_000_000);
        let doc = roxmltree::Document::parse(&body).unwrap();
        let get = doc.descendants().find(|n| n.has_tag_name("getCatalog")).unwrap();
        assert_eq!(get.attribute("from"), Some("1700000000"));
        let header = doc.descendants().find(|n| n.has_tag_name("header")).unwrap();
        assert_eq!(header.attribute("parcel_id").unwrap().len(), 32);
        assert_ne!(catalog_request(0), catalog_request(0));
    }

    #[test]
    fn test_delete_and_archive_requests() {
        let body = delete_version_request(&ObjectKey::new("a&b", 3));
        let doc = roxmltree::Document::parse(&body).unwrap();
        let delete = doc.descendants().find(|n| n.has_tag_name("deleteVersion")).unwrap();
        assert_eq!(delete.attribute("objectId"), Some("a&b"));
        assert_eq!(delete.attribute("versionNumber"), Some("3"));

        let body = archive_catalog_request("7f3a");
        let doc = roxmltree::Document::parse(&body).unwrap();
        let object = doc.descendants().find(|n| n.has_tag_name("object")).unwrap();
        assert_eq!(object.attribute("object_id"), Some("7f3a"));
    }

    #[test]
    fn test_parse_upload_response() {
        let body = r#"<response><result result_code="0"/><object objectId="7f3a" version="2.0"/></response>"#;
        assert_eq!(parse_upload_response(body).unwrap(), ObjectKey::new("7f3a", 2));

        assert!(matches!(
            parse_upload_response("<response/>"),
            Err(HarnessError::Parse(_))
        ));
        assert!(matches!(
            parse_upload_response("not markup"),
            Err(HarnessError::Parse(_))
        ));
    }

    #[test]
    fn test_xmlrpc_call_encoding() {
        let body = xmlrpc_call(
            "set_chart_metadata",
            &[
                XmlRpcValue::String("sid".to_string()),
                XmlRpcValue::Array(vec![XmlRpcValue::Struct(vec![
                    ("id".to_string(), XmlRpcValue::String("a<b".to_string())),
                    ("updated".to_string(), XmlRpcValue::Double(1.5)),
                ])]),
                XmlRpcValue::Boolean(true),
                XmlRpcValue::Int(987_654),
            ],
        );

        let doc = roxmltree::Document::parse(&body).unwrap();
        let name = doc.descendants().find(|n| n.has_tag_name("methodName")).unwrap();
        assert_eq!(name.text(), Some("set_chart_metadata"));
        assert_eq!(doc.descendants().filter(|n| n.has_tag_name("param")).count(), 4);
        assert!(body.contains("<string>a&lt;b</string>"));
        assert!(body.contains("<double>1.5</double>"));
        assert!(body.contains("<boolean>1</boolean>"));
        assert!(body.contains("<int>987654</int>"));
    }

    #[test]
    fn test_parse_xmlrpc_status() {
        let ok = "<methodResponse><params><param><value><struct>\
            <member><name>success</name><value><boolean>1</boolean></value></member>\
            </struct></value></param></params></methodResponse>";
        assert_eq!(
            parse_xmlrpc_status(ok).unwrap(),
            XmlRpcStatus {
                success: true,
                message: None
            }
        );

        let failed = "<methodResponse><params><param><value><struct>\
            <member><name>success</name><value><boolean>0</boolean></value></member>\
            <member><name>msg</name><value><string>bad classifier</string></value></member>\
            </struct></value></param></params></methodResponse>";
        let status = parse_xmlrpc_status(failed).unwrap();
        assert!(!status.success);
        assert_eq!(status.message.as_deref(), Some("bad classifier"));

        let fault = "<methodResponse><fault><value><struct>\
            <member><name>faultCode</name><value><int>1</int></value></member>\
            <member><name>faultString</name><value>no such method</value></member>\
            </struct></value></fault></methodResponse>";
        let status = parse_xmlrpc_status(fault).unwrap();
        assert!(!status.success);
        assert_eq!(status.message.as_deref(), Some("no such method"));

        assert!(parse_xmlrpc_status("<methodResponse/>").is_err());
    }

    #[test]
    fn test_job_result() {
        let result = JobResult::parse(
            br#"{"success": true, "msg": "", "rows": [{"replicantId": 4, "username": "secondarybnd"}]}"#,
        )
        .unwrap();
        assert!(result.success);
        let replicants = result.replicants().unwrap();
        assert_eq!(replicants[0].username, "secondarybnd");
        assert_eq!(value_text(&replicants[0].replicant_id), "4");

        let result = JobResult::parse(br#"{"success": false, "msg": "no script"}"#).unwrap();
        assert!(!result.success);
        assert_eq!(result.message(), "no script");
        assert!(result.replicants().unwrap().is_empty());

        let result = JobResult::parse(br#"{"success": true, "md_version": 12}"#).unwrap();
        assert_eq!(result.md_version().as_deref(), Some("12"));

        assert!(matches!(JobResult::parse(b"<html/>"), Err(HarnessError::Parse(_))));
    }

    #[test]
    fn test_summarize_error() {
        let response = RemoteResponse::with_status(
            403,
            "Forbidden",
            r#"<response><result result_message="access denied"/></response>"#,
        );
        let summary = summarize_error(&response);
        assert!(summary.parsed);
        assert!(summary.message.starts_with("(status 403: Forbidden) access denied"));
        assert!(summary.message.ends_with(FORBIDDEN_HINT));

        let response = RemoteResponse::with_status(500, "Internal Server Error", "oops");
        let summary = summarize_error(&response);
        assert!(!summary.parsed);
        assert!(summary.message.contains("status 500"));
    }

    #[test]
    fn test_pack_bundle_is_readable_as_catalog() {
        let bundle = pack_bundle(
            CatalogSnapshot::CATALOG_ENTRY,
            r#"<catalog Created="5"><CHART ID="a" Issue="1"/></catalog>"#,
        )
        .unwrap();
        let snapshot = CatalogSnapshot::from_bundle(&bundle, CatalogSnapshot::CATALOG_ENTRY).unwrap();
        assert_eq!(snapshot.watermark(), 5);
        assert!(snapshot.find("a").is_some());
    }
}

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::classify::{validate, ValidatedField};
use crate::db;
use crate::dedup;
use crate::dom::Dom;
use crate::extract;

/// Result of a capture attempt. `session_id` is None when nothing valid
/// was found and no session was persisted.
pub struct CaptureOutcome {
    pub session_id: Option<i64>,
    pub duplicate: bool,
    pub fields: Vec<ValidatedField>,
}

/// Extract and validate a page's fields. Invalid fields are dropped here
/// and never reach the store.
pub fn collect_fields(dom: &Dom) -> Vec<ValidatedField> {
    extract::extract(dom)
        .map(|observation| {
            let validation = validate(&observation);
            ValidatedField {
                observation,
                validation,
            }
        })
        .filter(|f| f.validation.is_valid)
        .collect()
}

/// Run the full capture pipeline against a page and persist the session.
///
/// The duplicate check and the insert share one transaction, so a session
/// is never visible to the sync pipeline before its flag is final.
pub fn capture(conn: &Connection, dom: &Dom, url: &str) -> Result<CaptureOutcome> {
    let fields = collect_fields(dom);
    if fields.is_empty() {
        info!("no valid form data found for {}", url);
        return Ok(CaptureOutcome {
            session_id: None,
            duplicate: false,
            fields,
        });
    }

    let timestamp = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let history = db::fetch_synced_for_url(&tx, url)?;
    let duplicate = dedup::is_duplicate(url, &fields, &history);
    let session_id = db::insert_session(&tx, url, &timestamp, duplicate, &fields)?;
    tx.commit()?;

    info!(
        "stored session {} for {} ({} fields, duplicate: {})",
        session_id,
        url,
        fields.len(),
        duplicate
    );
    Ok(CaptureOutcome {
        session_id: Some(session_id),
        duplicate,
        fields,
    })
}

// ── Tests ──

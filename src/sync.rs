use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{Role, ValidatedField};
use crate::db::{self, StoredSession};
use crate::dedup;

static SYNC_RUNNING: AtomicBool = AtomicBool::new(false);

/// One sync run per process at a time. Concurrent invocation is a caller
/// error, not a supported mode.
struct RunGuard;

impl RunGuard {
    fn acquire() -> Result<RunGuard> {
        if SYNC_RUNNING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("a sync run is already in progress");
        }
        Ok(RunGuard)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        SYNC_RUNNING.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SyncStats {
    pub attempted: usize,
    pub synced: usize,
}

/// POST body for one session: the identity key fields flattened out
/// (empty string when the session has none for a role) plus the full
/// field list as raw data.
#[derive(Debug, Serialize)]
pub struct SyncPayload<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub aadhar: String,
    pub pan: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub raw_data: &'a [ValidatedField],
}

pub fn build_payload<'a>(session: &'a StoredSession, title: &'a str) -> SyncPayload<'a> {
    let mut keys = dedup::key_fields(&session.fields);
    let mut take = |role: Role| keys.remove(role.as_str()).unwrap_or_default();
    SyncPayload {
        url: &session.url,
        title,
        aadhar: take(Role::Aadhar),
        pan: take(Role::Pan),
        name: take(Role::Name),
        email: take(Role::Email),
        phone: take(Role::Phone),
        raw_data: &session.fields,
    }
}

/// Push pending sessions to the collector, oldest first, one request at a
/// time. Each session is marked synced only after the collector accepts
/// it; the first failure aborts the whole run and leaves the remaining
/// sessions eligible for a later retry.
pub async fn sync(
    conn: &Connection,
    endpoint: &str,
    title: &str,
    timeout: Duration,
) -> Result<SyncStats> {
    let _guard = RunGuard::acquire()?;

    let pending = db::fetch_pending(conn)?;
    if pending.is_empty() {
        info!("no sessions to sync");
        return Ok(SyncStats {
            attempted: 0,
            synced: 0,
        });
    }

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len}")?
            .progress_chars("=> "),
    );

    let mut synced = 0usize;
    for session in &pending {
        let payload = build_payload(session, title);
        let response = client.post(endpoint).json(&payload).send().await;
        match response.and_then(|r| r.error_for_status()) {
            Ok(_) => {
                db::mark_synced(conn, session.id)?;
                synced += 1;
                pb.inc(1);
            }
            Err(e) => {
                pb.finish_and_clear();
                warn!("sync aborted at session {}: {}", session.id, e);
                bail!(
                    "Error syncing data to API ({} of {} sessions synced)",
                    synced,
                    pending.len()
                );
            }
        }
    }

    pb.finish_and_clear();
    info!("synced {} sessions to {}", synced, endpoint);
    Ok(SyncStats {
        attempted: pending.len(),
        synced,
    })
}

/// A record as the collector returns it; identity fields may be absent
/// and the creation time arrives as either `created_at` or `timestamp`.
#[derive(Debug, Deserialize)]
pub struct RemoteRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub aadhar: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RemoteRecord {
    pub fn recorded_at(&self) -> &str {
        self.created_at
            .as_deref()
            .or(self.timestamp.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    data: Vec<RemoteRecord>,
}

/// Fetch every synced record back from the collector (`GET <endpoint>/all`).
pub async fn fetch_remote(endpoint: &str, timeout: Duration) -> Result<Vec<RemoteRecord>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let url = format!("{}/all", endpoint.trim_end_matches('/'));
    let response = client.get(&url).send().await?.error_for_status()?;
    let body: FetchResponse = response.json().await?;
    info!("fetched {} records from {}", body.data.len(), url);
    Ok(body.data)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::db::tests::{field, memory_store};

    // The run guard is process-wide; sync tests must not overlap.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn seed_pending(conn: &Connection, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                let fields = vec![field("email", &format!("user{i}@example.com"))];
                db::insert_session(conn, "https://example.com", &format!("t{i}"), false, &fields)
                    .unwrap()
            })
            .collect()
    }

    /// Minimal HTTP stub: answers one connection per scripted status code,
    /// in order, then stops accepting.
    async fn serve_script(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut sock).await;
                let reason = if status < 400 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    async fn read_request(sock: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(n) = sock.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    #[test]
    fn payload_defaults_missing_roles_to_empty() {
        let conn = memory_store();
        let fields = vec![field("email", "a@b.co"), field("full name", "John Doe")];
        db::insert_session(&conn, "https://x.test", "t", false, &fields).unwrap();
        let session = &db::fetch_all(&conn).unwrap()[0];

        let json = serde_json::to_value(build_payload(session, "KYC page")).unwrap();
        assert_eq!(json["url"], "https://x.test");
        assert_eq!(json["title"], "KYC page");
        assert_eq!(json["email"], "a@b.co");
        assert_eq!(json["name"], "John Doe");
        assert_eq!(json["aadhar"], "");
        assert_eq!(json["pan"], "");
        assert_eq!(json["phone"], "");
        assert_eq!(json["raw_data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_run_marks_every_session() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let conn = memory_store();
        seed_pending(&conn, 2);
        let endpoint = serve_script(vec![(200, "{}"), (200, "{}")]).await;

        let stats = sync(&conn, &endpoint, "title", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.synced, 2);
        assert!(db::fetch_all(&conn).unwrap().iter().all(|s| s.synced));
    }

    #[tokio::test]
    async fn failure_aborts_and_leaves_later_sessions_pending() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let conn = memory_store();
        let ids = seed_pending(&conn, 3);
        let endpoint = serve_script(vec![(200, "{}"), (500, "{}")]).await;

        let result = sync(&conn, &endpoint, "title", Duration::from_secs(5)).await;
        assert!(result.is_err());

        let sessions = db::fetch_all(&conn).unwrap();
        let synced_of = |id: i64| sessions.iter().find(|s| s.id == id).unwrap().synced;
        assert!(synced_of(ids[0]));
        assert!(!synced_of(ids[1]));
        assert!(!synced_of(ids[2]));

        // aborted sessions stay eligible for a later run
        assert_eq!(db::fetch_pending(&conn).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let conn = memory_store();
        seed_pending(&conn, 1);
        let _guard = RunGuard::acquire().unwrap();

        let result = sync(&conn, "http://127.0.0.1:1", "t", Duration::from_secs(1)).await;
        assert!(result.unwrap_err().to_string().contains("already in progress"));
        // the pending session was never touched
        assert_eq!(db::fetch_pending(&conn).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_remote_parses_collector_records() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let body = r#"{"message":"ok","count":2,"data":[
            {"url":"https://x.test","title":"T","aadhar":"123456789012","pan":null,
             "name":"John Doe","email":"a@b.co","phone":"+91 1234567890",
             "created_at":"2026-01-01T00:00:00Z"},
            {"url":"https://y.test","timestamp":"2026-01-02T00:00:00Z"}
        ]}"#;
        let endpoint = serve_script(vec![(200, body)]).await;

        let records = fetch_remote(&endpoint, Duration::from_secs(5)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("John Doe"));
        assert!(records[0].pan.is_none());
        assert_eq!(records[0].recorded_at(), "2026-01-01T00:00:00Z");
        assert_eq!(records[1].recorded_at(), "2026-01-02T00:00:00Z");
    }
}

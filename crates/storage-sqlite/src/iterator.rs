//! The query iterator: a lazy, cancellation-aware sequence of documents driven by
//! a SQL statement running on a background blocking thread.
//!
//! `rusqlite`'s `Rows` type borrows from the `Statement` it was produced by, which
//! in turn borrows from a `Connection` — not a shape that survives being held
//! across `.await` points in an async caller. Instead of fighting that borrow
//! with unsafe code, the statement is driven to completion on one dedicated
//! blocking task that feeds rows into a bounded channel; `next()` is just
//! `recv().await` on that channel. Closing the iterator drops the receiver, which
//! makes the producer's next `send` fail and end the task.

use rusqlite::Connection;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use storage_core::{Error, Result};

use crate::codec::{Document, Value};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnLayout {
    RecordIdAndDoc,
    RecordIdOnly,
    DocOnly,
}

fn classify_layout(columns: &[String]) -> Result<ColumnLayout> {
    let has_record_id = columns.iter().any(|c| c == crate::constants::RECORD_ID_COLUMN);
    let has_doc = columns.iter().any(|c| c == crate::constants::DOCUMENT_COLUMN);
    match (has_record_id, has_doc, columns.len()) {
        (true, true, 2) => Ok(ColumnLayout::RecordIdAndDoc),
        (true, false, 1) => Ok(ColumnLayout::RecordIdOnly),
        (false, true, 1) => Ok(ColumnLayout::DocOnly),
        _ => Err(Error::Internal(format!(
            "unexpected result column shape: {columns:?}"
        ))),
    }
}

struct RawRow {
    record_id: Option<i64>,
    doc_json: Option<String>,
}

impl RawRow {
    fn into_document(self, only_record_ids: bool) -> Result<Document> {
        let mut doc = match (self.doc_json, only_record_ids) {
            (Some(json), false) => Document::from_json_text(&json)?,
            _ => Document::new(),
        };
        if let Some(record_id) = self.record_id {
            doc.insert(
                crate::constants::RECORD_ID_COLUMN,
                Value::Int64(record_id),
            );
        }
        Ok(doc)
    }
}

struct IteratorState {
    receiver: Option<mpsc::Receiver<Result<RawRow>>>,
    closed: bool,
}

/// Lazy sequence of documents produced by one SQL query, scoped to one checked-out
/// connection for its whole lifetime.
pub struct DocumentIterator {
    state: Mutex<IteratorState>,
    cancel: CancellationToken,
    only_record_ids: bool,
}

impl DocumentIterator {
    /// Runs `sql` against `conn` on a blocking task and returns an iterator over
    /// its rows. `conn` is consumed for the iterator's whole lifetime — the
    /// caller gives up the checked-out connection until `close()` or exhaustion.
    pub fn new(conn: Connection, sql: String, only_record_ids: bool, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel_for_task = cancel.clone();

        tokio::task::spawn_blocking(move || {
            run_query(conn, &sql, tx, cancel_for_task);
        });

        DocumentIterator {
            state: Mutex::new(IteratorState {
                receiver: Some(rx),
                closed: false,
            }),
            cancel,
            only_record_ids,
        }
    }

    /// An iterator with no underlying cursor: already done, but `close()` is
    /// still safe (and a no-op) to call on it.
    pub fn empty(cancel: CancellationToken) -> Self {
        DocumentIterator {
            state: Mutex::new(IteratorState {
                receiver: None,
                closed: true,
            }),
            cancel,
            only_record_ids: false,
        }
    }

    /// Returns the next document, `Err(Error::IteratorDone)` at exhaustion (or
    /// after `close()`), or a scan/cancellation error. On any error the iterator
    /// closes its cursor first, so the following call returns `IteratorDone`
    /// rather than repeating the same error.
    pub async fn next(&self) -> Result<Document> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::IteratorDone);
        }
        if self.cancel.is_cancelled() {
            state.closed = true;
            state.receiver = None;
            return Err(Error::Cancelled);
        }

        let Some(receiver) = state.receiver.as_mut() else {
            state.closed = true;
            return Err(Error::IteratorDone);
        };

        match receiver.recv().await {
            Some(Ok(raw)) => raw.into_document(self.only_record_ids),
            Some(Err(e)) => {
                state.closed = true;
                state.receiver = None;
                Err(e)
            }
            None => {
                state.closed = true;
                state.receiver = None;
                Err(Error::IteratorDone)
            }
        }
    }

    /// Safe to call concurrently with `next()` and safe to call more than once.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.receiver = None;
    }
}

fn run_query(conn: Connection, sql: &str, tx: mpsc::Sender<Result<RawRow>>, cancel: CancellationToken) {
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.blocking_send(Err(Error::from(e)));
            return;
        }
    };
    let columns: Vec<String> = stmt.column_names().into_iter().map(|s| s.to_string()).collect();
    let layout = match classify_layout(&columns) {
        Ok(l) => l,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    let mut rows = match stmt.query([]) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.blocking_send(Err(Error::from(e)));
            return;
        }
    };

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let next = rows.next();
        match next {
            Ok(Some(row)) => {
                let raw = match layout {
                    ColumnLayout::RecordIdAndDoc => RawRow {
                        record_id: row.get(crate::constants::RECORD_ID_COLUMN).ok(),
                        doc_json: row.get(crate::constants::DOCUMENT_COLUMN).ok(),
                    },
                    ColumnLayout::RecordIdOnly => RawRow {
                        record_id: row.get(crate::constants::RECORD_ID_COLUMN).ok(),
                        doc_json: None,
                    },
                    ColumnLayout::DocOnly => RawRow {
                        record_id: None,
                        doc_json: row.get(crate::constants::DOCUMENT_COLUMN).ok(),
                    },
                };
                if tx.blocking_send(Ok(raw)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(Err(Error::from(e)));
                return;
            }
        }
    }
}

use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_entries (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            kind        TEXT NOT NULL,
            content     TEXT NOT NULL,
            vector      BLOB,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entries_session
            ON memory_entries(session_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_kind
            ON memory_entries(kind);
        CREATE TABLE IF NOT EXISTS store_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

/// Read the pinned embedding dimension, if one has been recorded.
pub fn embedding_dimension(conn: &Connection) -> Result<Option<usize>> {
    let mut stmt = conn.prepare("SELECT value FROM store_meta WHERE key = 'embedding_dim'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(raw.parse::<usize>().ok())
        }
        None => Ok(None),
    }
}

/// Pin the embedding dimension. The dimension is fixed for the lifetime of
/// the store file; callers must check it before the first vectored insert.
pub fn set_embedding_dimension(conn: &Connection, dim: usize) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('embedding_dim', ?1)",
        rusqlite::params![dim.to_string()],
    )?;
    Ok(())
}

/// Encode an f32 vector as a little-endian BLOB.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a little-endian BLOB back into an f32 vector.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn dimension_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        assert_eq!(embedding_dimension(&conn).unwrap(), None);
        set_embedding_dimension(&conn, 384).unwrap();
        assert_eq!(embedding_dimension(&conn).unwrap(), Some(384));
    }

    #[test]
    fn vector_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }
}

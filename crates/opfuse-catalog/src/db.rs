//! Block store adapter: loads basic-block frequencies from SQLite.

use crate::block::BlockInfo;
use crate::opcode::OpCode;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors surfaced while loading the block catalog. No core work happens
/// once loading has failed.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("block database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("malformed block row: {0}")]
    MalformedRow(String),
}

/// Load basic blocks and their aggregated execution frequencies.
///
/// The `instructions` column holds the block's opcodes hex-encoded; rows
/// are grouped so each distinct block appears once with its summed
/// frequency. Blocks longer than `max_block_len` opcodes are discarded by
/// the query, a knob of this loader rather than of the engine.
pub fn load_blocks(path: &Path, max_block_len: usize) -> Result<Vec<BlockInfo>, CatalogError> {
    let db = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut stmt = db.prepare(
        "SELECT instructions, sum(frequency) FROM BasicBlockFrequency \
         WHERE length(instructions) <= ?1 GROUP BY instructions",
    )?;
    // Two hex characters per opcode.
    let mut rows = stmt.query(rusqlite::params![(max_block_len * 2) as i64])?;

    let mut res = Vec::new();
    while let Some(row) = rows.next()? {
        let instructions: String = row.get(0)?;
        let frequency: i64 = row.get(1)?;

        let code = hex::decode(&instructions)
            .map_err(|e| CatalogError::MalformedRow(format!("{instructions:?}: {e}")))?;
        if code.is_empty() {
            return Err(CatalogError::MalformedRow(
                "empty instruction sequence".into(),
            ));
        }

        res.push(BlockInfo {
            block: code.into_iter().map(OpCode).collect(),
            frequency,
        });
    }

    info!(blocks = res.len(), path = %path.display(), "loaded block catalog");
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_db(path: &Path, rows: &[(&str, i64)]) {
        let db = Connection::open(path).unwrap();
        db.execute(
            "CREATE TABLE BasicBlockFrequency (instructions TEXT, frequency INTEGER)",
            [],
        )
        .unwrap();
        for (instructions, frequency) in rows {
            db.execute(
                "INSERT INTO BasicBlockFrequency VALUES (?1, ?2)",
                rusqlite::params![instructions, frequency],
            )
            .unwrap();
        }
    }

    fn temp_db(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("opfuse-{name}-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_load_and_group() {
        let path = temp_db("load");
        seed_db(&path, &[("0102", 3), ("0102", 4), ("010250", 1)]);

        let mut blocks = load_blocks(&path, 100).unwrap();
        blocks.sort_by_key(|b| b.block.len());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block, vec![OpCode(0x01), OpCode(0x02)]);
        assert_eq!(blocks[0].frequency, 7);
        assert_eq!(blocks[1].block.len(), 3);
        assert_eq!(blocks[1].frequency, 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_length_filter() {
        let path = temp_db("filter");
        seed_db(&path, &[("0102", 1), ("0102030405", 1)]);

        let blocks = load_blocks(&path, 4).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block.len(), 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_malformed_hex_row() {
        let path = temp_db("badhex");
        seed_db(&path, &[("01xz", 1)]);

        let err = load_blocks(&path, 100).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedRow(_)));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_database() {
        let path = temp_db("missing");
        assert!(matches!(
            load_blocks(&path, 100),
            Err(CatalogError::Database(_))
        ));
    }
}

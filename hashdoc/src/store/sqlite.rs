use crate::error::{HashDocError, Result};
use crate::escape::unescape;
use crate::store::query::{IndexedRecord, Query};
use crate::store::{
    FieldKind, FieldSpec, Fields, IndexHit, KeyStore, SearchIndex, SearchRequest, SearchResponse,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Key store and search index kept in one SQLite database.
///
/// All operations go through a single connection, so every call is
/// serialized with respect to the others.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize_tables(&conn)?;
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_tables(&conn)?;
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hash_fields (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE TABLE IF NOT EXISTS search_indexes (
                name TEXT PRIMARY KEY,
                prefix TEXT NOT NULL,
                fields_json TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| HashDocError::Store("connection lock poisoned".into()))
    }
}

fn wrong_type(key: &str, expected: &str) -> HashDocError {
    HashDocError::Store(format!("{key} does not hold a {expected}"))
}

fn is_hash(conn: &Connection, key: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM hash_fields WHERE key = ?1 LIMIT 1",
            params![key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn plain_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

// ── Key store ────────────────────────────────────────────────────────

impl KeyStore for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        if is_hash(&conn, key)? {
            return Err(wrong_type(key, "plain value"));
        }
        plain_value(&conn, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM hash_fields WHERE key = ?1", params![key])?;
        tx.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(plain_value(&conn, key)?.is_some() || is_hash(&conn, key)?)
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if is_hash(&tx, key)? {
            return Err(wrong_type(key, "plain value"));
        }
        let current = match plain_value(&tx, key)? {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| HashDocError::Store(format!("{key} does not hold an integer")))?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| HashDocError::Store(format!("{key} would overflow")))?;
        tx.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?
            + tx.execute("DELETE FROM hash_fields WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn write_fields(&self, key: &str, fields: &Fields) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if plain_value(&tx, key)?.is_some() {
            return Err(wrong_type(key, "hash"));
        }
        for (field, value) in fields {
            tx.execute(
                "INSERT OR REPLACE INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_fields(&self, key: &str) -> Result<Fields> {
        let conn = self.lock()?;
        if plain_value(&conn, key)?.is_some() {
            return Err(wrong_type(key, "hash"));
        }
        let mut stmt = conn.prepare("SELECT field, value FROM hash_fields WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = Fields::new();
        for row in rows {
            let (field, value) = row?;
            fields.insert(field, value);
        }
        Ok(fields)
    }
}

// ── Search index ─────────────────────────────────────────────────────

impl SearchIndex for SqliteBackend {
    fn ensure_index(&self, name: &str, fields: &[FieldSpec], key_prefix: &str) -> Result<bool> {
        let fields_json = serde_json::to_string(fields)?;
        let conn = self.lock()?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO search_indexes (name, prefix, fields_json) VALUES (?1, ?2, ?3)",
            params![name, key_prefix, fields_json],
        )?;
        Ok(created == 1)
    }

    fn search(&self, name: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let (prefix, specs, records) = {
            let conn = self.lock()?;
            let (prefix, fields_json): (String, String) = conn
                .query_row(
                    "SELECT prefix, fields_json FROM search_indexes WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| HashDocError::Query(format!("no such index '{name}'")))?;
            let specs: Vec<FieldSpec> = serde_json::from_str(&fields_json)?;
            let records = load_prefixed(&conn, &prefix)?;
            (prefix, specs, records)
        };

        let query = Query::parse(&request.query)?;
        query.check_fields(&specs)?;
        let sort_kind = specs
            .iter()
            .find(|s| s.name == request.sort_by && s.sortable)
            .map(|s| s.kind)
            .ok_or_else(|| {
                HashDocError::Query(format!("cannot sort by '{}'", request.sort_by))
            })?;

        let mut hits: Vec<IndexHit> = records
            .into_iter()
            .filter(|(_, fields)| {
                query.matches(&IndexedRecord::new(fields, &specs), request.fuzziness)
            })
            .map(|(key, fields)| IndexHit { key, fields })
            .collect();

        log::debug!(
            "index {name} ({prefix}): {} hits for {:?}",
            hits.len(),
            request.query
        );

        hits.sort_by(|a, b| {
            compare_sort_values(
                a.fields.get(&request.sort_by),
                b.fields.get(&request.sort_by),
                sort_kind,
                request.ascending,
            )
            .then_with(|| a.key.cmp(&b.key))
        });

        let total = hits.len();
        let hits = hits
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        Ok(SearchResponse { total, hits })
    }
}

fn load_prefixed(conn: &Connection, prefix: &str) -> Result<BTreeMap<String, Fields>> {
    let mut stmt = conn.prepare(
        "SELECT key, field, value FROM hash_fields
         WHERE substr(key, 1, length(?1)) = ?1
         ORDER BY key",
    )?;
    let rows = stmt.query_map(params![prefix], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut records: BTreeMap<String, Fields> = BTreeMap::new();
    for row in rows {
        let (key, field, value) = row?;
        records.entry(key).or_default().insert(field, value);
    }
    Ok(records)
}

/// Records without a usable sort value go last in either direction.
fn compare_sort_values(
    a: Option<&String>,
    b: Option<&String>,
    kind: FieldKind,
    ascending: bool,
) -> Ordering {
    let ordered = |ord: Ordering| if ascending { ord } else { ord.reverse() };
    match kind {
        FieldKind::Numeric => {
            let a = a.and_then(|v| v.trim().parse::<f64>().ok());
            let b = b.and_then(|v| v.trim().parse::<f64>().ok());
            match (a, b) {
                (Some(a), Some(b)) => ordered(a.total_cmp(&b)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }
        FieldKind::Text => match (a, b) {
            (Some(a), Some(b)) => {
                ordered(unescape(a).to_lowercase().cmp(&unescape(b).to_lowercase()))
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn person_index(db: &SqliteBackend) {
        let specs = vec![
            FieldSpec {
                name: "id".into(),
                kind: FieldKind::Text,
                sortable: true,
            },
            FieldSpec {
                name: "name".into(),
                kind: FieldKind::Text,
                sortable: true,
            },
            FieldSpec {
                name: "age".into(),
                kind: FieldKind::Numeric,
                sortable: true,
            },
        ];
        assert!(db.ensure_index("idx:PERSON", &specs, "PERSON/").unwrap());
    }

    fn seed(db: &SqliteBackend) {
        person_index(db);
        for (key, name, age) in [
            ("PERSON/00000001", "Hermman Hesse", Some("45")),
            ("PERSON/00000002", "Linus Torvalds", Some("9")),
            ("PERSON/00000003", "hesse junior", None),
        ] {
            let mut f = fields(&[("id", key), ("name", name)]);
            if let Some(age) = age {
                f.insert("age".into(), age.into());
            }
            db.write_fields(key, &f).unwrap();
        }
        db.write_fields("PERSONA/00000001", &fields(&[("name", "Hesse")]))
            .unwrap();
    }

    fn keys(response: &SearchResponse) -> Vec<&str> {
        response.hits.iter().map(|h| h.key.as_str()).collect()
    }

    #[test]
    fn test_plain_values() {
        let db = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(db.get("a").unwrap(), None);
        assert!(!db.exists("a").unwrap());

        db.set("a", "1").unwrap();
        assert_eq!(db.get("a").unwrap(), Some("1".to_string()));
        assert!(db.exists("a").unwrap());

        assert!(db.delete("a").unwrap());
        assert!(!db.delete("a").unwrap());
    }

    #[test]
    fn test_incr() {
        let db = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(db.incr("PERSON_KEY").unwrap(), 1);
        assert_eq!(db.incr("PERSON_KEY").unwrap(), 2);
        assert_eq!(db.get("PERSON_KEY").unwrap(), Some("2".to_string()));

        db.set("word", "abc").unwrap();
        assert!(db.incr("word").is_err());
    }

    #[test]
    fn test_write_fields_merges() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.write_fields("K/1", &fields(&[("a", "1"), ("b", "2")]))
            .unwrap();
        db.write_fields("K/1", &fields(&[("b", "3"), ("c", "4")]))
            .unwrap();

        let stored = db.read_fields("K/1").unwrap();
        assert_eq!(stored, fields(&[("a", "1"), ("b", "3"), ("c", "4")]));
        assert!(db.exists("K/1").unwrap());
        assert!(db.read_fields("K/2").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_type() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.set("plain", "x").unwrap();
        db.write_fields("hash", &fields(&[("a", "1")])).unwrap();

        assert!(db.write_fields("plain", &fields(&[("a", "1")])).is_err());
        assert!(db.read_fields("plain").is_err());
        assert!(db.get("hash").is_err());
    }

    #[test]
    fn test_ensure_index_is_idempotent() {
        let db = SqliteBackend::open_in_memory().unwrap();
        person_index(&db);
        assert!(!db.ensure_index("idx:PERSON", &[], "PERSON/").unwrap());
    }

    #[test]
    fn test_search_filters_by_prefix_and_query() {
        let db = SqliteBackend::open_in_memory().unwrap();
        seed(&db);

        let all = db.search("idx:PERSON", &SearchRequest::new("*")).unwrap();
        assert_eq!(all.total, 3);

        let hesse = db
            .search("idx:PERSON", &SearchRequest::new("hesse"))
            .unwrap();
        assert_eq!(keys(&hesse), vec!["PERSON/00000001", "PERSON/00000003"]);

        let adults = db
            .search("idx:PERSON", &SearchRequest::new("@age:[18 +inf]"))
            .unwrap();
        assert_eq!(keys(&adults), vec!["PERSON/00000001"]);
    }

    #[test]
    fn test_search_sort_and_window() {
        let db = SqliteBackend::open_in_memory().unwrap();
        seed(&db);

        let by_age = db
            .search("idx:PERSON", &SearchRequest::new("*").sort_by("age", false))
            .unwrap();
        assert_eq!(
            keys(&by_age),
            vec!["PERSON/00000001", "PERSON/00000002", "PERSON/00000003"]
        );

        let window = db
            .search(
                "idx:PERSON",
                &SearchRequest::new("*").sort_by("name", true).window(1, 1),
            )
            .unwrap();
        assert_eq!(window.total, 3);
        assert_eq!(keys(&window), vec!["PERSON/00000003"]);

        let count = db
            .search("idx:PERSON", &SearchRequest::new("*").window(0, 0))
            .unwrap();
        assert_eq!(count.total, 3);
        assert!(count.hits.is_empty());
    }

    #[test]
    fn test_search_errors() {
        let db = SqliteBackend::open_in_memory().unwrap();
        seed(&db);

        assert!(db.search("idx:NOPE", &SearchRequest::new("*")).is_err());
        assert!(db
            .search("idx:PERSON", &SearchRequest::new("@email:x"))
            .is_err());
        assert!(db
            .search("idx:PERSON", &SearchRequest::new("*").sort_by("email", true))
            .is_err());
    }

    #[test]
    fn test_open_file_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("hashdoc.db");
        {
            let db = SqliteBackend::open(&path).unwrap();
            db.incr("PERSON_KEY").unwrap();
        }
        let db = SqliteBackend::open(&path).unwrap();
        assert_eq!(db.incr("PERSON_KEY").unwrap(), 2);
    }
}

use afkms_core::db::migrations::{latest_version, schema_version};
use afkms_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

const ENTITY_TABLES: &[&str] = &[
    "topics",
    "tasks",
    "task_sources",
    "notes",
    "note_sources",
    "links",
    "journals",
    "ideas",
    "routes",
    "route_nodes",
    "route_edges",
    "node_logs",
    "inbox_items",
];

const CHANGE_LOG_TABLES: &[&str] = &["change_sets", "change_actions", "commits", "audit_events"];

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    for table in ENTITY_TABLES.iter().chain(CHANGE_LOG_TABLES) {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("afkms.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first).unwrap(), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second).unwrap(), latest_version());
    assert_table_exists(&conn_second, "change_sets");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn commit_idempotency_keys_are_unique() {
    let conn = open_db_in_memory().unwrap();
    let unique_columns: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT il.name FROM pragma_index_list('commits') AS il
                 WHERE il.\"unique\" = 1",
            )
            .unwrap();
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        indexes
            .iter()
            .flat_map(|index| {
                let mut cols = conn
                    .prepare("SELECT name FROM pragma_index_info(?1)")
                    .unwrap();
                cols.query_map([index], |row| row.get::<_, String>(0))
                    .unwrap()
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap()
            })
            .collect()
    };
    assert!(unique_columns.iter().any(|c| c == "change_set_id"));
    assert!(unique_columns.iter().any(|c| c == "client_request_id"));
}

fn assert_table_exists(conn: &Connection, table: &str) {
    let found: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get(0),
        )
        .unwrap();
    assert!(found, "missing table {table}");
}

/// Stored in `PRAGMA user_version`; 0 means a fresh file.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    identifier TEXT PRIMARY KEY,
    heading TEXT NOT NULL,
    content TEXT NOT NULL,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS goals (
    identifier TEXT PRIMARY KEY,
    heading TEXT NOT NULL,
    content TEXT NOT NULL,
    notes TEXT,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_items (
    identifier TEXT PRIMARY KEY,
    heading TEXT NOT NULL,
    content TEXT NOT NULL,
    notes TEXT,
    important INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reasoning_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    content TEXT NOT NULL,
    operation TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    success INTEGER NOT NULL,
    result TEXT,
    error TEXT
);

CREATE TABLE IF NOT EXISTS vault (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    summary TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_error (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload TEXT NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

//! Sqlite persistence for project state.
//!
//! Rows carry an opaque `payload_json` that is authoritative; the typed
//! columns beside it exist for indexing and inspection only.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use easel_core::agent::BackgroundAgent;
use easel_core::canvas::Canvas;
use easel_core::project::GitProject;
use easel_core::types::WorkspaceSession;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn.lock().unwrap().execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS canvases (
    canvas_id TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    lock_state TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_canvases_lock ON canvases(lock_state);

CREATE TABLE IF NOT EXISTS ledger_tasks (
    task_id TEXT NOT NULL,
    canvas_id TEXT NOT NULL,
    phase_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (task_id, canvas_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_canvas ON ledger_tasks(canvas_id);
CREATE INDEX IF NOT EXISTS idx_tasks_phase ON ledger_tasks(phase_tag);

CREATE TABLE IF NOT EXISTS background_agents (
    agent_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL
);
"#,
        )?;
        Ok(())
    }

    /// Persist the whole project: meta, canvases (with embedded ledgers and
    /// process records), and agents. Previous rows are replaced.
    pub fn save_project(&self, project: &GitProject) -> Result<(), PersistenceError> {
        let root_json = serde_json::to_string(&project.root_session)?;
        let canvases: Vec<(usize, &Canvas, String)> = project
            .canvases()
            .iter()
            .enumerate()
            .map(|(position, canvas)| {
                serde_json::to_string(canvas).map(|payload| (position, canvas, payload))
            })
            .collect::<Result<_, _>>()?;
        let agents: Vec<(&BackgroundAgent, String)> = project
            .agents()
            .iter()
            .map(|agent| serde_json::to_string(agent).map(|payload| (agent, payload)))
            .collect::<Result<_, _>>()?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value_json) VALUES ('root_session', ?1)",
            params![root_json],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value_json) VALUES ('current_canvas', ?1)",
            params![project.current_canvas_index().to_string()],
        )?;

        tx.execute("DELETE FROM canvases", [])?;
        tx.execute("DELETE FROM ledger_tasks", [])?;
        tx.execute("DELETE FROM background_agents", [])?;

        for (position, canvas, payload) in canvases {
            tx.execute(
                "INSERT INTO canvases \
                 (canvas_id, position, name, lock_state, payload_json, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    canvas.id.0,
                    position as i64,
                    canvas.name,
                    canvas.lock.as_str(),
                    payload,
                    canvas.created_at.to_rfc3339(),
                    canvas.updated_at.to_rfc3339(),
                ],
            )?;
            for task in canvas.ledger.tasks() {
                tx.execute(
                    "INSERT INTO ledger_tasks (task_id, canvas_id, phase_tag, payload_json) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        task.id.0,
                        canvas.id.0,
                        task.phase.tag(),
                        serde_json::to_string(task).map_err(PersistenceError::from)?,
                    ],
                )?;
            }
        }

        for (agent, payload) in agents {
            tx.execute(
                "INSERT INTO background_agents (agent_id, kind, status_tag, payload_json) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    agent.id.0,
                    agent.kind.as_str(),
                    agent.status.tag(),
                    payload,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the persisted project, if one was ever saved.
    pub fn load_project(&self) -> Result<Option<GitProject>, PersistenceError> {
        let conn = self.conn.lock().unwrap();

        let root_json: Option<String> = conn
            .query_row(
                "SELECT value_json FROM meta WHERE key = 'root_session'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(root_json) = root_json else {
            return Ok(None);
        };
        let root_session: WorkspaceSession = serde_json::from_str(&root_json)?;

        let current_canvas: usize = conn
            .query_row(
                "SELECT value_json FROM meta WHERE key = 'current_canvas'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        let mut canvases = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT payload_json FROM canvases ORDER BY position ASC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for payload in rows {
                let canvas: Canvas = serde_json::from_str(&payload?)?;
                canvases.push(canvas);
            }
        }

        let mut agents = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT payload_json FROM background_agents")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for payload in rows {
                let agent: BackgroundAgent = serde_json::from_str(&payload?)?;
                agents.push(agent);
            }
        }

        Ok(Some(GitProject::from_parts(
            root_session,
            canvases,
            current_canvas,
            agents,
        )))
    }

    /// Canvas ids currently holding a given lock tag (index-backed query).
    pub fn canvases_with_lock(&self, lock_tag: &str) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT canvas_id FROM canvases WHERE lock_state = ?1 ORDER BY position")?;
        let rows = stmt.query_map(params![lock_tag], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }
}

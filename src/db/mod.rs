//! Database module - SQLite stand-in for the hosted routine store
//!
//! Serves routines in their nested fetch shape and records finished sessions
//! with the series performed in them.

pub mod loader;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::routine::{
    ExecutionType, RawBlock, RawExercise, RawRoutine, RawSeries, RawSubBlock, RawSubBlockExercise,
    RoutineKind, SubBlockKind,
};

pub use loader::RoutineLoader;

/// Training session row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub created_at: DateTime<Utc>,
    #[serde(rename = "duracion_segundos")]
    pub duration_secs: u64,
    #[serde(rename = "alumno_id")]
    pub student_id: String,
    #[serde(rename = "rutina_id")]
    pub routine_id: String,
    #[serde(rename = "tipo_rutina")]
    pub kind: RoutineKind,
}

/// One set actually performed in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPerformed {
    #[serde(rename = "sesion_id")]
    pub session_id: i64,
    #[serde(rename = "ejercicio_id")]
    pub exercise_id: String,
    #[serde(rename = "nro_set")]
    pub set_number: u32,
    #[serde(rename = "reps_realizadas", skip_serializing_if = "Option::is_none")]
    pub reps_performed: Option<u32>,
    #[serde(rename = "carga_realizada")]
    pub load_performed: String,
    #[serde(rename = "duracion_realizada_segundos", skip_serializing_if = "Option::is_none")]
    pub duration_performed_secs: Option<u32>,
}

/// Most recent saved session of a routine for a student
#[derive(Debug, Clone, PartialEq)]
pub struct LastSession {
    pub session_id: i64,
    pub created_at: DateTime<Utc>,
    pub series: Vec<SeriesPerformed>,
}

impl LastSession {
    /// What was done last time for a catalog exercise and set number
    pub fn for_exercise(&self, exercise_id: &str, set_number: u32) -> Option<&SeriesPerformed> {
        self.series
            .iter()
            .find(|s| s.exercise_id == exercise_id && s.set_number == set_number)
    }
}

/// Remote routine store, as the workout core sees it
pub trait DataStore {
    fn fetch_routine(&self, routine_id: &str, kind: RoutineKind) -> Result<RawRoutine>;

    fn fetch_last_session(
        &self,
        routine_id: &str,
        kind: RoutineKind,
        student_id: &str,
    ) -> Result<Option<LastSession>>;

    /// Insert a session and return its generated id
    fn insert_session(&self, session: &NewSession) -> Result<i64>;

    /// Insert all rows or none
    fn insert_series_performed(&self, rows: &[SeriesPerformed]) -> Result<()>;

    fn delete_session(&self, session_id: i64) -> Result<()>;
}

/// Database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rutinas (
                id TEXT NOT NULL,
                tipo TEXT NOT NULL,
                nombre TEXT NOT NULL,
                descripcion TEXT,
                PRIMARY KEY (id, tipo)
            );
            CREATE TABLE IF NOT EXISTS bloques (
                id TEXT PRIMARY KEY,
                rutina_id TEXT NOT NULL,
                rutina_tipo TEXT NOT NULL,
                orden INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS subbloques (
                id TEXT PRIMARY KEY,
                bloque_id TEXT NOT NULL,
                orden INTEGER NOT NULL,
                nombre TEXT NOT NULL,
                tipo TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ejercicios (
                id TEXT PRIMARY KEY,
                nombre TEXT NOT NULL,
                video_url TEXT
            );
            CREATE TABLE IF NOT EXISTS subbloques_ejercicios (
                id TEXT PRIMARY KEY,
                subbloque_id TEXT NOT NULL,
                ejercicio_id TEXT NOT NULL,
                posicion INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS series_subejercicio (
                subbloque_ejercicio_id TEXT NOT NULL,
                nro_set INTEGER NOT NULL,
                reps INTEGER,
                pausa INTEGER,
                nota TEXT,
                tipo_ejecucion TEXT NOT NULL,
                duracion_segundos INTEGER,
                unidad_tiempo TEXT,
                carga_sugerida TEXT,
                PRIMARY KEY (subbloque_ejercicio_id, nro_set)
            );
            CREATE TABLE IF NOT EXISTS sesiones_entrenamiento (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                duracion_segundos INTEGER NOT NULL,
                alumno_id TEXT NOT NULL,
                rutina_base_id TEXT,
                rutina_personalizada_id TEXT
            );
            CREATE TABLE IF NOT EXISTS series_realizadas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sesion_id INTEGER NOT NULL,
                ejercicio_id TEXT NOT NULL,
                nro_set INTEGER NOT NULL,
                reps_realizadas INTEGER,
                carga_realizada TEXT NOT NULL,
                duracion_realizada_segundos INTEGER
            );",
        )?;
        Ok(())
    }

    /// Store a routine given in fetch shape, replacing an earlier copy
    pub fn import_routine(&self, routine: &RawRoutine, kind: RoutineKind) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO rutinas (id, tipo, nombre, descripcion) VALUES (?1, ?2, ?3, ?4)",
            params![routine.id, kind.as_str(), routine.nombre, routine.descripcion],
        )?;

        // drop the old tree so removed blocks do not linger
        tx.execute(
            "DELETE FROM series_subejercicio WHERE subbloque_ejercicio_id IN (
                SELECT se.id FROM subbloques_ejercicios se
                JOIN subbloques sb ON sb.id = se.subbloque_id
                JOIN bloques b ON b.id = sb.bloque_id
                WHERE b.rutina_id = ?1 AND b.rutina_tipo = ?2)",
            params![routine.id, kind.as_str()],
        )?;
        tx.execute(
            "DELETE FROM subbloques_ejercicios WHERE subbloque_id IN (
                SELECT sb.id FROM subbloques sb JOIN bloques b ON b.id = sb.bloque_id
                WHERE b.rutina_id = ?1 AND b.rutina_tipo = ?2)",
            params![routine.id, kind.as_str()],
        )?;
        tx.execute(
            "DELETE FROM subbloques WHERE bloque_id IN (
                SELECT id FROM bloques WHERE rutina_id = ?1 AND rutina_tipo = ?2)",
            params![routine.id, kind.as_str()],
        )?;
        tx.execute(
            "DELETE FROM bloques WHERE rutina_id = ?1 AND rutina_tipo = ?2",
            params![routine.id, kind.as_str()],
        )?;

        for block in routine.bloques.iter().flatten() {
            tx.execute(
                "INSERT OR REPLACE INTO bloques (id, rutina_id, rutina_tipo, orden) VALUES (?1, ?2, ?3, ?4)",
                params![block.id, routine.id, kind.as_str(), block.orden],
            )?;

            for sub_block in block.subbloques.iter().flatten() {
                let tipo = match sub_block.tipo {
                    SubBlockKind::Simple => "simple",
                    SubBlockKind::Superset => "superset",
                };
                tx.execute(
                    "INSERT OR REPLACE INTO subbloques (id, bloque_id, orden, nombre, tipo) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![sub_block.id, block.id, sub_block.orden, sub_block.nombre, tipo],
                )?;

                for (position, entry) in sub_block.ejercicios.iter().flatten().enumerate() {
                    tx.execute(
                        "INSERT OR REPLACE INTO ejercicios (id, nombre, video_url) VALUES (?1, ?2, ?3)",
                        params![entry.ejercicio.id, entry.ejercicio.nombre, entry.ejercicio.video_url],
                    )?;
                    tx.execute(
                        "INSERT OR REPLACE INTO subbloques_ejercicios (id, subbloque_id, ejercicio_id, posicion) VALUES (?1, ?2, ?3, ?4)",
                        params![entry.id, sub_block.id, entry.ejercicio.id, position as i64],
                    )?;

                    for s in entry.series.iter().flatten() {
                        tx.execute(
                            "INSERT OR REPLACE INTO series_subejercicio
                             (subbloque_ejercicio_id, nro_set, reps, pausa, nota, tipo_ejecucion, duracion_segundos, unidad_tiempo, carga_sugerida)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            params![
                                entry.id,
                                s.nro_set,
                                s.reps,
                                s.pausa,
                                s.nota,
                                s.tipo_ejecucion.as_str(),
                                s.duracion_segundos,
                                s.unidad_tiempo,
                                s.carga_sugerida,
                            ],
                        )?;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Ids and names of all stored routines
    pub fn list_routines(&self) -> Result<Vec<(String, RoutineKind, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, tipo, nombre FROM rutinas ORDER BY nombre")?;
        let rows = stmt
            .query_map([], |row| {
                let tipo: String = row.get(1)?;
                Ok((row.get(0)?, tipo, row.get(2)?))
            })?
            .collect::<Result<Vec<(String, String, String)>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, tipo, nombre)| tipo.parse().ok().map(|kind| (id, kind, nombre)))
            .collect())
    }

    fn fetch_blocks(&self, routine_id: &str, kind: RoutineKind) -> Result<Vec<RawBlock>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, orden FROM bloques WHERE rutina_id = ?1 AND rutina_tipo = ?2")?;
        let blocks = stmt
            .query_map(params![routine_id, kind.as_str()], |row| {
                Ok(RawBlock {
                    id: row.get(0)?,
                    orden: row.get(1)?,
                    subbloques: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        blocks
            .into_iter()
            .map(|mut block| -> Result<RawBlock> {
                block.subbloques = Some(self.fetch_sub_blocks(&block.id)?);
                Ok(block)
            })
            .collect()
    }

    fn fetch_sub_blocks(&self, block_id: &str) -> Result<Vec<RawSubBlock>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, orden, nombre, tipo FROM subbloques WHERE bloque_id = ?1")?;
        let sub_blocks = stmt
            .query_map(params![block_id], |row| {
                let tipo: String = row.get(3)?;
                Ok(RawSubBlock {
                    id: row.get(0)?,
                    orden: row.get(1)?,
                    nombre: row.get(2)?,
                    tipo: if tipo == "superset" {
                        SubBlockKind::Superset
                    } else {
                        SubBlockKind::Simple
                    },
                    ejercicios: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        sub_blocks
            .into_iter()
            .map(|mut sub_block| -> Result<RawSubBlock> {
                sub_block.ejercicios = Some(self.fetch_entries(&sub_block.id)?);
                Ok(sub_block)
            })
            .collect()
    }

    fn fetch_entries(&self, sub_block_id: &str) -> Result<Vec<RawSubBlockExercise>> {
        let mut stmt = self.conn.prepare(
            "SELECT se.id, e.id, e.nombre, e.video_url
             FROM subbloques_ejercicios se
             JOIN ejercicios e ON e.id = se.ejercicio_id
             WHERE se.subbloque_id = ?1
             ORDER BY se.posicion",
        )?;
        let entries = stmt
            .query_map(params![sub_block_id], |row| {
                Ok(RawSubBlockExercise {
                    id: row.get(0)?,
                    ejercicio: RawExercise {
                        id: row.get(1)?,
                        nombre: row.get(2)?,
                        video_url: row.get(3)?,
                    },
                    series: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        entries
            .into_iter()
            .map(|mut entry| -> Result<RawSubBlockExercise> {
                entry.series = Some(self.fetch_series(&entry.id)?);
                Ok(entry)
            })
            .collect()
    }

    fn fetch_series(&self, entry_id: &str) -> Result<Vec<RawSeries>> {
        let mut stmt = self.conn.prepare(
            "SELECT nro_set, reps, pausa, nota, tipo_ejecucion, duracion_segundos, unidad_tiempo, carga_sugerida
             FROM series_subejercicio WHERE subbloque_ejercicio_id = ?1 ORDER BY nro_set",
        )?;
        let series = stmt
            .query_map(params![entry_id], |row| {
                let tipo: String = row.get(4)?;
                Ok(RawSeries {
                    nro_set: row.get(0)?,
                    reps: row.get(1)?,
                    pausa: row.get(2)?,
                    nota: row.get(3)?,
                    tipo_ejecucion: ExecutionType::from_db(&tipo),
                    duracion_segundos: row.get(5)?,
                    unidad_tiempo: row.get(6)?,
                    carga_sugerida: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(series)
    }

    fn routine_column(kind: RoutineKind) -> &'static str {
        match kind {
            RoutineKind::Base => "rutina_base_id",
            RoutineKind::Personalizada => "rutina_personalizada_id",
        }
    }
}

impl DataStore for Database {
    fn fetch_routine(&self, routine_id: &str, kind: RoutineKind) -> Result<RawRoutine> {
        let header = self
            .conn
            .query_row(
                "SELECT nombre, descripcion FROM rutinas WHERE id = ?1 AND tipo = ?2",
                params![routine_id, kind.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((nombre, descripcion)) = header else {
            bail!("routine {} ({}) not found", routine_id, kind);
        };

        Ok(RawRoutine {
            id: routine_id.to_string(),
            nombre,
            descripcion,
            bloques: Some(self.fetch_blocks(routine_id, kind)?),
        })
    }

    fn fetch_last_session(
        &self,
        routine_id: &str,
        kind: RoutineKind,
        student_id: &str,
    ) -> Result<Option<LastSession>> {
        let sql = format!(
            "SELECT id, created_at FROM sesiones_entrenamiento
             WHERE {} = ?1 AND alumno_id = ?2
             ORDER BY created_at DESC, id DESC LIMIT 1",
            Self::routine_column(kind)
        );
        let header = self
            .conn
            .query_row(&sql, params![routine_id, student_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;

        let Some((session_id, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT ejercicio_id, nro_set, reps_realizadas, carga_realizada, duracion_realizada_segundos
             FROM series_realizadas WHERE sesion_id = ?1 ORDER BY id",
        )?;
        let series = stmt
            .query_map(params![session_id], |row| {
                Ok(SeriesPerformed {
                    session_id,
                    exercise_id: row.get(0)?,
                    set_number: row.get(1)?,
                    reps_performed: row.get(2)?,
                    load_performed: row.get(3)?,
                    duration_performed_secs: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(LastSession {
            session_id,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            series,
        }))
    }

    fn insert_session(&self, session: &NewSession) -> Result<i64> {
        let sql = format!(
            "INSERT INTO sesiones_entrenamiento (created_at, duracion_segundos, alumno_id, {}) VALUES (?1, ?2, ?3, ?4)",
            Self::routine_column(session.kind)
        );
        self.conn.execute(
            &sql,
            params![
                session.created_at.to_rfc3339(),
                session.duration_secs as i64,
                session.student_id,
                session.routine_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_series_performed(&self, rows: &[SeriesPerformed]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO series_realizadas
                 (sesion_id, ejercicio_id, nro_set, reps_realizadas, carga_realizada, duracion_realizada_segundos)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.session_id,
                    row.exercise_id,
                    row.set_number,
                    row.reps_performed,
                    row.load_performed,
                    row.duration_performed_secs,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_session(&self, session_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM series_realizadas WHERE sesion_id = ?1", params![session_id])?;
        self.conn
            .execute("DELETE FROM sesiones_entrenamiento WHERE id = ?1", params![session_id])?;
        Ok(())
    }
}

//! Routine tree model - blocks, sub-blocks, exercise slots and their series
//!
//! `RawRoutine` is the nested shape the data store returns (every array may be
//! missing). `Routine::from_raw` normalizes it: arrays default to empty,
//! blocks and sub-blocks are stably sorted by `orden`, series by set number,
//! and superset sub-blocks get their round count.

pub mod element;
pub mod sequence;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use element::{ElementKind, ElementRef};
pub use sequence::ElementSequence;

/// Routine table a routine lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineKind {
    Base,
    Personalizada,
}

impl RoutineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineKind::Base => "base",
            RoutineKind::Personalizada => "personalizada",
        }
    }
}

impl fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(RoutineKind::Base),
            "personalizada" => Ok(RoutineKind::Personalizada),
            other => Err(format!("unknown routine kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubBlockKind {
    #[default]
    Simple,
    Superset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionType {
    #[default]
    Standard,
    Time,
    ToFailure,
}

impl ExecutionType {
    /// Reps are recorded for standard and to-failure sets, duration for timed ones
    pub fn is_timed(&self) -> bool {
        matches!(self, ExecutionType::Time)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Standard => "standard",
            ExecutionType::Time => "time",
            ExecutionType::ToFailure => "toFailure",
        }
    }

    /// Unknown values fall back to standard
    pub fn from_db(value: &str) -> Self {
        match value {
            "time" => ExecutionType::Time,
            "toFailure" => ExecutionType::ToFailure,
            _ => ExecutionType::Standard,
        }
    }
}

// ============ RAW FETCH SHAPE ============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRoutine {
    pub id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub bloques: Option<Vec<RawBlock>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlock {
    pub id: String,
    #[serde(default)]
    pub orden: i32,
    #[serde(default)]
    pub subbloques: Option<Vec<RawSubBlock>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSubBlock {
    pub id: String,
    #[serde(default)]
    pub orden: i32,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub tipo: SubBlockKind,
    #[serde(default)]
    pub ejercicios: Option<Vec<RawSubBlockExercise>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSubBlockExercise {
    pub id: String,
    pub ejercicio: RawExercise,
    #[serde(default)]
    pub series: Option<Vec<RawSeries>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExercise {
    pub id: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSeries {
    pub nro_set: u32,
    #[serde(default)]
    pub reps: Option<u32>,
    #[serde(default)]
    pub pausa: Option<u32>,
    #[serde(default)]
    pub nota: Option<String>,
    #[serde(default)]
    pub tipo_ejecucion: ExecutionType,
    #[serde(default)]
    pub duracion_segundos: Option<u32>,
    #[serde(default)]
    pub unidad_tiempo: Option<String>,
    #[serde(default)]
    pub carga_sugerida: Option<String>,
}

// ============ NORMALIZED TREE ============

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub order: i32,
    pub sub_blocks: Vec<SubBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubBlock {
    pub id: String,
    pub order: i32,
    pub name: String,
    pub kind: SubBlockKind,
    pub exercises: Vec<SubBlockExercise>,
    /// Max series count across exercises for supersets, 1 otherwise
    pub superset_round_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubBlockExercise {
    pub id: String,
    pub exercise: ExerciseInfo,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseInfo {
    pub id: String,
    pub name: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub set_number: u32,
    pub reps: Option<u32>,
    pub pause_secs: Option<u32>,
    pub note: Option<String>,
    pub execution_type: ExecutionType,
    pub duration_secs: Option<u32>,
    pub time_unit: Option<String>,
    pub suggested_load: Option<String>,
}

/// Display grouping guessed from the sub-block name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubBlockRole {
    WarmUp,
    Main,
    Other,
    CoolDown,
}

impl Routine {
    pub fn from_raw(raw: RawRoutine) -> Self {
        let mut blocks: Vec<Block> = raw
            .bloques
            .unwrap_or_default()
            .into_iter()
            .map(Block::from_raw)
            .collect();
        // sort_by_key is stable, ties keep fetch order
        blocks.sort_by_key(|b| b.order);

        Self {
            id: raw.id,
            name: raw.nombre,
            description: raw.descripcion,
            blocks,
        }
    }

    /// Copy of this routine reduced to a single block
    pub fn filtered_to_block(&self, block_id: &str) -> Option<Routine> {
        let block = self.blocks.iter().find(|b| b.id == block_id)?;
        Some(Routine {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            blocks: vec![block.clone()],
        })
    }

    pub fn sub_blocks(&self) -> impl Iterator<Item = &SubBlock> {
        self.blocks.iter().flat_map(|b| b.sub_blocks.iter())
    }

    pub fn find_sub_block(&self, sub_block_id: &str) -> Option<&SubBlock> {
        self.sub_blocks().find(|sb| sb.id == sub_block_id)
    }

    /// Resolve an element to the sub-block, exercise slot and series it stands for.
    ///
    /// Returns `None` when the element points at something the tree no longer
    /// contains (stale progress from an edited routine).
    pub fn resolve(&self, element: &ElementRef) -> Option<ResolvedElement<'_>> {
        let sub_block = self.find_sub_block(element.sub_block_id())?;
        let exercise = sub_block
            .exercises
            .iter()
            .find(|e| e.id == element.exercise_id())?;

        match element {
            ElementRef::Simple { set_number, .. } => {
                if sub_block.kind != SubBlockKind::Simple {
                    return None;
                }
                let series = exercise.series.iter().find(|s| s.set_number == *set_number)?;
                Some(ResolvedElement {
                    sub_block,
                    exercise,
                    series: Some(series),
                    exact: true,
                })
            }
            ElementRef::SupersetRound { round, .. } => {
                if sub_block.kind != SubBlockKind::Superset || *round > sub_block.superset_round_count {
                    return None;
                }
                let exact = exercise.series.iter().find(|s| s.set_number == *round);
                Some(ResolvedElement {
                    sub_block,
                    exercise,
                    series: exact.or_else(|| exercise.series.first()),
                    exact: exact.is_some(),
                })
            }
        }
    }
}

impl Block {
    fn from_raw(raw: RawBlock) -> Self {
        let mut sub_blocks: Vec<SubBlock> = raw
            .subbloques
            .unwrap_or_default()
            .into_iter()
            .map(SubBlock::from_raw)
            .collect();
        sub_blocks.sort_by_key(|sb| sb.order);

        Self {
            id: raw.id,
            order: raw.orden,
            sub_blocks,
        }
    }

    /// Sub-blocks in display order: warm-up first, cool-down last.
    ///
    /// Only for presentation; "next element" logic always follows `order`.
    pub fn display_order(&self) -> Vec<&SubBlock> {
        let mut ordered: Vec<&SubBlock> = self.sub_blocks.iter().collect();
        ordered.sort_by_key(|sb| sb.role());
        ordered
    }
}

impl SubBlock {
    fn from_raw(raw: RawSubBlock) -> Self {
        let exercises: Vec<SubBlockExercise> = raw
            .ejercicios
            .unwrap_or_default()
            .into_iter()
            .map(SubBlockExercise::from_raw)
            .collect();

        let superset_round_count = match raw.tipo {
            SubBlockKind::Superset => exercises
                .iter()
                .map(|e| e.series.len() as u32)
                .max()
                .unwrap_or(0)
                .max(1),
            SubBlockKind::Simple => 1,
        };

        Self {
            id: raw.id,
            order: raw.orden,
            name: raw.nombre,
            kind: raw.tipo,
            exercises,
            superset_round_count,
        }
    }

    pub fn role(&self) -> SubBlockRole {
        let name = self.name.to_lowercase();
        if name.contains("calentamiento") {
            SubBlockRole::WarmUp
        } else if name.contains("estiramiento") || name.contains("cooldown") {
            SubBlockRole::CoolDown
        } else if name.contains("principal") {
            SubBlockRole::Main
        } else {
            SubBlockRole::Other
        }
    }

    pub fn is_warm_up(&self) -> bool {
        self.role() == SubBlockRole::WarmUp
    }

    /// Elements of this sub-block in sequence order
    pub fn elements(&self) -> Vec<ElementRef> {
        match self.kind {
            SubBlockKind::Simple => self
                .exercises
                .iter()
                .flat_map(|e| {
                    e.series
                        .iter()
                        .map(move |s| ElementRef::simple(&self.id, &e.id, s.set_number))
                })
                .collect(),
            SubBlockKind::Superset => (1..=self.superset_round_count)
                .flat_map(|round| {
                    self.exercises
                        .iter()
                        .map(move |e| ElementRef::superset_round(&self.id, &e.id, round))
                })
                .collect(),
        }
    }

    /// All elements belonging to one superset round, in declaration order
    pub fn round_elements(&self, round: u32) -> Vec<ElementRef> {
        self.exercises
            .iter()
            .map(|e| ElementRef::superset_round(&self.id, &e.id, round))
            .collect()
    }

    /// Rest after a full round: the longest pause configured for that round
    pub fn round_pause_secs(&self, round: u32) -> u32 {
        self.exercises
            .iter()
            .filter_map(|e| {
                e.series
                    .iter()
                    .find(|s| s.set_number == round)
                    .or_else(|| e.series.first())
            })
            .filter_map(|s| s.pause_secs)
            .max()
            .unwrap_or(0)
    }
}

impl SubBlockExercise {
    fn from_raw(raw: RawSubBlockExercise) -> Self {
        let mut series: Vec<Series> = raw
            .series
            .unwrap_or_default()
            .into_iter()
            .map(Series::from_raw)
            .collect();
        series.sort_by_key(|s| s.set_number);
        series.dedup_by_key(|s| s.set_number);

        Self {
            id: raw.id,
            exercise: ExerciseInfo {
                id: raw.ejercicio.id,
                name: raw.ejercicio.nombre,
                video_url: raw.ejercicio.video_url,
            },
            series,
        }
    }
}

impl Series {
    fn from_raw(raw: RawSeries) -> Self {
        Self {
            set_number: raw.nro_set,
            reps: raw.reps,
            pause_secs: raw.pausa,
            note: raw.nota,
            execution_type: raw.tipo_ejecucion,
            duration_secs: raw.duracion_segundos,
            time_unit: raw.unidad_tiempo,
            suggested_load: raw.carga_sugerida,
        }
    }
}

/// An element looked up in the tree
#[derive(Debug, Clone, Copy)]
pub struct ResolvedElement<'a> {
    pub sub_block: &'a SubBlock,
    pub exercise: &'a SubBlockExercise,
    /// Data source series. For superset rounds without their own series this
    /// is the exercise's first series.
    pub series: Option<&'a Series>,
    /// Whether `series` is the exact set/round the element refers to
    pub exact: bool,
}

impl ResolvedElement<'_> {
    pub fn exercise_name(&self) -> &str {
        &self.exercise.exercise.name
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.series.map(|s| s.execution_type).unwrap_or_default()
    }

    /// Pause configured on the series itself
    pub fn pause_secs(&self) -> u32 {
        self.series.and_then(|s| s.pause_secs).unwrap_or(0)
    }

    /// Suggested reps, 0 when the round has no series of its own
    pub fn suggested_reps(&self) -> u32 {
        if !self.exact {
            return 0;
        }
        self.series.and_then(|s| s.reps).unwrap_or(0)
    }

    pub fn suggested_duration(&self) -> u32 {
        if !self.exact {
            return 0;
        }
        self.series.and_then(|s| s.duration_secs).unwrap_or(0)
    }

    pub fn suggested_load(&self) -> String {
        if !self.exact {
            return "N/A".to_string();
        }
        self.series
            .and_then(|s| s.suggested_load.clone())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

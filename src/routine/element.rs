//! Element identity - which set or superset round a completion refers to
//!
//! In memory an element is always an `ElementRef`. Strings only exist at the
//! storage boundary, in the form
//!
//! ```text
//! simple/<subBlockId>/<exerciseId>/set<N>
//! superset/<subBlockId>/<exerciseId>/round<N>
//! ```
//!
//! with `%` and `/` percent-escaped inside the component ids, so UUIDs (or
//! anything else) round-trip untouched. Ids written by older builds
//! (`simple-<sb>-<ex>-set<N>`) are still accepted when they can be split
//! without guessing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

const SIMPLE_TOKEN: &str = "simple";
const SUPERSET_TOKEN: &str = "superset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Simple,
    Superset,
}

/// One completable unit of work.
///
/// `exercise_id` is the id of the exercise *slot* inside the sub-block
/// (`SubBlockExercise::id`), not the catalog exercise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementRef {
    Simple {
        sub_block_id: String,
        exercise_id: String,
        set_number: u32,
    },
    SupersetRound {
        sub_block_id: String,
        exercise_id: String,
        round: u32,
    },
}

impl ElementRef {
    pub fn simple(sub_block_id: &str, exercise_id: &str, set_number: u32) -> Self {
        ElementRef::Simple {
            sub_block_id: sub_block_id.to_string(),
            exercise_id: exercise_id.to_string(),
            set_number,
        }
    }

    pub fn superset_round(sub_block_id: &str, exercise_id: &str, round: u32) -> Self {
        ElementRef::SupersetRound {
            sub_block_id: sub_block_id.to_string(),
            exercise_id: exercise_id.to_string(),
            round,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            ElementRef::Simple { .. } => ElementKind::Simple,
            ElementRef::SupersetRound { .. } => ElementKind::Superset,
        }
    }

    pub fn sub_block_id(&self) -> &str {
        match self {
            ElementRef::Simple { sub_block_id, .. }
            | ElementRef::SupersetRound { sub_block_id, .. } => sub_block_id,
        }
    }

    pub fn exercise_id(&self) -> &str {
        match self {
            ElementRef::Simple { exercise_id, .. }
            | ElementRef::SupersetRound { exercise_id, .. } => exercise_id,
        }
    }

    /// Set number for simple elements, round number for superset elements (1-based)
    pub fn number(&self) -> u32 {
        match self {
            ElementRef::Simple { set_number, .. } => *set_number,
            ElementRef::SupersetRound { round, .. } => *round,
        }
    }

    /// Canonical storage form
    pub fn encode(&self) -> String {
        let (token, suffix) = match self {
            ElementRef::Simple { set_number, .. } => (SIMPLE_TOKEN, format!("set{}", set_number)),
            ElementRef::SupersetRound { round, .. } => (SUPERSET_TOKEN, format!("round{}", round)),
        };
        format!(
            "{}/{}/{}/{}",
            token,
            escape(self.sub_block_id()),
            escape(self.exercise_id()),
            suffix
        )
    }

    /// Parse a stored id, canonical form first, legacy hyphen form second.
    pub fn decode(id: &str) -> Result<Self, DecodeError> {
        if id.contains('/') {
            decode_canonical(id)
        } else {
            decode_legacy(id)
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ElementRef {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementRef::decode(s)
    }
}

impl Serialize for ElementRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ElementRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ElementRef::decode(&raw).map_err(serde::de::Error::custom)
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(id: &str, component: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("2F") | Some("2f") => out.push('/'),
            _ => return Err(DecodeError::new(id, "bad escape sequence")),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    if out.is_empty() {
        return Err(DecodeError::new(id, "empty component"));
    }
    Ok(out)
}

fn parse_number(id: &str, digits: &str) -> Result<u32, DecodeError> {
    match digits.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(DecodeError::new(id, "set/round number must be a positive integer")),
    }
}

fn decode_canonical(id: &str) -> Result<ElementRef, DecodeError> {
    let parts: Vec<&str> = id.split('/').collect();
    let [token, sub_block, exercise, suffix] = parts.as_slice() else {
        return Err(DecodeError::new(id, "expected four fields"));
    };

    let sub_block_id = unescape(id, sub_block)?;
    let exercise_id = unescape(id, exercise)?;

    match *token {
        SIMPLE_TOKEN => {
            let digits = suffix
                .strip_prefix("set")
                .ok_or_else(|| DecodeError::new(id, "simple id must end in setN"))?;
            Ok(ElementRef::Simple {
                sub_block_id,
                exercise_id,
                set_number: parse_number(id, digits)?,
            })
        }
        SUPERSET_TOKEN => {
            let digits = suffix
                .strip_prefix("round")
                .ok_or_else(|| DecodeError::new(id, "superset id must end in roundN"))?;
            Ok(ElementRef::SupersetRound {
                sub_block_id,
                exercise_id,
                round: parse_number(id, digits)?,
            })
        }
        _ => Err(DecodeError::new(id, "unknown kind")),
    }
}

/// `simple-<sb>-<ex>-set<N>` / `superset-<sb>-<ex>-set<N>`
fn decode_legacy(id: &str) -> Result<ElementRef, DecodeError> {
    let (kind, body) = if let Some(body) = id.strip_prefix("simple-") {
        (ElementKind::Simple, body)
    } else if let Some(body) = id.strip_prefix("superset-") {
        (ElementKind::Superset, body)
    } else {
        return Err(DecodeError::new(id, "unknown kind"));
    };

    let set_pos = body
        .rfind("-set")
        .ok_or_else(|| DecodeError::new(id, "missing setN suffix"))?;
    let number = parse_number(id, &body[set_pos + 4..])?;
    let middle = &body[..set_pos];

    let (sub_block_id, exercise_id) =
        split_legacy_pair(middle).ok_or_else(|| DecodeError::new(id, "ambiguous legacy id"))?;

    Ok(match kind {
        ElementKind::Simple => ElementRef::simple(sub_block_id, exercise_id, number),
        ElementKind::Superset => ElementRef::superset_round(sub_block_id, exercise_id, number),
    })
}

const UUID_LEN: usize = 36;

fn is_uuid(s: &str) -> bool {
    s.len() == UUID_LEN
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Split `<sb>-<ex>` only where the answer is unique: either side is a UUID,
/// or there is exactly one hyphen.
fn split_legacy_pair(middle: &str) -> Option<(&str, &str)> {
    if let (Some(head), Some(b'-')) = (middle.get(..UUID_LEN), middle.as_bytes().get(UUID_LEN).copied())
        && is_uuid(head)
        && middle.len() > UUID_LEN + 1
    {
        return Some((head, &middle[UUID_LEN + 1..]));
    }

    if middle.len() > UUID_LEN + 1 {
        let split = middle.len() - UUID_LEN;
        if let Some(tail) = middle.get(split..)
            && is_uuid(tail)
            && middle.as_bytes()[split - 1] == b'-'
            && !middle[..split - 1].contains('-')
        {
            return Some((&middle[..split - 1], tail));
        }
    }

    let mut halves = middle.split('-');
    match (halves.next(), halves.next(), halves.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => Some((a, b)),
        _ => None,
    }
}

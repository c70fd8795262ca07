//! Voltra core types: registry entities as opaque records.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod columns;

/// Identifier assigned by the external registry (stringified contract index).
pub type EntityId = String;

/// The entity collections served by the trading registries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ProducingAsset,
    ConsumingAsset,
    Demand,
    Supply,
    Agreement,
    Certificate,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::ProducingAsset,
        EntityKind::ConsumingAsset,
        EntityKind::Demand,
        EntityKind::Supply,
        EntityKind::Agreement,
        EntityKind::Certificate,
    ];

    /// Stable lowercase key used by the CLI and collection registry.
    pub fn key(&self) -> &'static str {
        match self {
            EntityKind::ProducingAsset => "producing-asset",
            EntityKind::ConsumingAsset => "consuming-asset",
            EntityKind::Demand => "demand",
            EntityKind::Supply => "supply",
            EntityKind::Agreement => "agreement",
            EntityKind::Certificate => "certificate",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entity kind: {0} (expect one of producing-asset, consuming-asset, demand, supply, agreement, certificate)")]
pub struct KindParseError(String);

impl std::str::FromStr for EntityKind {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.key() == s)
            .ok_or_else(|| KindParseError(s.to_string()))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One registry entity. The payload is opaque to the core beyond its field
/// values; everything downstream reads it through [`lookup_path`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub raw: serde_json::Value,
}

impl EntityRecord {
    /// Build a record from a raw registry payload carrying an `id` field.
    pub fn from_raw(kind: EntityKind, raw: serde_json::Value) -> anyhow::Result<Self> {
        let id = match raw.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => anyhow::bail!("{} payload missing id", kind),
        };
        Ok(Self { id, kind, raw })
    }
}

/// Entry representing one projected display cell: `(ColumnId, RenderedValue)`.
pub type ProjectedCell = (u32, String);

/// Turns a raw registry payload into rendered display cells for the tables.
pub trait RowProjector: Send + Sync {
    fn project(&self, raw: &serde_json::Value) -> SmallVec<[ProjectedCell; 8]>;
}

/// Resolve a dotted/bracketed path (`offChainProperties.country`,
/// `readings[2].energy`) inside a raw payload. Returns `None` as soon as any
/// segment is absent.
pub fn lookup_path<'a>(raw: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut cur = raw;
    for seg in split_path(path) {
        cur = match seg {
            PathSeg::Key(k) => cur.get(k)?,
            PathSeg::Index(i) => cur.get(i)?,
        };
    }
    Some(cur)
}

enum PathSeg<'a> {
    Key(&'a str),
    Index(usize),
}

fn split_path(path: &str) -> impl Iterator<Item = PathSeg<'_>> {
    path.split('.').flat_map(|part| {
        let mut out: SmallVec<[PathSeg<'_>; 2]> = SmallVec::new();
        match part.find('[') {
            None => {
                // bare numeric segments double as array indices
                match part.parse::<usize>() {
                    Ok(i) => out.push(PathSeg::Index(i)),
                    Err(_) => out.push(PathSeg::Key(part)),
                }
            }
            Some(open) => {
                if open > 0 {
                    out.push(PathSeg::Key(&part[..open]));
                }
                let mut rest = &part[open..];
                while let Some(close) = rest.find(']') {
                    if let Ok(i) = rest[1..close].parse::<usize>() {
                        out.push(PathSeg::Index(i));
                    }
                    rest = match rest[close + 1..].find('[') {
                        Some(next) => &rest[close + 1 + next..],
                        None => break,
                    };
                }
            }
        }
        out.into_iter()
    })
}

/// Canonical string form of a JSON scalar, used for display and filter
/// comparison. Null, objects, and arrays have no scalar form.
pub fn scalar_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric view of a scalar; numeric strings are accepted since registry
/// payloads carry amounts both ways.
pub fn scalar_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub mod prelude {
    pub use super::{
        lookup_path, scalar_f64, scalar_string, EntityId, EntityKind, EntityRecord, ProjectedCell,
        RowProjector,
    };
}

//! Collaborator interfaces to the UI-automation layer.
//!
//! The engine never talks to a screen directly. It reads the chat through a
//! [`SurfaceReader`] and types replies through an [`InputInjector`]; concrete
//! screen-capture or template-matching backends plug in behind these traits.

pub mod transcript;

pub use transcript::{ConsoleInjector, TranscriptSurface};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;

/// Screen rectangle holding the monitored conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FromStr for RegionBounds {
    type Err = String;

    /// Parses `"x,y,width,height"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(format!("expected 'x,y,width,height', got '{s}'"));
        };
        let num_err = |e: std::num::ParseIntError| format!("invalid region '{s}': {e}");
        Ok(Self {
            x: x.parse().map_err(num_err)?,
            y: y.parse().map_err(num_err)?,
            width: w.parse().map_err(num_err)?,
            height: h.parse().map_err(num_err)?,
        })
    }
}

/// A resolved on-screen point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

/// Handle for the reply input box, resolved by the surface at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// Identifier of a calibrated template image.
    Template(String),
    /// Fixed screen coordinate.
    Coordinate { x: i32, y: i32 },
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(id) => write!(f, "template:{id}"),
            Self::Coordinate { x, y } => write!(f, "{x},{y}"),
        }
    }
}

impl FromStr for DeliveryTarget {
    type Err = String;

    /// Parses `"template:<id>"` or `"x,y"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("template:") {
            let id = id.trim();
            if id.is_empty() {
                return Err("template id must not be empty".to_string());
            }
            return Ok(Self::Template(id.to_string()));
        }
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'template:<id>' or 'x,y', got '{s}'"))?;
        let num_err = |e: std::num::ParseIntError| format!("invalid coordinate '{s}': {e}");
        Ok(Self::Coordinate {
            x: x.trim().parse().map_err(num_err)?,
            y: y.trim().parse().map_err(num_err)?,
        })
    }
}

/// Reads the monitored conversation and resolves targets on screen.
#[async_trait]
pub trait SurfaceReader: Send + Sync {
    /// Capture the text currently visible in `bounds`.
    async fn capture_region(&self, bounds: RegionBounds) -> Result<String, SurfaceError>;

    /// Resolve a delivery target; `Ok(None)` means it is not on screen.
    async fn locate_template(
        &self,
        target: &DeliveryTarget,
    ) -> Result<Option<Location>, SurfaceError>;
}

/// Types into the messaging surface.
#[async_trait]
pub trait InputInjector: Send + Sync {
    async fn focus(&self, location: Location) -> Result<(), SurfaceError>;

    async fn type_text(&self, text: &str) -> Result<(), SurfaceError>;

    async fn submit(&self) -> Result<(), SurfaceError>;
}

//! The fixed set of experiments the supervisor can run.
//!
//! The catalog is resolved once at startup. Experiment numbers typed at the
//! console are checked against it before any request is made, so the
//! supervisor only ever sees ids that exist.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Identifier of a lab experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ExperimentId {
    /// Experiment 1: random LED colour lottery.
    LedLottery,
    /// Experiment 2: OLED calculator with LED strip.
    OledCalculator,
    /// Experiment 3: Toffoli gate as a quantum AND.
    ToffoliGate,
}

impl ExperimentId {
    pub const ALL: [ExperimentId; 3] = [
        ExperimentId::LedLottery,
        ExperimentId::OledCalculator,
        ExperimentId::ToffoliGate,
    ];

    /// The number operators use for this experiment.
    pub fn number(self) -> u8 {
        match self {
            ExperimentId::LedLottery => 1,
            ExperimentId::OledCalculator => 2,
            ExperimentId::ToffoliGate => 3,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.number() == number)
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Hardware an experiment drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Resource {
    LedStrip,
    /// The OLED display on the I2C bus.
    I2c,
    Buttons,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::LedStrip => "led strip",
            Resource::I2c => "i2c display",
            Resource::Buttons => "buttons",
        };
        f.write_str(name)
    }
}

/// One runnable experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: ExperimentId,
    pub name: String,
    pub description: String,
    /// Script or binary to launch.
    pub program: PathBuf,
    pub hardware: BTreeSet<Resource>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog must contain at least one experiment")]
    Empty,

    #[error("experiment {0} appears more than once")]
    Duplicate(ExperimentId),
}

/// Ordered set of experiments. Cycling follows this order and wraps.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = BTreeSet::new();
        for entry in &entries {
            if !seen.insert(entry.id) {
                return Err(CatalogError::Duplicate(entry.id));
            }
        }
        Ok(Self { entries })
    }

    /// The three lab experiments, with scripts at `<root>/exN.py`.
    pub fn standard(root: &Path) -> Self {
        use Resource::*;

        let entry = |id: ExperimentId, name: &str, description: &str, hw: &[Resource]| {
            CatalogEntry {
                id,
                name: name.to_string(),
                description: description.to_string(),
                program: root.join(format!("ex{}.py", id.number())),
                hardware: hw.iter().copied().collect(),
            }
        };

        Self {
            entries: vec![
                entry(
                    ExperimentId::LedLottery,
                    "LED Color Lottery System",
                    "Quantum random lottery with LED visualization",
                    &[LedStrip, I2c, Buttons],
                ),
                entry(
                    ExperimentId::OledCalculator,
                    "OLED Calculator with LED Strip",
                    "Calculator with OLED display and LED animations",
                    &[LedStrip, I2c, Buttons],
                ),
                entry(
                    ExperimentId::ToffoliGate,
                    "Quantum Toffoli Gate",
                    "Quantum AND gate demonstration",
                    &[LedStrip, Buttons],
                ),
            ],
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: ExperimentId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ExperimentId) -> bool {
        self.get(id).is_some()
    }

    pub fn first(&self) -> ExperimentId {
        self.entries[0].id
    }

    /// The experiment after `id`, wrapping to the first. An id that is not
    /// in the catalog maps to the first entry.
    pub fn next(&self, id: ExperimentId) -> ExperimentId {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => self.entries[(pos + 1) % self.entries.len()].id,
            None => self.first(),
        }
    }

    /// Parse an operator-typed experiment number, accepting only ids in
    /// this catalog.
    pub fn parse_id(&self, input: &str) -> Option<ExperimentId> {
        input
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(ExperimentId::from_number)
            .filter(|id| self.contains(*id))
    }
}

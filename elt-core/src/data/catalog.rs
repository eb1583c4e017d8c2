//! Commodity catalog: sector-organized futures tickers.
//!
//! The catalog can be loaded from TOML (`[sectors]` table of ticker lists) or
//! taken from the built-in default. Selection resolves sector names and
//! explicit tickers into one ordered, deduplicated symbol list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("read catalog file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown sector '{name}' (known: {known})")]
    UnknownSector { name: String, known: String },
}

/// Commodity symbols grouped by sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    /// Load a catalog from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(content)?)
    }

    /// Every symbol across all sectors, in sector order.
    pub fn all_symbols(&self) -> Vec<&str> {
        self.sectors
            .values()
            .flat_map(|symbols| symbols.iter().map(|s| s.as_str()))
            .collect()
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    /// Resolve a selection into symbols.
    ///
    /// Sectors are matched case-insensitively. With no sectors and no explicit
    /// symbols the whole catalog is selected. Order follows the request, and a
    /// symbol named twice is kept once.
    pub fn select(&self, sectors: &[String], symbols: &[String]) -> Result<Vec<String>, CatalogError> {
        let mut selected: Vec<String> = Vec::new();
        let mut push = |s: &str| {
            let s = s.trim().to_uppercase();
            if !s.is_empty() && !selected.contains(&s) {
                selected.push(s);
            }
        };

        if sectors.is_empty() && symbols.is_empty() {
            self.all_symbols().into_iter().for_each(&mut push);
        }

        for name in sectors {
            let members = self
                .sectors
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
                .ok_or_else(|| CatalogError::UnknownSector {
                    name: name.clone(),
                    known: self.sector_names().join(", "),
                })?;
            members.iter().for_each(|s| push(s.as_str()));
        }

        symbols.iter().for_each(|s| push(s.as_str()));
        Ok(selected)
    }

    /// Front-month futures on Yahoo Finance.
    pub fn default_commodities() -> Self {
        let mut sectors = BTreeMap::new();

        sectors.insert(
            "energy".into(),
            ["CL=F", "BZ=F", "NG=F", "HO=F", "RB=F"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "metals".into(),
            ["GC=F", "SI=F", "HG=F", "PL=F", "PA=F"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        sectors.insert(
            "agriculture".into(),
            ["ZC=F", "ZW=F", "ZS=F", "KC=F", "SB=F", "CC=F", "CT=F"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        Self { sectors }
    }

    /// Serialize to the same format `from_toml` reads (`elt symbols --toml`).
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::default_commodities()
    }
}

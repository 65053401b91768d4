//! Pattern catalog: the set of known screens.
//!
//! The catalog is split into two partitions. Standard patterns describe
//! normal menus and progress screens and are looked up by id; error patterns
//! are scanned in order to name whatever fault the appliance is showing.
//!
//! Catalogs are persisted as a JSON array of [`PatternRecord`]s. Loading
//! fails unless every id in [`REQUIRED_PATTERNS`] is present, so navigation
//! code can rely on those ids resolving.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::pattern::PatternRecord;
use crate::screen::Screen;

/// Pattern ids referenced by navigation and diagnosis.
pub mod names {
    pub const ACKNOWLEDGED: &str = "Acknowledged";
    pub const ATTACH_HOT_WATER_SPOUT: &str = "Attach_hot_water_spout";
    pub const COFFEE_TEMP_MAX: &str = "Coffee_temp_max";
    pub const COFFEE_TEMP_MED: &str = "Coffee_temp_med";
    pub const COFFEE_TEMP_MIN: &str = "Coffee_temp_min";
    pub const COFFEE_TEMP_SELECTION: &str = "Coffee_temp_selection";
    pub const DEFAULT_SCREEN: &str = "Default_screen";
    pub const DEFAULT_SCREEN_NO_COFFEE: &str = "Default_screen_no_coffee";
    pub const DRINK_AMERICANO: &str = "Drink_americano";
    pub const DRINK_HOT_WATER: &str = "Drink_hot_water";
    pub const DRINK_MILK_FROTH: &str = "Drink_milk_froth";
    pub const ICON_ACKNOWLEDGE: &str = "Icon_acknowledge";
    pub const ICON_BACK: &str = "Icon_back";
    pub const ICON_DOWN: &str = "Icon_down";
    pub const ICON_UP: &str = "Icon_up";
    pub const INITIALIZATION_CALIBRATING: &str = "Initialization_calibrating";
    pub const INITIALIZATION_HEATING: &str = "Initialization_heating";
    pub const INITIALIZATION_RINSING: &str = "Initialization_rinsing";
    pub const INTENSITY_1: &str = "Intensity_1";
    pub const INTENSITY_2: &str = "Intensity_2";
    pub const INTENSITY_3: &str = "Intensity_3";
    pub const INTENSITY_4: &str = "Intensity_4";
    pub const INTENSITY_5: &str = "Intensity_5";
    pub const INTENSITY_GROUND_COFFEE: &str = "Intensity_ground_coffee";
    pub const MAKING_AMERICANO: &str = "Making_americano";
    pub const MAKING_CAPPUCCINO: &str = "Making_cappuccino";
    pub const MAKING_COFFEE: &str = "Making_coffee";
    pub const MAKING_COFFEE_DOUBLE: &str = "Making_coffee_double";
    pub const MAKING_ESPRESSO: &str = "Making_espresso";
    pub const MAKING_ESPRESSO_DOUBLE: &str = "Making_espresso_double";
    pub const MAKING_HOT_WATER: &str = "Making_hot_water";
    pub const MAKING_LATTE: &str = "Making_latte";
    pub const MENU_1_DRINKS: &str = "Menu_1_drinks";
    pub const MENU_1_MENU: &str = "Menu_1_menu";
    pub const MENU_2_COFFEE_TEMP: &str = "Menu_2_coffee_temp";
    pub const MENU_2_QUICK_CLEAN: &str = "Menu_2_quick_clean";
    pub const MILK_CARAFE_ATTACH: &str = "Milk_carafe_attach";
    pub const MILK_CARAFE_CLEAN_REQUEST: &str = "Milk_carafe_clean_request";
    pub const MILK_CARAFE_SPOUT_CLOSED: &str = "Milk_carafe_dispensing_spout_closed";
    pub const MILK_CARAFE_SPOUT_OPENED: &str = "Milk_carafe_dispensing_spout_opened";
    pub const MILK_CARAFE_HOT_STEAM: &str = "Milk_carafe_hot_steam";
    pub const MILK_CARAFE_PUT_CUP_UNDER: &str = "Milk_carafe_put_cup_under";
    pub const PROGRESS_BAR: &str = "Progress_bar";
    pub const START_CALC_CLEAN_MESSAGE: &str = "Start_calc_clean_message";
    pub const ERROR_NO_WATER: &str = "Error_no_water";
    pub const ERROR_GROUND_CONTAINER_FULL: &str = "Error_coffee_ground_container_full";
    pub const ERROR_GROUND_CONTAINER_SPILL: &str = "Error_coffee_ground_container_spill";
    pub const ERROR_SERVICE_DOOR_OPENED: &str = "Error_service_door_opened";
    pub const ERROR_INSERT_WATER_DISPENSER: &str = "Error_insert_water_dispenser";
    pub const ERROR_NO_COFFEE: &str = "Error_no_coffee";
    pub const ERROR_BREW_GROUP_FAILURE: &str = "Error_brew_group_failure";
}

use names::*;

/// Every id a loaded catalog must contain.
pub const REQUIRED_PATTERNS: [&str; 51] = [
    ACKNOWLEDGED,
    ATTACH_HOT_WATER_SPOUT,
    COFFEE_TEMP_MAX,
    COFFEE_TEMP_MED,
    COFFEE_TEMP_MIN,
    COFFEE_TEMP_SELECTION,
    DEFAULT_SCREEN,
    DEFAULT_SCREEN_NO_COFFEE,
    DRINK_AMERICANO,
    DRINK_HOT_WATER,
    DRINK_MILK_FROTH,
    ICON_ACKNOWLEDGE,
    ICON_BACK,
    ICON_DOWN,
    ICON_UP,
    INITIALIZATION_CALIBRATING,
    INITIALIZATION_HEATING,
    INITIALIZATION_RINSING,
    INTENSITY_1,
    INTENSITY_2,
    INTENSITY_3,
    INTENSITY_4,
    INTENSITY_5,
    INTENSITY_GROUND_COFFEE,
    MAKING_AMERICANO,
    MAKING_CAPPUCCINO,
    MAKING_COFFEE,
    MAKING_COFFEE_DOUBLE,
    MAKING_ESPRESSO,
    MAKING_ESPRESSO_DOUBLE,
    MAKING_HOT_WATER,
    MAKING_LATTE,
    MENU_1_DRINKS,
    MENU_1_MENU,
    MENU_2_COFFEE_TEMP,
    MENU_2_QUICK_CLEAN,
    MILK_CARAFE_ATTACH,
    MILK_CARAFE_CLEAN_REQUEST,
    MILK_CARAFE_SPOUT_CLOSED,
    MILK_CARAFE_SPOUT_OPENED,
    MILK_CARAFE_HOT_STEAM,
    MILK_CARAFE_PUT_CUP_UNDER,
    PROGRESS_BAR,
    START_CALC_CLEAN_MESSAGE,
    ERROR_NO_WATER,
    ERROR_GROUND_CONTAINER_FULL,
    ERROR_GROUND_CONTAINER_SPILL,
    ERROR_SERVICE_DOOR_OPENED,
    ERROR_INSERT_WATER_DISPENSER,
    ERROR_NO_COFFEE,
    ERROR_BREW_GROUP_FAILURE,
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read pattern database {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write pattern database {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed pattern database: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern '{0}' is defined more than once")]
    DuplicateId(String),
    #[error("pattern database is missing: {}", .0.join(", "))]
    MissingPatterns(Vec<String>),
}

/// Loaded pattern database.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    standard: BTreeMap<String, PatternRecord>,
    errors: Vec<PatternRecord>,
}

impl PatternCatalog {
    /// Build a catalog, checking id uniqueness and required ids.
    pub fn from_records(records: Vec<PatternRecord>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for record in records {
            if catalog.get(record.id()).is_some() {
                return Err(CatalogError::DuplicateId(record.id().to_string()));
            }
            catalog.insert(record);
        }

        let missing: Vec<String> = REQUIRED_PATTERNS
            .iter()
            .filter(|id| catalog.get(id).is_none())
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CatalogError::MissingPatterns(missing));
        }
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<PatternRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Serialize standard patterns sorted by id, then error patterns in
    /// catalog order.
    pub fn to_json(&self) -> Result<String, CatalogError> {
        let records: Vec<&PatternRecord> = self.standard.values().chain(self.errors.iter()).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Look a pattern up in either partition.
    pub fn get(&self, id: &str) -> Option<&PatternRecord> {
        self.standard
            .get(id)
            .or_else(|| self.errors.iter().find(|record| record.id() == id))
    }

    /// First error pattern that fits `screen`.
    pub fn first_error_fit(&self, screen: &Screen) -> Option<&PatternRecord> {
        self.errors.iter().find(|record| record.fits(screen))
    }

    pub fn error_patterns(&self) -> &[PatternRecord] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.standard.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a previously unseen screen as an exact pattern.
    ///
    /// Returns the generated id, or `None` when the partition already holds
    /// a byte-identical screen.
    pub fn archive(&mut self, screen: &Screen, is_error: bool) -> Option<String> {
        let duplicate = if is_error {
            self.errors.iter().any(|record| record.screen() == screen)
        } else {
            self.standard.values().any(|record| record.screen() == screen)
        };
        if duplicate {
            return None;
        }

        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.insert(PatternRecord::exact(id.clone(), is_error, screen.clone()));
        Some(id)
    }

    fn insert(&mut self, record: PatternRecord) {
        if record.is_error() {
            self.errors.push(record);
        } else {
            self.standard.insert(record.id().to_string(), record);
        }
    }
}

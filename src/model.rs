//! Core pipeline types: document status, parsed menus, and pricing signals.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use uuid::Uuid;

use crate::prelude::*;

/// Schema version written into every persisted parsed document.
pub const PARSED_DOCUMENT_VERSION: &str = "1.0";

/// Pipeline status of a menu document.
///
/// This is the single source of truth for which stage of the pipeline owns a
/// row. The string forms below are what we persist and what polling UIs see,
/// so they must never change meaning.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuStatus {
    /// Uploaded, waiting for the OCR worker.
    MenuUploaded,
    /// Claimed by an OCR worker.
    OcrProcessing,
    /// Text extracted, waiting for the parsing worker.
    OcrDone,
    /// OCR failed. Terminal until an explicit retry.
    OcrFailed,
    /// Claimed by a parsing worker.
    ParsingLlm,
    /// Parsed document persisted. Terminal until admin approval.
    Parsed,
    /// Parsing failed. Terminal until an explicit retry.
    ParsingFailed,
}

impl MenuStatus {
    /// The canonical string form, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            MenuStatus::MenuUploaded => "MENU_UPLOADED",
            MenuStatus::OcrProcessing => "OCR_PROCESSING",
            MenuStatus::OcrDone => "OCR_DONE",
            MenuStatus::OcrFailed => "OCR_FAILED",
            MenuStatus::ParsingLlm => "PARSING_LLM",
            MenuStatus::Parsed => "PARSED",
            MenuStatus::ParsingFailed => "PARSING_FAILED",
        }
    }

    /// Is this one of the two failure states a retry can reset?
    pub fn is_failure(self) -> bool {
        matches!(self, MenuStatus::OcrFailed | MenuStatus::ParsingFailed)
    }
}

impl fmt::Display for MenuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MenuStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MENU_UPLOADED" => Ok(MenuStatus::MenuUploaded),
            "OCR_PROCESSING" => Ok(MenuStatus::OcrProcessing),
            "OCR_DONE" => Ok(MenuStatus::OcrDone),
            "OCR_FAILED" => Ok(MenuStatus::OcrFailed),
            "PARSING_LLM" => Ok(MenuStatus::ParsingLlm),
            "PARSED" => Ok(MenuStatus::Parsed),
            "PARSING_FAILED" => Ok(MenuStatus::ParsingFailed),
            other => Err(anyhow!("unknown menu status {:?}", other)),
        }
    }
}

/// The closed set of menu item categories.
///
/// The LLM is instructed to use exactly these strings; anything else fails
/// response validation.
#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, Serialize, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ItemCategory {
    Starter,
    MainCourse,
    Drink,
    Dessert,
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemCategory::Starter => "starter",
            ItemCategory::MainCourse => "main_course",
            ItemCategory::Drink => "drink",
            ItemCategory::Dessert => "dessert",
        };
        f.write_str(s)
    }
}

/// A single normalized menu item.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ParsedItem {
    /// The item name, as printed on the menu.
    pub name: String,

    /// The basket category of this item.
    pub category: ItemCategory,

    /// The item price. Must be positive.
    pub price: f64,
}

/// The fixed response contract we demand from the language model.
///
/// An empty `items` list is a valid response for sparse or low-content
/// documents, not an error.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ParsedMenu {
    /// Items extracted from the menu text.
    pub items: Vec<ParsedItem>,

    /// The tax rate, as a percentage.
    #[serde(default)]
    pub tax_percent: f64,
}

/// One item chosen into the cost-for-two basket.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SelectedItem {
    pub name: String,
    pub price: f64,
}

/// The arithmetic behind a [`CostForTwo`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CostCalculation {
    pub subtotal: f64,
    pub tax: f64,
    pub total_cost_for_two: f64,
}

/// A standardized, comparable pricing signal derived from a parsed menu.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CostForTwo {
    /// Items selected into the basket, keyed by category.
    pub selected_items: BTreeMap<ItemCategory, Vec<SelectedItem>>,

    /// Which basket categories were filled to capacity.
    pub availability: BTreeMap<ItemCategory, bool>,

    /// Subtotal, tax, and total.
    pub calculation: CostCalculation,

    /// Confidence in the signal.
    pub confidence: f64,
}

/// The canonical parsed document persisted for a menu.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ParsedDocument {
    /// Items extracted from the menu.
    pub items: Vec<ParsedItem>,

    /// The tax rate, as a percentage.
    pub tax_percent: f64,

    /// The derived pricing basket.
    pub cost_for_two: CostForTwo,

    /// Schema version of this document.
    pub version: String,
}

/// City and cuisine of the restaurant owning a menu document. This is the
/// key under which competitive snapshots are aggregated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuContext {
    pub city: String,
    pub cuisine_type: String,
}

/// Aggregated competitive pricing for one (city, cuisine) key.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CompetitiveSnapshot {
    pub city: String,
    pub cuisine_type: String,
    pub avg_cost_for_two: f64,
    pub median_cost_for_two: f64,
    pub sample_size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A menu document row, as read back for inspection and tests.
#[derive(Clone, Debug)]
pub struct MenuDocument {
    pub id: Uuid,
    pub restaurant_id: i64,
    pub source_object_key: String,
    pub original_filename: String,
    pub status: MenuStatus,
    pub raw_text: Option<String>,
    pub parsed_document: Option<ParsedDocument>,
    pub failure_reason: Option<String>,
}

//! `serde` schemas for the two documents a host application parses and
//! hands to [`crate::engine::Engine::new`]. Reading the JSON bytes is the
//! caller's job (see the out-of-scope list in the top-level docs); these
//! types only describe the shape once parsed.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub start_year: i32,
    pub start_month: u32,
    pub end_year: i32,
    pub end_month: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPeriod {
    pub id: u32,
    pub start_year: i32,
    pub start_month: u32,
    pub end_year: i32,
    pub end_month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexationPeriod {
    Annual,
    Monthly,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: u32,
    pub name: String,
    pub indexation_start_year: i32,
    pub indexation_start_month: u32,
    pub indexation_rate: f64,
    pub indexation_period: IndexationPeriod,
}

/// An `inputGlassGroups[]` entry: the container for one or more
/// [`InputItem`]s sharing a mode and an optional key-period linkage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputGroup {
    pub id: u32,
    pub group_type: String,
    #[serde(default)]
    pub entry_mode: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub linked_key_period_id: Option<u32>,
}

/// An `inputGlass[]` entry: one member of an [`InputGroup`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputItem {
    pub id: u32,
    pub group_id: u32,
    #[serde(default)]
    pub entry_mode: Option<String>,
    #[serde(default)]
    pub value_frequency: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub values: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub spread_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputsDocument {
    pub config: Config,
    #[serde(default)]
    pub key_periods: Vec<KeyPeriod>,
    #[serde(default)]
    pub indices: Vec<IndexEntry>,
    #[serde(default)]
    pub input_glass_groups: Vec<InputGroup>,
    #[serde(default)]
    pub input_glass: Vec<InputItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Calculation {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub formula: String,
}

/// A module's declared inputs, kept as a loosely-typed JSON object: each
/// solver knows which keys it expects and resolves them itself (see
/// `resolve_scalar`/`resolve_array` in `crate::modules`). This mirrors the
/// "scalar, reference name, or literal schedule" input contract from the
/// component design, which doesn't admit one fixed Rust struct shared by
/// every solver template.
pub type ModuleInputs = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub template_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub converted: bool,
    #[serde(default)]
    pub inputs: ModuleInputs,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinancingEntry {
    pub month_index: i64,
    #[serde(default)]
    pub margin_pct: f64,
    #[serde(default)]
    pub fee_pct: f64,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalculationsDocument {
    #[serde(default)]
    pub calculations: Vec<Calculation>,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default, rename = "_mRefMap")]
    pub m_ref_map: HashMap<String, String>,
}

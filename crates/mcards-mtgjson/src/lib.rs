//! MTGJSON adapter: raw snapshot access, per-version vocabularies, and record extraction.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use mcards_core::{CardRecord, ForeignNameRecord, Rarity, SetSelection, SetSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "mcards-mtgjson";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("set {set_code}: {reason}")]
    InvalidSet { set_code: String, reason: String },
    #[error("set {set_code}, card {card}: missing required field `{field}`")]
    MissingField {
        set_code: String,
        card: String,
        field: String,
    },
    #[error("set {set_code}, card {card}: field `{field}` has unexpected shape ({found})")]
    InvalidField {
        set_code: String,
        card: String,
        field: String,
        found: String,
    },
}

/// The decoded upstream document: set code -> set object, in upstream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    sets: Map<String, JsonValue>,
}

impl RawSnapshot {
    pub fn new(sets: Map<String, JsonValue>) -> Self {
        Self { sets }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(text).context("parsing snapshot json")?;
        match value {
            JsonValue::Object(sets) => Ok(Self::new(sets)),
            other => anyhow::bail!("snapshot top level is {}, expected an object", json_kind(&other)),
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn set_codes(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    /// Raw set objects matching `selection`, in upstream order. Unknown codes match nothing.
    pub fn selected<'a>(
        &'a self,
        selection: &'a SetSelection,
    ) -> impl Iterator<Item = (&'a str, &'a JsonValue)> + 'a {
        self.sets
            .iter()
            .filter(move |(code, _)| selection.includes(code))
            .map(|(code, value)| (code.as_str(), value))
    }
}

/// Upstream data known to carry duplicated printings for a handful of cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatePrintingDefect {
    pub set_code: String,
    pub card_names: Vec<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Field mapping and enumeration vocabulary for one upstream schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub name: String,
    pub rarities: BTreeMap<String, Rarity>,
    #[serde(default = "default_multiverse_id_fields")]
    pub multiverse_id_fields: Vec<String>,
    #[serde(default = "default_flavor_fields")]
    pub flavor_fields: Vec<String>,
    #[serde(default = "default_foreign_names_fields")]
    pub foreign_names_fields: Vec<String>,
    #[serde(default = "default_token_layouts")]
    pub token_layouts: Vec<String>,
    #[serde(default)]
    pub duplicate_printing_defects: Vec<DuplicatePrintingDefect>,
}

fn default_multiverse_id_fields() -> Vec<String> {
    vec!["multiverseid".to_string(), "multiverseId".to_string()]
}

fn default_flavor_fields() -> Vec<String> {
    vec!["flavor".to_string(), "flavorText".to_string()]
}

fn default_foreign_names_fields() -> Vec<String> {
    vec!["foreignNames".to_string()]
}

fn default_token_layouts() -> Vec<String> {
    vec!["token".to_string()]
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::mtgjson_v3()
    }
}

impl Vocabulary {
    /// `AllSets-x.json` vocabulary: title-case rarities and `multiverseid`.
    pub fn mtgjson_v3() -> Self {
        let rarities = [
            ("Mythic Rare", Rarity::Mythic),
            ("Rare", Rarity::Rare),
            ("Uncommon", Rarity::Uncommon),
            ("Common", Rarity::Common),
            ("Special", Rarity::Special),
            ("Basic Land", Rarity::BasicLand),
        ]
        .into_iter()
        .map(|(label, rarity)| (label.to_string(), rarity))
        .collect();

        Self {
            name: "mtgjson-v3".to_string(),
            rarities,
            multiverse_id_fields: default_multiverse_id_fields(),
            flavor_fields: default_flavor_fields(),
            foreign_names_fields: default_foreign_names_fields(),
            token_layouts: default_token_layouts(),
            duplicate_printing_defects: vec![DuplicatePrintingDefect {
                set_code: "BOK".to_string(),
                card_names: vec!["Jaraku the Interloper".to_string(), "Scarmaker".to_string()],
                reference: Some("https://github.com/mtgjson/mtgjson/issues/388".to_string()),
            }],
        }
    }

    /// Later schema: lowercase rarities, camel-case ids, no basic-land rarity.
    pub fn mtgjson_v4() -> Self {
        let rarities = [
            ("mythic", Rarity::Mythic),
            ("rare", Rarity::Rare),
            ("uncommon", Rarity::Uncommon),
            ("common", Rarity::Common),
            ("special", Rarity::Special),
            ("bonus", Rarity::Special),
        ]
        .into_iter()
        .map(|(label, rarity)| (label.to_string(), rarity))
        .collect();

        Self {
            name: "mtgjson-v4".to_string(),
            rarities,
            multiverse_id_fields: vec!["multiverseId".to_string()],
            flavor_fields: vec!["flavorText".to_string()],
            foreign_names_fields: vec!["foreignData".to_string()],
            token_layouts: vec!["token".to_string(), "double_faced_token".to_string()],
            duplicate_printing_defects: Vec::new(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing vocabulary yaml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading vocabulary {}", path.display()))
    }

    /// Exact label match; casing and spelling are significant.
    pub fn lookup_rarity(&self, raw: &str) -> Option<Rarity> {
        self.rarities.get(raw).copied()
    }

    /// Unrecognized labels land in the Special bucket.
    pub fn parse_rarity(&self, raw: &str) -> Rarity {
        self.lookup_rarity(raw).unwrap_or_else(|| {
            debug!(label = raw, vocabulary = %self.name, "unmapped rarity label, using Special");
            Rarity::Special
        })
    }

    pub fn is_token_layout(&self, layout: &str) -> bool {
        self.token_layouts.iter().any(|t| t == layout)
    }

    /// Defects whose set the selection touches.
    pub fn defects_for<'a>(
        &'a self,
        selection: &'a SetSelection,
    ) -> impl Iterator<Item = &'a DuplicatePrintingDefect> + 'a {
        self.duplicate_printing_defects
            .iter()
            .filter(move |d| selection.includes(&d.set_code))
    }

    /// Extract one raw set object into typed records.
    ///
    /// Token records are only checked for `name` and `layout`; they are skipped later and
    /// upstream does not guarantee the remaining fields on them.
    pub fn extract_set(&self, code: &str, raw: &JsonValue) -> Result<SetSnapshot, SchemaError> {
        let obj = raw.as_object().ok_or_else(|| SchemaError::InvalidSet {
            set_code: code.to_string(),
            reason: format!("expected an object, found {}", json_kind(raw)),
        })?;
        let name = obj
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SchemaError::InvalidSet {
                set_code: code.to_string(),
                reason: "missing set name".to_string(),
            })?
            .to_string();
        let cards = obj
            .get("cards")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| SchemaError::InvalidSet {
                set_code: code.to_string(),
                reason: "missing cards array".to_string(),
            })?;

        let mut records = Vec::with_capacity(cards.len());
        for (index, card) in cards.iter().enumerate() {
            records.push(self.extract_card(code, index, card)?);
        }

        Ok(SetSnapshot {
            code: code.to_string(),
            name,
            cards: records,
        })
    }

    fn extract_card(
        &self,
        set_code: &str,
        index: usize,
        raw: &JsonValue,
    ) -> Result<CardRecord, SchemaError> {
        let label = format!("#{index}");
        let obj = raw.as_object().ok_or_else(|| SchemaError::InvalidField {
            set_code: set_code.to_string(),
            card: label.clone(),
            field: "cards".to_string(),
            found: json_kind(raw).to_string(),
        })?;
        let fields = RecordFields {
            set_code,
            card: label,
            obj,
        };

        let name = fields.required_string("name")?;
        let fields = RecordFields {
            card: name.clone(),
            ..fields
        };
        let layout = fields.required_string("layout")?;

        if self.is_token_layout(&layout) {
            return Ok(CardRecord {
                name,
                layout,
                ..CardRecord::default()
            });
        }

        let foreign = self
            .foreign_names_fields
            .iter()
            .find_map(|alias| fields.present(alias).map(|value| (alias.as_str(), value)));
        let foreign_names = match foreign {
            None => Vec::new(),
            Some((alias, JsonValue::Array(entries))) => entries
                .iter()
                .map(|entry| self.extract_foreign_name(&fields, alias, entry))
                .collect::<Result<Vec<_>, _>>()?,
            Some((alias, other)) => return Err(fields.invalid(alias, other)),
        };

        Ok(CardRecord {
            mana_cost: fields.optional_string("manaCost")?,
            text: fields.optional_string("text")?,
            power: fields.optional_string("power")?,
            toughness: fields.optional_string("toughness")?,
            loyalty: fields.optional_loyalty("loyalty")?,
            supertypes: fields.optional_string_list("supertypes")?,
            types: fields.required_string_list("types")?,
            subtypes: fields.optional_string_list("subtypes")?,
            artist: Some(fields.optional_string("artist")?).filter(|a| !a.is_empty()),
            multiverse_id: fields.first_optional_integer(&self.multiverse_id_fields)?,
            flavor: fields.first_optional_string(&self.flavor_fields)?,
            rarity: fields.required_string("rarity")?,
            number: fields.optional_string("number")?,
            foreign_names,
            name,
            layout,
        })
    }

    fn extract_foreign_name(
        &self,
        card: &RecordFields<'_>,
        field: &str,
        raw: &JsonValue,
    ) -> Result<ForeignNameRecord, SchemaError> {
        let obj = raw.as_object().ok_or_else(|| card.invalid(field, raw))?;
        let entry = RecordFields {
            set_code: card.set_code,
            card: card.card.clone(),
            obj,
        };
        Ok(ForeignNameRecord {
            language: entry.required_string("language")?,
            name: entry.required_string("name")?,
            multiverse_id: entry.first_optional_integer(&self.multiverse_id_fields)?,
        })
    }
}

struct RecordFields<'a> {
    set_code: &'a str,
    card: String,
    obj: &'a Map<String, JsonValue>,
}

impl RecordFields<'_> {
    fn missing(&self, field: &str) -> SchemaError {
        SchemaError::MissingField {
            set_code: self.set_code.to_string(),
            card: self.card.clone(),
            field: field.to_string(),
        }
    }

    fn invalid(&self, field: &str, found: &JsonValue) -> SchemaError {
        SchemaError::InvalidField {
            set_code: self.set_code.to_string(),
            card: self.card.clone(),
            field: field.to_string(),
            found: json_kind(found).to_string(),
        }
    }

    fn present(&self, field: &str) -> Option<&JsonValue> {
        self.obj.get(field).filter(|v| !v.is_null())
    }

    fn required_string(&self, field: &str) -> Result<String, SchemaError> {
        match self.present(field) {
            None => Err(self.missing(field)),
            Some(JsonValue::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(field, other)),
        }
    }

    /// Missing means empty; numbers are accepted as their decimal text.
    fn optional_string(&self, field: &str) -> Result<String, SchemaError> {
        match self.present(field) {
            None => Ok(String::new()),
            Some(JsonValue::String(s)) => Ok(s.clone()),
            Some(JsonValue::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(self.invalid(field, other)),
        }
    }

    fn first_optional_string(&self, aliases: &[String]) -> Result<String, SchemaError> {
        match aliases.iter().find(|a| self.present(a).is_some()) {
            Some(alias) => self.optional_string(alias),
            None => Ok(String::new()),
        }
    }

    fn first_optional_integer(&self, aliases: &[String]) -> Result<Option<i64>, SchemaError> {
        let Some(alias) = aliases.iter().find(|a| self.present(a).is_some()) else {
            return Ok(None);
        };
        match self.present(alias) {
            Some(JsonValue::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                self.invalid(alias, &JsonValue::Number(n.clone()))
            }),
            Some(JsonValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.invalid(alias, &JsonValue::String(s.clone()))),
            Some(other) => Err(self.invalid(alias, other)),
            None => Ok(None),
        }
    }

    /// Variable loyalty such as "X" has no integer value and is stored as absent.
    fn optional_loyalty(&self, field: &str) -> Result<Option<i64>, SchemaError> {
        match self.present(field) {
            None => Ok(None),
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, &JsonValue::Number(n.clone()))),
            Some(JsonValue::String(s)) => Ok(s.trim().parse::<i64>().ok()),
            Some(other) => Err(self.invalid(field, other)),
        }
    }

    fn optional_string_list(&self, field: &str) -> Result<Vec<String>, SchemaError> {
        match self.present(field) {
            None => Ok(Vec::new()),
            Some(_) => self.required_string_list(field),
        }
    }

    fn required_string_list(&self, field: &str) -> Result<Vec<String>, SchemaError> {
        match self.present(field) {
            None => Err(self.missing(field)),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| match item {
                    JsonValue::String(s) => Ok(s.clone()),
                    other => Err(self.invalid(field, other)),
                })
                .collect(),
            Some(other) => Err(self.invalid(field, other)),
        }
    }
}

/// Upstream language display name -> stored language code.
pub fn convert_language_name_to_code(name: &str) -> Option<&'static str> {
    let code = match name {
        "English" => "en",
        "Simplified Chinese" | "Chinese Simplified" => "zh-hans",
        "Traditional Chinese" | "Chinese Traditional" => "zh-hant",
        "French" => "fr",
        "German" => "de",
        "Italian" => "it",
        "Japanese" => "ja",
        "Korean" => "ko",
        "Portuguese" | "Portuguese (Brazil)" => "pt",
        "Russian" => "ru",
        "Spanish" => "es",
        _ => return None,
    };
    Some(code)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

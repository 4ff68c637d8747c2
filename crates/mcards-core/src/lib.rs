//! Core domain model for the card catalog mirror.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "mcards-core";

/// Canonical printing rarity. The integer codes are what the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Mythic,
    Rare,
    Uncommon,
    Common,
    Special,
    BasicLand,
}

impl Rarity {
    pub const ALL: [Rarity; 6] = [
        Rarity::Mythic,
        Rarity::Rare,
        Rarity::Uncommon,
        Rarity::Common,
        Rarity::Special,
        Rarity::BasicLand,
    ];

    pub fn code(self) -> i64 {
        match self {
            Rarity::Mythic => 10,
            Rarity::Rare => 20,
            Rarity::Uncommon => 30,
            Rarity::Common => 40,
            Rarity::Special => 50,
            Rarity::BasicLand => 60,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            Rarity::Mythic => "Mythic",
            Rarity::Rare => "Rare",
            Rarity::Uncommon => "Uncommon",
            Rarity::Common => "Common",
            Rarity::Special => "Special",
            Rarity::BasicLand => "Basic Land",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which upstream sets an import touches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SetSelection {
    #[default]
    Everything,
    Codes(Vec<String>),
}

impl SetSelection {
    /// An empty code list means "everything", matching the command-line convention.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: Vec<String> = codes.into_iter().map(Into::into).collect();
        if codes.is_empty() {
            SetSelection::Everything
        } else {
            SetSelection::Codes(codes)
        }
    }

    /// Set codes are case-sensitive identity keys.
    pub fn includes(&self, code: &str) -> bool {
        match self {
            SetSelection::Everything => true,
            SetSelection::Codes(codes) => codes.iter().any(|c| c == code),
        }
    }

    pub fn codes(&self) -> Option<&[String]> {
        match self {
            SetSelection::Everything => None,
            SetSelection::Codes(codes) => Some(codes),
        }
    }
}

/// One upstream set, already extracted from the raw snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSnapshot {
    pub code: String,
    pub name: String,
    pub cards: Vec<CardRecord>,
}

/// Upstream card record with optional fields already defaulted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardRecord {
    pub name: String,
    pub layout: String,
    pub mana_cost: String,
    pub text: String,
    pub power: String,
    pub toughness: String,
    pub loyalty: Option<i64>,
    pub supertypes: Vec<String>,
    pub types: Vec<String>,
    pub subtypes: Vec<String>,
    pub artist: Option<String>,
    pub multiverse_id: Option<i64>,
    pub flavor: String,
    pub rarity: String,
    pub number: String,
    pub foreign_names: Vec<ForeignNameRecord>,
}

impl CardRecord {
    /// Gatherer card image, when the record carries an image id.
    pub fn image_url(&self) -> Option<String> {
        self.multiverse_id.filter(|&id| id > 0).map(image_url)
    }
}

pub fn image_url(multiverse_id: i64) -> String {
    format!("http://gatherer.wizards.com/Handlers/Image.ashx?multiverseid={multiverse_id}&type=card")
}

/// A localized name block entry. `language` is the upstream display name, not a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignNameRecord {
    pub language: String,
    pub name: String,
    pub multiverse_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarity_codes_round_trip_and_are_distinct() {
        for rarity in Rarity::ALL {
            assert_eq!(Rarity::from_code(rarity.code()), Some(rarity));
        }
        assert_eq!(Rarity::from_code(0), None);
        assert_eq!(Rarity::BasicLand.to_string(), "Basic Land");
    }

    #[test]
    fn empty_code_list_selects_everything() {
        assert_eq!(SetSelection::from_codes(Vec::<String>::new()), SetSelection::Everything);
        let selection = SetSelection::from_codes(["SOM", "AKH"]);
        assert!(selection.includes("SOM"));
        assert!(!selection.includes("som"));
        assert!(!selection.includes("BOK"));
        assert!(SetSelection::Everything.includes("BOK"));
    }

    #[test]
    fn image_url_needs_an_image_id() {
        let mut card = CardRecord {
            name: "Abuna Acolyte".into(),
            ..CardRecord::default()
        };
        assert_eq!(card.image_url(), None);
        card.multiverse_id = Some(0);
        assert_eq!(card.image_url(), None);
        card.multiverse_id = Some(212249);
        assert_eq!(
            card.image_url().as_deref(),
            Some("http://gatherer.wizards.com/Handlers/Image.ashx?multiverseid=212249&type=card")
        );
    }

    #[test]
    fn rarity_serializes_as_snake_case() {
        let json = serde_json::to_string(&Rarity::BasicLand).expect("serialize");
        assert_eq!(json, "\"basic_land\"");
    }
}

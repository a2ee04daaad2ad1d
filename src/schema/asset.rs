//! Asset registry: category-keyed references to auxiliary resources.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four fixed asset buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Backgrounds,
    /// Character art.
    Characters,
    /// Sound effects.
    Sounds,
    Music,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 4] = [
        Self::Backgrounds,
        Self::Characters,
        Self::Sounds,
        Self::Music,
    ];

    /// Returns the document key for this category (e.g., "sounds").
    pub fn key(&self) -> &'static str {
        match self {
            Self::Backgrounds => "backgrounds",
            Self::Characters => "characters",
            Self::Sounds => "sounds",
            Self::Music => "music",
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for AssetCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backgrounds" => Ok(Self::Backgrounds),
            "characters" | "art" => Ok(Self::Characters),
            "sounds" | "sound_effects" => Ok(Self::Sounds),
            "music" => Ok(Self::Music),
            other => Err(other.to_string()),
        }
    }
}

/// Descriptive metadata for one asset file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetMetadata {
    pub path: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub date_added: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Unrecognised keys, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AssetMetadata {
    pub fn new(
        path: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        date_added: NaiveDateTime,
    ) -> Self {
        Self {
            path: path.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            size,
            date_added,
            ..Self::default()
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

pub type AssetBucket = IndexMap<String, AssetMetadata>;

/// Registry of asset references, one bucket per category.
///
/// Buckets are keyed by asset id (typically the file name). The registry
/// does not check that event payloads referring to an asset id resolve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetRegistry {
    pub backgrounds: AssetBucket,
    pub characters: AssetBucket,
    pub sounds: AssetBucket,
    pub music: AssetBucket,
}

impl AssetRegistry {
    pub fn bucket(&self, category: AssetCategory) -> &AssetBucket {
        match category {
            AssetCategory::Backgrounds => &self.backgrounds,
            AssetCategory::Characters => &self.characters,
            AssetCategory::Sounds => &self.sounds,
            AssetCategory::Music => &self.music,
        }
    }

    fn bucket_mut(&mut self, category: AssetCategory) -> &mut AssetBucket {
        match category {
            AssetCategory::Backgrounds => &mut self.backgrounds,
            AssetCategory::Characters => &mut self.characters,
            AssetCategory::Sounds => &mut self.sounds,
            AssetCategory::Music => &mut self.music,
        }
    }

    /// Insert or overwrite an asset. Returns the previous entry, if any.
    pub fn insert(
        &mut self,
        category: AssetCategory,
        id: impl Into<String>,
        metadata: AssetMetadata,
    ) -> Option<AssetMetadata> {
        self.bucket_mut(category).insert(id.into(), metadata)
    }

    pub fn remove(&mut self, category: AssetCategory, id: &str) -> Option<AssetMetadata> {
        self.bucket_mut(category).shift_remove(id)
    }

    pub fn get(&self, category: AssetCategory, id: &str) -> Option<&AssetMetadata> {
        self.bucket(category).get(id)
    }

    /// Total number of assets across all buckets.
    pub fn len(&self) -> usize {
        AssetCategory::ALL
            .iter()
            .map(|c| self.bucket(*c).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

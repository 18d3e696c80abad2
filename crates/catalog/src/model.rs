use std::fmt;
use std::str::FromStr;

use foundation::{GeoBounds, LayerId, RatingId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Subscription tier. Only paid users may keep private layers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Paid,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Paid => "paid",
        }
    }

    pub fn allows_private_layers(&self) -> bool {
        matches!(self, Plan::Paid)
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "paid" => Ok(Plan::Paid),
            _ => Err(format!("invalid plan: {s}")),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(format!("invalid visibility: {s}")),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity providers a user can sign in with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
    Linkedin,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 3] = [
        OAuthProvider::Google,
        OAuthProvider::Github,
        OAuthProvider::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
            OAuthProvider::Linkedin => "linkedin",
        }
    }

    /// Human-facing provider name.
    pub fn label(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "Google",
            OAuthProvider::Github => "GitHub",
            OAuthProvider::Linkedin => "LinkedIn",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            "linkedin" => Ok(OAuthProvider::Linkedin),
            _ => Err(format!("unsupported provider: {s}")),
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: OAuthProvider,
    /// Subject claim issued by `provider`.
    pub subject: String,
    pub plan: Plan,
    pub is_active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// What an identity provider tells us about the person signing in.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityProfile {
    pub provider: OAuthProvider,
    pub subject: String,
    pub email: Option<String>,
    pub username_hint: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub owner_id: UserId,
    pub name: String,
    pub created_at_ms: u64,
}

/// Stored data file backing a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerFile {
    pub path: String,
    pub size: u64,
    /// Original extension, e.g. `.geojson`.
    pub format: String,
}

/// Where a layer sits on the globe and how to frame it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerExtent {
    pub bbox: GeoBounds,
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom_level: u8,
}

impl LayerExtent {
    pub fn from_bounds(bbox: GeoBounds) -> Self {
        let (center_lon, center_lat) = bbox.center();
        Self {
            bbox,
            center_lon,
            center_lat,
            zoom_level: bbox.suggested_zoom(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub owner_id: UserId,
    pub workspace_id: Option<WorkspaceId>,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub source_url: Option<String>,
    pub license: String,
    pub category: String,
    pub visibility: Visibility,
    pub file: Option<LayerFile>,
    /// Format of the attached source (file or URL), e.g. `geojson`, `wms`.
    pub processed_format: Option<String>,
    pub extent: Option<LayerExtent>,
    pub view_count: u64,
    pub download_count: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Integer star rating, always within 1..=5.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Stars(u8);

impl Stars {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Stars {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&v) {
            Ok(Stars(v as u8))
        } else {
            Err(format!(
                "Rating must be between {} and {}",
                Self::MIN,
                Self::MAX
            ))
        }
    }
}

impl From<Stars> for u8 {
    fn from(s: Stars) -> Self {
        s.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: RatingId,
    pub layer_id: LayerId,
    pub user_id: UserId,
    pub stars: Stars,
    pub comment: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RatingSummary {
    pub total: u64,
    pub count: u64,
}

impl RatingSummary {
    /// Mean rating rounded to one decimal; 0 when unrated.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.total as f64 / self.count as f64;
        (mean * 10.0).round() / 10.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub is_open: bool,
}

/// Result of a plan transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanChange {
    pub user_id: UserId,
    pub previous: Plan,
    pub current: Plan,
    /// Private layers flipped to public by the transition.
    pub published_layers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_strings() {
        for plan in [Plan::Free, Plan::Paid] {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
        for v in [Visibility::Public, Visibility::Private] {
            assert_eq!(v.as_str().parse::<Visibility>().unwrap(), v);
        }
        for p in OAuthProvider::ALL {
            assert_eq!(p.as_str().parse::<OAuthProvider>().unwrap(), p);
        }
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn stars_reject_out_of_range() {
        assert!(Stars::try_from(0).is_err());
        assert!(Stars::try_from(6).is_err());
        assert_eq!(Stars::try_from(5).unwrap().get(), 5);
        assert!(serde_json::from_str::<Stars>("7").is_err());
    }

    #[test]
    fn summary_average_rounds_to_one_decimal() {
        let s = RatingSummary { total: 11, count: 3 };
        assert_eq!(s.average(), 3.7);
        assert_eq!(RatingSummary::default().average(), 0.0);
    }
}

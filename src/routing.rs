//! Capability-based model selection (`POST /route`).
//!
//! A catalog maps each worker identity to the capability tags it offers and
//! a cost tier. Selection prefers the candidate matching the most requested
//! tags, then the cheaper tier, then the name, so equal inputs always pick
//! the same model.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Relative price of running a model. Ordered cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    Low,
    Medium,
    High,
}

impl CostTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for CostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model's advertised capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub model: String,
    pub capabilities: Vec<String>,
    pub cost_tier: CostTier,
}

/// Body of `POST /route`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub exclude_models: Vec<String>,
}

fn default_priority() -> String {
    "normal".to_string()
}

/// Response of `POST /route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub model: String,
    pub reason: String,
    pub capabilities: Vec<String>,
    pub cost_tier: CostTier,
}

/// The set of routable models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub models: Vec<CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        let entry = |model: &str, caps: &[&str], cost_tier| CatalogEntry {
            model: model.to_string(),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            cost_tier,
        };
        Self {
            models: vec![
                entry("employee_ollama", &["code", "fast"], CostTier::Free),
                entry(
                    "employee_openai",
                    &["code", "deep_reason", "analysis"],
                    CostTier::High,
                ),
                entry(
                    "employee_gemini",
                    &["code", "analysis", "fast"],
                    CostTier::Medium,
                ),
                entry("employee_cli", &["code"], CostTier::Low),
            ],
        }
    }
}

impl Catalog {
    /// Load a JSON catalog (`{"models": [...]}`) from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: Self = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("capability catalog {}: {e}", path.display()))
        })?;
        if catalog.models.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "FLEET_CAPABILITIES".into(),
                message: "catalog lists no models".into(),
            });
        }
        Ok(catalog)
    }

    /// The built-in catalog, or the one at `path` when given.
    pub fn from_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Pick a model for `request`, skipping anything in `unavailable`
    /// (typically the suspended registrations).
    pub fn select(
        &self,
        request: &RouteRequest,
        unavailable: &HashSet<String>,
    ) -> Option<RouteResponse> {
        let wanted: HashSet<&str> = request.requirements.iter().map(String::as_str).collect();

        self.models
            .iter()
            .filter(|e| !unavailable.contains(&e.model))
            .filter(|e| !request.exclude_models.contains(&e.model))
            .map(|e| {
                let matched = e
                    .capabilities
                    .iter()
                    .filter(|c| wanted.contains(c.as_str()))
                    .count();
                (matched, e)
            })
            .filter(|(matched, _)| *matched > 0)
            .min_by(|(ma, a), (mb, b)| {
                mb.cmp(ma)
                    .then(a.cost_tier.cmp(&b.cost_tier))
                    .then(a.model.cmp(&b.model))
            })
            .map(|(matched, e)| RouteResponse {
                model: e.model.clone(),
                reason: format!(
                    "matched {matched}/{} requirements at {} cost",
                    wanted.len(),
                    e.cost_tier
                ),
                capabilities: e.capabilities.clone(),
                cost_tier: e.cost_tier,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(reqs: &[&str]) -> RouteRequest {
        RouteRequest {
            requirements: reqs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn most_matches_wins() {
        let catalog = Catalog::default();
        let picked = catalog
            .select(&request(&["deep_reason", "code"]), &HashSet::new())
            .unwrap();
        assert_eq!(picked.model, "employee_openai");
    }

    #[test]
    fn cheaper_tier_breaks_ties() {
        let catalog = Catalog::default();
        // ollama and gemini both match code+fast; ollama is free.
        let picked = catalog
            .select(&request(&["code", "fast"]), &HashSet::new())
            .unwrap();
        assert_eq!(picked.model, "employee_ollama");
        assert_eq!(picked.cost_tier, CostTier::Free);
    }

    #[test]
    fn excluded_and_unavailable_are_skipped() {
        let catalog = Catalog::default();
        let mut req = request(&["code", "fast"]);
        req.exclude_models = vec!["employee_ollama".into()];
        let picked = catalog.select(&req, &HashSet::new()).unwrap();
        assert_eq!(picked.model, "employee_gemini");

        let suspended: HashSet<String> = ["employee_gemini".to_string()].into();
        let picked = catalog.select(&req, &suspended).unwrap();
        assert_eq!(picked.model, "employee_cli");
    }

    #[test]
    fn no_match_is_none() {
        let catalog = Catalog::default();
        assert!(catalog.select(&request(&["vision"]), &HashSet::new()).is_none());
        assert!(catalog.select(&request(&[]), &HashSet::new()).is_none());
    }

    #[test]
    fn request_defaults() {
        let req: RouteRequest = serde_json::from_str(r#"{"requirements":["code"]}"#).unwrap();
        assert_eq!(req.priority, "normal");
        assert!(req.exclude_models.is_empty());
    }

    #[test]
    fn load_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caps.json");
        std::fs::write(
            &path,
            r#"{"models":[{"model":"solo","capabilities":["code"],"cost_tier":"low"}]}"#,
        )
        .unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.models.len(), 1);

        std::fs::write(&path, r#"{"models":[]}"#).unwrap();
        assert!(Catalog::load(&path).is_err());
    }
}

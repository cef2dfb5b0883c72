use serde::{Serialize, Deserialize};
use serde_with::skip_serializing_none;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ingredient {
    pub name: String,
    pub amount: String,
    pub cost: f64,
}

/// Inline-encoded raster image, a `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn from_base64(mime_type: &str, payload: &str) -> Self {
        Self(format!("data:{mime_type};base64,{payload}"))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStep {
    pub step: u32,
    pub description: String,
    pub visual_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub name: String,
    pub description: String,
    pub ingredients: Vec<Ingredient>,
    pub recipe: Vec<RecipeStep>,
    pub total_cost: f64,
    pub suggested_price: f64,
    pub profit_margin: String,
    #[serde(rename = "visualPrompt")]
    pub main_visual_prompt: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CostShare {
    pub name: String,
    pub cost: f64,
    pub share: f64,
}

impl Concept {
    /// Copy of the concept with every recipe image cleared, as sent back to the text model.
    pub fn without_images(&self) -> Concept {
        let mut stripped = self.clone();
        for step in &mut stripped.recipe {
            step.image = None;
        }
        stripped
    }

    /// Checks the fields the presentation layer relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("concept name is empty".into());
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !non_negative(self.total_cost) {
            return Err(format!("totalCost must be a non-negative number, got {}", self.total_cost));
        }
        if !non_negative(self.suggested_price) {
            return Err(format!("suggestedPrice must be a non-negative number, got {}", self.suggested_price));
        }
        if let Some(i) = self.ingredients.iter().find(|i| !non_negative(i.cost)) {
            return Err(format!("ingredient '{}' has invalid cost {}", i.name, i.cost));
        }
        if let Some(s) = self.recipe.iter().find(|s| s.step == 0) {
            return Err(format!("recipe step numbers start at 1, got {} ('{}')", s.step, s.description));
        }
        Ok(())
    }

    /// Ingredient costs, largest first, each with its fraction of the summed cost.
    pub fn cost_breakdown(&self) -> Vec<CostShare> {
        let sum: f64 = self.ingredients.iter().map(|i| i.cost).sum();
        let mut shares: Vec<CostShare> = self.ingredients.iter().map(|i| CostShare {
            name: i.name.clone(),
            cost: i.cost,
            share: if sum > 0.0 { i.cost / sum } else { 0.0 },
        }).collect();
        shares.sort_by(|a, b| b.cost.total_cmp(&a.cost));
        shares
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default)]
    pub target_cost: Option<String>,
    #[serde(default)]
    pub target_price: Option<String>,
}

impl Constraints {
    /// Trims both hints and drops the blank ones.
    pub fn normalized(self) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self { target_cost: clean(self.target_cost), target_price: clean(self.target_price) }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    GeneratingText,
    GeneratingImages,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateRequest {
    pub keyword: String,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefineRequest {
    pub instruction: String,
}

/// What the presentation layer renders for one session.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub phase: Phase,
    pub concept: Option<Concept>,
    pub main_image: Option<ImageRef>,
    pub error_message: Option<String>,
    pub cost_breakdown: Vec<CostShare>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn strawberry_concept() -> Concept {
        Concept {
            name: "Strawberry Cloud Tart".into(),
            description: "A crisp tart shell filled with strawberry mousse.".into(),
            ingredients: vec![
                Ingredient { name: "Strawberries".into(), amount: "100g".into(), cost: 120.0 },
                Ingredient { name: "Cream".into(), amount: "50ml".into(), cost: 60.0 },
            ],
            recipe: (1..=3).map(|n| RecipeStep {
                step: n,
                description: format!("Step {n} description"),
                visual_prompt: format!("sketch of step {n}"),
                image: None,
            }).collect(),
            total_cost: 180.0,
            suggested_price: 520.0,
            profit_margin: "65".into(),
            main_visual_prompt: "a strawberry tart on a white plate".into(),
        }
    }
}

//! Case catalog: the weighted item pools battles draw from.
//!
//! Each case is a price plus a weight table. Weights are integer drop odds
//! out of the case's total; the engine's roll in `[0, total_weight)` walks
//! the table cumulatively. The builtin catalog ships a small set of cases;
//! deployments can replace it from a TOML file at startup.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{EngineError, EngineResult};

/// One drawable item inside a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseItem {
    pub name: String,
    /// Item value in minor units, credited to the drawer's round total.
    pub value: u64,
    /// Integer drop weight out of the case's total weight.
    pub weight: u64,
}

/// A purchasable case with its weighted item pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub name: String,
    /// Price in minor units; battle entry cost is the sum over its cases.
    pub price: u64,
    pub items: Vec<CaseItem>,
}

impl Case {
    pub fn total_weight(&self) -> u64 {
        self.items.iter().map(|item| item.weight).sum()
    }

    /// Map a roll in `[0, total_weight)` to the item whose cumulative weight
    /// band covers it. Rolls past the table return `None`.
    pub fn item_at_roll(&self, roll: u64) -> Option<&CaseItem> {
        let mut remaining = roll;
        for item in &self.items {
            if remaining < item.weight {
                return Some(item);
            }
            remaining -= item.weight;
        }
        None
    }

    fn validate(&self) -> EngineResult<()> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "case.id",
                reason: "case id must be non-empty".to_string(),
            });
        }
        if self.price == 0 {
            return Err(EngineError::InvalidArgument {
                field: "case.price",
                reason: format!("case '{}' must have a non-zero price", self.id),
            });
        }
        if self.items.is_empty() {
            return Err(EngineError::InvalidArgument {
                field: "case.items",
                reason: format!("case '{}' has no items", self.id),
            });
        }
        if self.items.iter().any(|item| item.weight == 0) {
            return Err(EngineError::InvalidArgument {
                field: "case.items",
                reason: format!("case '{}' has a zero-weight item", self.id),
            });
        }
        Ok(())
    }

    /// Five-tier case patterned on standard drop odds (out of 10000).
    pub fn fracture() -> Self {
        Self {
            id: "fracture-case".to_string(),
            name: "Fracture Case".to_string(),
            price: 249,
            items: vec![
                CaseItem {
                    name: "SG 553 Ol' Rusty".to_string(),
                    value: 30,
                    weight: 7992,
                },
                CaseItem {
                    name: "Galil AR Connexion".to_string(),
                    value: 145,
                    weight: 1598,
                },
                CaseItem {
                    name: "MAC-10 Allure".to_string(),
                    value: 590,
                    weight: 320,
                },
                CaseItem {
                    name: "Desert Eagle Printstream".to_string(),
                    value: 3400,
                    weight: 64,
                },
                CaseItem {
                    name: "Karambit Fade".to_string(),
                    value: 21000,
                    weight: 26,
                },
            ],
        }
    }

    pub fn clutch() -> Self {
        Self {
            id: "clutch-case".to_string(),
            name: "Clutch Case".to_string(),
            price: 199,
            items: vec![
                CaseItem {
                    name: "XM1014 Oxide Blaze".to_string(),
                    value: 25,
                    weight: 7992,
                },
                CaseItem {
                    name: "Glock-18 Moonrise".to_string(),
                    value: 110,
                    weight: 1598,
                },
                CaseItem {
                    name: "AWP Mortis".to_string(),
                    value: 480,
                    weight: 320,
                },
                CaseItem {
                    name: "M4A4 Neo-Noir".to_string(),
                    value: 2700,
                    weight: 64,
                },
                CaseItem {
                    name: "Butterfly Knife Marble Fade".to_string(),
                    value: 18500,
                    weight: 26,
                },
            ],
        }
    }

    pub fn danger_zone() -> Self {
        Self {
            id: "danger-zone-case".to_string(),
            name: "Danger Zone Case".to_string(),
            price: 99,
            items: vec![
                CaseItem {
                    name: "Nova Wood Fired".to_string(),
                    value: 15,
                    weight: 7992,
                },
                CaseItem {
                    name: "P250 Nevermore".to_string(),
                    value: 85,
                    weight: 1598,
                },
                CaseItem {
                    name: "MP5-SD Phosphor".to_string(),
                    value: 430,
                    weight: 320,
                },
                CaseItem {
                    name: "AK-47 Asiimov".to_string(),
                    value: 2200,
                    weight: 64,
                },
                CaseItem {
                    name: "Talon Knife Doppler".to_string(),
                    value: 16500,
                    weight: 26,
                },
            ],
        }
    }

    pub fn all_builtin() -> Vec<Case> {
        vec![Self::fracture(), Self::clutch(), Self::danger_zone()]
    }
}

static BUILTIN_CATALOG: Lazy<CaseCatalog> = Lazy::new(|| {
    CaseCatalog::new(Case::all_builtin()).expect("builtin catalog must validate")
});

/// Lookup table of cases, immutable after construction.
#[derive(Debug, Clone)]
pub struct CaseCatalog {
    cases: HashMap<String, Case>,
    ordered_ids: Vec<String>,
}

impl CaseCatalog {
    pub fn new(cases: Vec<Case>) -> EngineResult<Self> {
        let mut map = HashMap::with_capacity(cases.len());
        let mut ordered_ids = Vec::with_capacity(cases.len());
        for case in cases {
            case.validate()?;
            if map.contains_key(&case.id) {
                return Err(EngineError::InvalidArgument {
                    field: "case.id",
                    reason: format!("duplicate case id '{}'", case.id),
                });
            }
            ordered_ids.push(case.id.clone());
            map.insert(case.id.clone(), case);
        }
        Ok(Self {
            cases: map,
            ordered_ids,
        })
    }

    /// The catalog shipped with the binary.
    pub fn builtin() -> &'static CaseCatalog {
        &BUILTIN_CATALOG
    }

    pub fn get(&self, case_id: &str) -> EngineResult<&Case> {
        self.cases
            .get(case_id)
            .ok_or_else(|| EngineError::CaseNotFound(case_id.to_string()))
    }

    /// Sum of case prices, the per-participant cost of a battle over them.
    pub fn entry_cost(&self, case_ids: &[String]) -> EngineResult<u64> {
        let mut total = 0u64;
        for case_id in case_ids {
            total = total.saturating_add(self.get(case_id)?.price);
        }
        Ok(total)
    }

    /// Cases in catalog insertion order.
    pub fn all(&self) -> Vec<&Case> {
        self.ordered_ids
            .iter()
            .filter_map(|id| self.cases.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::wallet::models::{OrganizationId, RosId};

pub type CategoryId = i64;

/// Reimbursement Organization Settings: the benefit bundle a wallet spends against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReimbursementOrganizationSettings {
    pub id: RosId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Direct payment ("Gold", modern benefit) enabled
    pub direct_payment_enabled: bool,
}

/// Whether a benefit is denominated in money or in procedure credits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "benefit_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BenefitType {
    Currency,
    Cycle,
}

/// Informal tier: GREEN is traditional currency, GOLD has direct payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenefitTier {
    Green,
    Gold,
}

/// Kind of expense a category covers. The stable join key across ROS versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseType {
    Fertility,
    Adoption,
    EggFreezing,
    Surrogacy,
    Childcare,
    Maternity,
    Menopause,
    Preservation,
    Donor,
    PreconceptionWellness,
}

impl ExpenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseType::Fertility => "FERTILITY",
            ExpenseType::Adoption => "ADOPTION",
            ExpenseType::EggFreezing => "EGG_FREEZING",
            ExpenseType::Surrogacy => "SURROGACY",
            ExpenseType::Childcare => "CHILDCARE",
            ExpenseType::Maternity => "MATERNITY",
            ExpenseType::Menopause => "MENOPAUSE",
            ExpenseType::Preservation => "PRESERVATION",
            ExpenseType::Donor => "DONOR",
            ExpenseType::PreconceptionWellness => "PRECONCEPTION_WELLNESS",
        }
    }

    pub fn all() -> Vec<ExpenseType> {
        vec![
            ExpenseType::Fertility,
            ExpenseType::Adoption,
            ExpenseType::EggFreezing,
            ExpenseType::Surrogacy,
            ExpenseType::Childcare,
            ExpenseType::Maternity,
            ExpenseType::Menopause,
            ExpenseType::Preservation,
            ExpenseType::Donor,
            ExpenseType::PreconceptionWellness,
        ]
    }
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseType {
    type Err = String;

    /// Case, whitespace and separator insensitive: "egg freezing", "Egg-Freezing" and
    /// "EGG_FREEZING" all parse to the same variant.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        ExpenseType::all()
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown expense type: {}", raw))
    }
}

/// Set of expense types carried by one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseTypeSet(BTreeSet<ExpenseType>);

impl ExpenseTypeSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, expense_type: ExpenseType) {
        self.0.insert(expense_type);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn intersects(&self, other: &ExpenseTypeSet) -> bool {
        self.overlap(other) > 0
    }

    /// Number of expense types shared with `other`
    pub fn overlap(&self, other: &ExpenseTypeSet) -> usize {
        self.0.intersection(&other.0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpenseType> {
        self.0.iter()
    }
}

impl FromIterator<ExpenseType> for ExpenseTypeSet {
    fn from_iter<I: IntoIterator<Item = ExpenseType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Row pairing a ROS with a reimbursement request category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CategoryAssociation {
    pub id: CategoryId,
    pub reimbursement_organization_settings_id: RosId,
    pub reimbursement_request_category_id: i64,
    pub label: String,
    pub benefit_type: BenefitType,
    /// Plan identifier of the financial account at the TPA
    pub alegeus_plan_id: Option<String>,
}

/// A category as seen by the reconciler: association plus its expense types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCategory {
    pub association: CategoryAssociation,
    pub expense_types: ExpenseTypeSet,
}

impl WalletCategory {
    pub fn id(&self) -> CategoryId {
        self.association.id
    }

    pub fn reimbursement_request_category_id(&self) -> i64 {
        self.association.reimbursement_request_category_id
    }

    pub fn benefit_type(&self) -> BenefitType {
        self.association.benefit_type
    }
}

/// Benefit-type profile of a ROS, used by the migration guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosProfile {
    pub tier: BenefitTier,
    pub benefit_type: BenefitType,
}

impl RosProfile {
    /// A ROS is cycle-based when any of its categories is denominated in cycles
    pub fn of(ros: &ReimbursementOrganizationSettings, categories: &[WalletCategory]) -> Self {
        let tier = if ros.direct_payment_enabled {
            BenefitTier::Gold
        } else {
            BenefitTier::Green
        };
        let benefit_type = if categories
            .iter()
            .any(|c| c.benefit_type() == BenefitType::Cycle)
        {
            BenefitType::Cycle
        } else {
            BenefitType::Currency
        };
        Self { tier, benefit_type }
    }
}

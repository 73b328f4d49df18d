use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::ros::models::{ReimbursementOrganizationSettings, RosProfile, WalletCategory};
use crate::wallet::models::RosId;
use crate::wallet::repository::ReimbursementStore;

/// Resolves the categories belonging to a ROS.
///
/// A ROS's category list is materialized on first reference and cached until `clear`.
/// The batch driver clears it at the start of every run.
pub struct CategoryCatalog {
    store: Arc<dyn ReimbursementStore>,
    categories: RwLock<HashMap<RosId, Arc<Vec<WalletCategory>>>>,
}

impl CategoryCatalog {
    pub fn new(store: Arc<dyn ReimbursementStore>) -> Self {
        Self {
            store,
            categories: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_ros(&self, ros_id: RosId) -> AppResult<ReimbursementOrganizationSettings> {
        self.store
            .get_ros(ros_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ROS {} not found", ros_id)))
    }

    pub async fn get_or_create_categories_by_ros(
        &self,
        ros_id: RosId,
    ) -> AppResult<Arc<Vec<WalletCategory>>> {
        let cached = self.categories.read().get(&ros_id).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let associations = self.store.get_category_associations(ros_id).await?;
        let ids: Vec<_> = associations.iter().map(|a| a.id).collect();
        let mut expense_types = self.store.get_expense_types(&ids).await?;

        let categories: Vec<WalletCategory> = associations
            .into_iter()
            .map(|association| {
                let types = expense_types.remove(&association.id).unwrap_or_default();
                if types.is_empty() {
                    warn!(
                        ros_id,
                        category_id = association.id,
                        "Category has no expense types and will never match across ROS changes"
                    );
                }
                WalletCategory {
                    association,
                    expense_types: types,
                }
            })
            .collect();

        debug!("Resolved {} categories for ROS {}", categories.len(), ros_id);

        let categories = Arc::new(categories);
        self.categories
            .write()
            .entry(ros_id)
            .or_insert_with(|| categories.clone());
        Ok(categories)
    }

    pub fn clear(&self) {
        let dropped = {
            let mut categories = self.categories.write();
            let dropped = categories.len();
            categories.clear();
            dropped
        };
        debug!("Cleared {} cached ROS category lists", dropped);
    }

    /// Tier (GREEN/GOLD) and denomination (cycle/currency) of a ROS
    pub async fn profile(&self, ros_id: RosId) -> AppResult<RosProfile> {
        let ros = self.get_ros(ros_id).await?;
        let categories = self.get_or_create_categories_by_ros(ros_id).await?;
        Ok(RosProfile::of(&ros, &categories))
    }
}

/// Plan identifier of the category's account at the TPA
pub fn get_alegeus_plan(category: &WalletCategory) -> Option<&str> {
    category.association.alegeus_plan_id.as_deref()
}

/// Pairs `(old, new)` whose expense-type sets intersect.
///
/// Each old category is assigned to at most one new category so its spend is never counted
/// twice: prefer the same plan id, then the largest overlap, then the lowest category id.
pub fn get_matching_alegeus_categories<'a>(
    old_categories: &'a [WalletCategory],
    new_categories: &'a [WalletCategory],
) -> Vec<(&'a WalletCategory, &'a WalletCategory)> {
    let mut pairs = Vec::new();

    for old in old_categories {
        let best = new_categories
            .iter()
            .filter(|new| old.expense_types.intersects(&new.expense_types))
            .max_by(|a, b| {
                let same_plan_a = get_alegeus_plan(a) == get_alegeus_plan(old);
                let same_plan_b = get_alegeus_plan(b) == get_alegeus_plan(old);
                same_plan_a
                    .cmp(&same_plan_b)
                    .then_with(|| {
                        old.expense_types
                            .overlap(&a.expense_types)
                            .cmp(&old.expense_types.overlap(&b.expense_types))
                    })
                    // lower id wins, so reverse
                    .then_with(|| b.id().cmp(&a.id()))
            });

        if let Some(new) = best {
            pairs.push((old, new));
        }
    }

    pairs
}

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::call_gateway;
use super::session::WalletSession;
use crate::adapters::{BenefitsAdminGateway, EscalationSink};
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::models::{Amount, CategorySetting, CategorySettingIndex};
use crate::ledger::LedgerWriter;
use crate::ros::catalog::{get_alegeus_plan, get_matching_alegeus_categories};
use crate::ros::models::{BenefitTier, BenefitType, CategoryId, RosProfile, WalletCategory};
use crate::ros::CategoryCatalog;
use crate::wallet::models::{ReimbursementWallet, RosId, WalletId};
use crate::wallet::repository::CategorySpendUpdate;

pub const NOT_MMB_MESSAGE: &str =
    "existing wallet is not MMB, still traditional, but new ROS is also traditional";
pub const MMB_TO_TRADITIONAL_MESSAGE: &str = "existing wallet is MMB instead of traditional";
pub const CURRENCY_TO_CYCLE_MESSAGE: &str =
    "existing wallet is currency based but new ROS is cycle based";
pub const NO_CREDIT_VALUE_MESSAGE: &str =
    "spend moves between cycle and currency categories but no credit value is configured";

/// Knobs for benefit-type transitions that are business decisions rather than data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationPolicy {
    pub allow_cycle_currency_conversion: bool,
    /// Cents one cycle credit is worth when spend crosses between cycle and currency
    pub cycle_credit_value: Option<Amount>,
}

/// Express `spent` in the denomination of the destination category.
///
/// A partly used credit counts as used. `None` when the conversion needs a credit value
/// and none is configured.
fn convert_spend(
    spent: Amount,
    from: BenefitType,
    to: BenefitType,
    credit_value: Option<Amount>,
) -> Option<Amount> {
    match (from, to) {
        (BenefitType::Cycle, BenefitType::Currency) => {
            credit_value.and_then(|value| spent.checked_mul(value))
        }
        (BenefitType::Currency, BenefitType::Cycle) => credit_value
            .filter(|value| *value > 0)
            .map(|value| (spent + value - 1) / value),
        _ => Some(spent),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionVerdict {
    Proceed { convert_cycle_to_currency: bool },
    Escalate(&'static str),
}

/// Decide whether spend may move from a ROS with profile `old` to one with profile `new`
pub fn check_benefit_transition(
    old: RosProfile,
    new: RosProfile,
    policy: MigrationPolicy,
) -> TransitionVerdict {
    use BenefitTier::{Gold, Green};
    use BenefitType::{Currency, Cycle};

    match ((old.tier, old.benefit_type), (new.tier, new.benefit_type)) {
        ((Green, _), (Green, _)) => TransitionVerdict::Escalate(NOT_MMB_MESSAGE),
        ((Gold, _), (Green, _)) => TransitionVerdict::Escalate(MMB_TO_TRADITIONAL_MESSAGE),
        ((Green, _), (Gold, _)) => TransitionVerdict::Proceed {
            convert_cycle_to_currency: false,
        },
        ((Gold, Cycle), (Gold, Currency)) => {
            if policy.allow_cycle_currency_conversion {
                TransitionVerdict::Proceed {
                    convert_cycle_to_currency: true,
                }
            } else {
                TransitionVerdict::Escalate(MMB_TO_TRADITIONAL_MESSAGE)
            }
        }
        ((Gold, Currency), (Gold, Cycle)) => TransitionVerdict::Escalate(CURRENCY_TO_CYCLE_MESSAGE),
        ((Gold, _), (Gold, _)) => TransitionVerdict::Proceed {
            convert_cycle_to_currency: false,
        },
    }
}

/// What a completed migration did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub settings_created: usize,
    /// Existing destinations that received spend not yet recorded on them
    pub settings_updated: usize,
    /// Existing destinations already holding everything folded into them
    pub settings_skipped: usize,
    pub ledger_entries: usize,
    pub adjusted_amount: Amount,
    pub converted_plans: usize,
    /// Old categories carrying spend that no new category accepts
    pub unmatched_categories: Vec<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated(MigrationReport),
    Escalated(String),
}

/// Spend folded into one destination category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DestinationSpend {
    total: Amount,
    /// Part coming from categories on a different plan; must be re-posted to the TPA
    carried_over: Amount,
    sources: Vec<CategoryId>,
}

#[derive(Debug, Default)]
struct MigrationPlan {
    destinations: BTreeMap<CategoryId, DestinationSpend>,
    unmatched: Vec<CategoryId>,
    /// Old categories whose spend cannot be expressed in the destination's denomination
    unconvertible: Vec<CategoryId>,
}

fn plan_migration(
    wallet_id: WalletId,
    old_categories: &[WalletCategory],
    new_categories: &[WalletCategory],
    settings: &CategorySettingIndex,
    credit_value: Option<Amount>,
) -> MigrationPlan {
    let mut plan = MigrationPlan::default();
    let pairs = get_matching_alegeus_categories(old_categories, new_categories);

    for (old, new) in &pairs {
        let recorded = settings.spent_amount(old.id(), wallet_id);
        if recorded <= 0 {
            continue;
        }
        let Some(spent) =
            convert_spend(recorded, old.benefit_type(), new.benefit_type(), credit_value)
        else {
            plan.unconvertible.push(old.id());
            continue;
        };
        let destination = plan.destinations.entry(new.id()).or_default();
        destination.total += spent;
        if get_alegeus_plan(old) != get_alegeus_plan(new) {
            destination.carried_over += spent;
        }
        destination.sources.push(old.id());
    }

    let matched: BTreeSet<CategoryId> = pairs.iter().map(|(old, _)| old.id()).collect();
    plan.unmatched = old_categories
        .iter()
        .filter(|c| !matched.contains(&c.id()) && settings.spent_amount(c.id(), wallet_id) > 0)
        .map(|c| c.id())
        .collect();

    plan
}

/// Moves a wallet's category settings and spend from one ROS to another
pub struct CategorySettingsMigrator {
    catalog: Arc<CategoryCatalog>,
    gateway: Arc<dyn BenefitsAdminGateway>,
    escalations: Arc<dyn EscalationSink>,
    ledger_writer: LedgerWriter,
    policy: MigrationPolicy,
    call_timeout: Duration,
}

impl CategorySettingsMigrator {
    pub fn new(
        catalog: Arc<CategoryCatalog>,
        gateway: Arc<dyn BenefitsAdminGateway>,
        escalations: Arc<dyn EscalationSink>,
        policy: MigrationPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            gateway,
            escalations,
            ledger_writer: LedgerWriter::new(),
            policy,
            call_timeout,
        }
    }

    /// Migrate inside an open session.
    ///
    /// Each destination that needs a TPA adjustment is committed together with its ledger
    /// entry right after the adjustment succeeds. Destinations without an adjustment stay
    /// staged for the caller to commit.
    ///
    /// Spend already recorded on an existing destination counts as carried, so a rerun after
    /// a partial failure adjusts nothing twice while a wallet returning to an earlier ROS
    /// still brings back what it spent in between.
    pub async fn migrate(
        &self,
        session: &mut WalletSession,
        old_ros_id: RosId,
        new_ros_id: RosId,
    ) -> ReconcileResult<MigrationOutcome> {
        let wallet = session.wallet().clone();

        let old_categories = self.catalog.get_or_create_categories_by_ros(old_ros_id).await?;
        let new_categories = self.catalog.get_or_create_categories_by_ros(new_ros_id).await?;
        let old_profile = self.catalog.profile(old_ros_id).await?;
        let new_profile = self.catalog.profile(new_ros_id).await?;

        let convert = match check_benefit_transition(old_profile, new_profile, self.policy) {
            TransitionVerdict::Escalate(reason) => {
                return Ok(self.escalate(&wallet, old_ros_id, new_ros_id, reason).await);
            }
            TransitionVerdict::Proceed {
                convert_cycle_to_currency,
            } => convert_cycle_to_currency,
        };

        let plan = plan_migration(
            wallet.id,
            &old_categories,
            &new_categories,
            session.settings(),
            self.policy.cycle_credit_value,
        );
        if !plan.unconvertible.is_empty() {
            debug!(
                wallet_id = wallet.id,
                categories = ?plan.unconvertible,
                "Spend needs a credit value"
            );
            return Ok(self
                .escalate(&wallet, old_ros_id, new_ros_id, NO_CREDIT_VALUE_MESSAGE)
                .await);
        }
        for category_id in &plan.unmatched {
            info!(
                wallet_id = wallet.id,
                category_id, "Old category has spend but no matching category on the new ROS"
            );
        }

        let mut report = MigrationReport {
            unmatched_categories: plan.unmatched.clone(),
            ..MigrationReport::default()
        };
        if convert {
            report.converted_plans = self
                .convert_cycle_to_currency(&wallet, &old_categories, &new_categories)
                .await?;
        }

        let today = Utc::now().date_naive();
        for category in new_categories.iter() {
            let spend = plan.destinations.get(&category.id()).cloned().unwrap_or_default();
            let existing = session
                .settings()
                .get(category.id(), wallet.id)
                .map(|s| s.spent_amount);

            let outstanding = (spend.total - existing.unwrap_or(0)).max(0);
            if existing.is_some() && outstanding == 0 {
                debug!(
                    wallet_id = wallet.id,
                    category_id = category.id(),
                    "Category setting already holds its spend, skipping"
                );
                report.settings_skipped += 1;
                continue;
            }

            let carry = spend.carried_over.min(outstanding);
            let plan_id = get_alegeus_plan(category).map(str::to_string);
            Self::stage_destination(
                session,
                category,
                existing.is_some(),
                spend.total,
                plan_id.clone(),
            );

            if carry > 0 {
                let new_plan = plan_id.as_deref().ok_or_else(|| {
                    ReconcileError::Data(format!(
                        "category {} on ROS {} receives spend but has no plan id",
                        category.id(),
                        new_ros_id
                    ))
                })?;

                let entry =
                    self.ledger_writer
                        .historical_spend_adjustment(wallet.id, category, carry, today)?;
                call_gateway(
                    "adjust_plan_amount",
                    self.call_timeout,
                    self.gateway
                        .adjust_plan_amount(&wallet, &entry.claim_id(), carry, new_plan, today),
                )
                .await?;

                info!(
                    wallet_id = wallet.id,
                    category_id = category.id(),
                    sources = ?spend.sources,
                    "💸 Carried {} of historical spend to plan {}",
                    carry,
                    new_plan
                );

                session.stage().ledger_entries.push(entry);
                session.commit().await?;

                report.ledger_entries += 1;
                report.adjusted_amount += carry;
            }

            if existing.is_some() {
                report.settings_updated += 1;
            } else {
                report.settings_created += 1;
            }
        }

        Ok(MigrationOutcome::Migrated(report))
    }

    async fn escalate(
        &self,
        wallet: &ReimbursementWallet,
        old_ros_id: RosId,
        new_ros_id: RosId,
        reason: &'static str,
    ) -> MigrationOutcome {
        warn!(
            wallet_id = wallet.id,
            old_ros_id,
            new_ros_id,
            "⚠️ Benefit type transition needs manual handling: {}",
            reason
        );
        self.escalations.raise(wallet, reason).await;
        MigrationOutcome::Escalated(reason.to_string())
    }

    fn stage_destination(
        session: &mut WalletSession,
        category: &WalletCategory,
        exists: bool,
        total: Amount,
        plan_id: Option<String>,
    ) {
        let wallet_id = session.wallet().id;
        if exists {
            session.stage().spend_updates.push(CategorySpendUpdate {
                wallet_id,
                category_id: category.id(),
                spent_amount: total,
            });
        } else {
            session
                .stage()
                .category_settings
                .push(CategorySetting::new(wallet_id, category.id(), total, plan_id));
        }
    }

    /// Close cycle accounts and open currency accounts at the TPA before any category writes
    async fn convert_cycle_to_currency(
        &self,
        wallet: &ReimbursementWallet,
        old_categories: &[WalletCategory],
        new_categories: &[WalletCategory],
    ) -> ReconcileResult<usize> {
        let cycle_plans: BTreeSet<&str> = old_categories
            .iter()
            .filter(|c| c.benefit_type() == BenefitType::Cycle)
            .filter_map(get_alegeus_plan)
            .collect();
        let currency_plans: BTreeSet<&str> = new_categories
            .iter()
            .filter(|c| c.benefit_type() == BenefitType::Currency)
            .filter_map(get_alegeus_plan)
            .collect();

        info!(
            wallet_id = wallet.id,
            "🔁 Converting {} cycle plan(s) to {} currency plan(s)",
            cycle_plans.len(),
            currency_plans.len()
        );

        for plan_id in &cycle_plans {
            call_gateway(
                "terminate_employee_account",
                self.call_timeout,
                self.gateway.terminate_employee_account(wallet, plan_id),
            )
            .await?;
        }
        for plan_id in &currency_plans {
            call_gateway(
                "post_add_employee_account",
                self.call_timeout,
                self.gateway.post_add_employee_account(wallet, plan_id),
            )
            .await?;
        }

        Ok(cycle_plans.len() + currency_plans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ros::models::{CategoryAssociation, ExpenseType};

    fn profile(tier: BenefitTier, benefit_type: BenefitType) -> RosProfile {
        RosProfile { tier, benefit_type }
    }

    fn category(id: i64, plan: &str, types: &[ExpenseType]) -> WalletCategory {
        WalletCategory {
            association: CategoryAssociation {
                id,
                reimbursement_organization_settings_id: 1,
                reimbursement_request_category_id: id * 10,
                label: format!("category {}", id),
                benefit_type: BenefitType::Currency,
                alegeus_plan_id: Some(plan.to_string()),
            },
            expense_types: types.iter().copied().collect(),
        }
    }

    #[test]
    fn test_transition_table() {
        let strict = MigrationPolicy::default();
        let green = profile(BenefitTier::Green, BenefitType::Currency);
        let gold_currency = profile(BenefitTier::Gold, BenefitType::Currency);
        let gold_cycle = profile(BenefitTier::Gold, BenefitType::Cycle);

        assert_eq!(
            check_benefit_transition(green, gold_currency, strict),
            TransitionVerdict::Proceed {
                convert_cycle_to_currency: false
            }
        );
        assert_eq!(
            check_benefit_transition(green, green, strict),
            TransitionVerdict::Escalate(NOT_MMB_MESSAGE)
        );
        assert_eq!(
            check_benefit_transition(gold_currency, green, strict),
            TransitionVerdict::Escalate(MMB_TO_TRADITIONAL_MESSAGE)
        );
        assert_eq!(
            check_benefit_transition(gold_cycle, gold_cycle, strict),
            TransitionVerdict::Proceed {
                convert_cycle_to_currency: false
            }
        );
        assert_eq!(
            check_benefit_transition(gold_currency, gold_cycle, strict),
            TransitionVerdict::Escalate(CURRENCY_TO_CYCLE_MESSAGE)
        );
    }

    #[test]
    fn test_cycle_to_currency_depends_on_policy() {
        let gold_cycle = profile(BenefitTier::Gold, BenefitType::Cycle);
        let gold_currency = profile(BenefitTier::Gold, BenefitType::Currency);

        assert_eq!(
            check_benefit_transition(gold_cycle, gold_currency, MigrationPolicy::default()),
            TransitionVerdict::Escalate(MMB_TO_TRADITIONAL_MESSAGE)
        );
        let permissive = MigrationPolicy {
            allow_cycle_currency_conversion: true,
            ..MigrationPolicy::default()
        };
        assert_eq!(
            check_benefit_transition(gold_cycle, gold_currency, permissive),
            TransitionVerdict::Proceed {
                convert_cycle_to_currency: true
            }
        );
    }

    #[test]
    fn test_plan_folds_sources_and_splits_carried_spend() {
        let old = vec![
            category(1, "A", &[ExpenseType::Fertility]),
            category(2, "B", &[ExpenseType::Preservation]),
            category(3, "C", &[ExpenseType::Adoption]),
        ];
        let new = vec![category(
            10,
            "B",
            &[ExpenseType::Fertility, ExpenseType::Preservation],
        )];
        let settings: CategorySettingIndex = vec![
            CategorySetting::new(7, 1, 400, Some("A".into())),
            CategorySetting::new(7, 2, 600, Some("B".into())),
            CategorySetting::new(7, 3, 50, Some("C".into())),
        ]
        .into_iter()
        .collect();

        let plan = plan_migration(7, &old, &new, &settings, None);
        let destination = &plan.destinations[&10];
        assert_eq!(destination.total, 1000);
        assert_eq!(destination.carried_over, 400);
        assert_eq!(destination.sources, vec![1, 2]);
        assert_eq!(plan.unmatched, vec![3]);
    }

    #[test]
    fn test_plan_ignores_categories_without_spend() {
        let old = vec![category(1, "A", &[ExpenseType::Fertility])];
        let new = vec![category(10, "B", &[ExpenseType::Fertility])];
        let plan = plan_migration(7, &old, &new, &CategorySettingIndex::new(), None);
        assert!(plan.destinations.is_empty());
        assert!(plan.unmatched.is_empty());
    }

    #[test]
    fn test_credit_conversion_needs_a_value() {
        use BenefitType::{Currency, Cycle};

        assert_eq!(convert_spend(12, Cycle, Currency, None), None);
        assert_eq!(convert_spend(12, Cycle, Currency, Some(10_000)), Some(120_000));
        // a partly used credit counts as used
        assert_eq!(convert_spend(25_000, Currency, Cycle, Some(10_000)), Some(3));
        assert_eq!(convert_spend(700, Currency, Currency, None), Some(700));
        assert_eq!(convert_spend(3, Cycle, Cycle, None), Some(3));
    }

    #[test]
    fn test_plan_flags_credits_without_value() {
        let mut cycle = category(1, "CY", &[ExpenseType::Fertility]);
        cycle.association.benefit_type = BenefitType::Cycle;
        let old = vec![cycle];
        let new = vec![category(10, "E", &[ExpenseType::Fertility])];
        let settings: CategorySettingIndex = vec![CategorySetting::new(7, 1, 12, Some("CY".into()))]
            .into_iter()
            .collect();

        let plan = plan_migration(7, &old, &new, &settings, None);
        assert_eq!(plan.unconvertible, vec![1]);
        assert!(plan.destinations.is_empty());

        let plan = plan_migration(7, &old, &new, &settings, Some(10_000));
        assert!(plan.unconvertible.is_empty());
        assert_eq!(plan.destinations[&10].total, 120_000);
        assert_eq!(plan.destinations[&10].carried_over, 120_000);
    }
}

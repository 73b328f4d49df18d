//! Fakes and fixtures shared by the reconciler tests

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{BenefitsAdminGateway, EscalationSink, GatewayResponse, PaymentOpsNotifier};
use crate::eligibility::{
    DateRange, EligibilityOracle, EligibilityVerification, FeatureType, SubPopulationId,
};
use crate::error::{EligibilityError, GatewayError};
use crate::ledger::models::{Amount, CategorySetting};
use crate::reconciler::{MigrationPolicy, ReconcilerSettings, WalletEligibilityReconciler};
use crate::ros::models::{
    BenefitType, CategoryAssociation, ExpenseType, ReimbursementOrganizationSettings,
};
use crate::wallet::models::{
    MemberAddress, OrganizationId, ReimbursementWallet, RosId, UserId, WalletId, WalletUser,
    WalletUserStatus, WalletUserType,
};
use crate::wallet::repository::InMemoryReimbursementStore;

pub const ORG_ID: OrganizationId = 100;
pub const OTHER_ORG_ID: OrganizationId = 200;
pub const WALLET_ID: WalletId = 1;
pub const EMPLOYEE_WALLET_USER_ID: i64 = 1;
pub const EMPLOYEE_USER_ID: UserId = 500;
pub const DEPENDENT_WALLET_USER_ID: i64 = 2;
pub const DEPENDENT_USER_ID: UserId = 501;

// ========== ELIGIBILITY ==========

/// Sleep long enough for any call bounded by `test_settings` to time out
async fn stall(delay: &Mutex<Option<Duration>>) {
    let delay = *delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Default)]
pub struct FakeOracle {
    verifications: Mutex<HashMap<UserId, EligibilityVerification>>,
    sub_populations: Mutex<HashMap<UserId, SubPopulationId>>,
    ros_by_sub_population: Mutex<HashMap<SubPopulationId, Vec<RosId>>>,
    unavailable_for: Mutex<HashMap<UserId, u16>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeOracle {
    pub fn set_verification(&self, user_id: UserId, upper: Option<NaiveDate>, sub: Option<SubPopulationId>) {
        self.verifications.lock().insert(
            user_id,
            EligibilityVerification {
                user_id,
                organization_id: ORG_ID,
                effective_range: DateRange::new(None, upper),
                sub_population_id: sub,
            },
        );
    }

    /// Verification lookups for `user_id` fail with `status`
    pub fn fail_for(&self, user_id: UserId, status: u16) {
        self.unavailable_for.lock().insert(user_id, status);
    }

    pub fn stall(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_sub_population(&self, user_id: UserId, sub: SubPopulationId) {
        self.sub_populations.lock().insert(user_id, sub);
    }

    pub fn set_ros_ids(&self, sub: SubPopulationId, ros_ids: Vec<RosId>) {
        self.ros_by_sub_population.lock().insert(sub, ros_ids);
    }
}

#[async_trait]
impl EligibilityOracle for FakeOracle {
    async fn get_verification(
        &self,
        user_id: UserId,
        _organization_id: OrganizationId,
    ) -> Result<Option<EligibilityVerification>, EligibilityError> {
        stall(&self.delay).await;
        let unavailable = self.unavailable_for.lock().get(&user_id).copied();
        if let Some(status) = unavailable {
            return Err(EligibilityError::Unavailable(status));
        }
        Ok(self.verifications.lock().get(&user_id).cloned())
    }

    async fn get_sub_population(
        &self,
        user_id: UserId,
        _organization_id: OrganizationId,
    ) -> Result<Option<SubPopulationId>, EligibilityError> {
        stall(&self.delay).await;
        Ok(self.sub_populations.lock().get(&user_id).copied())
    }

    async fn get_ros_ids_for_sub_population(
        &self,
        sub_population_id: SubPopulationId,
        _feature_type: FeatureType,
    ) -> Result<Vec<RosId>, EligibilityError> {
        stall(&self.delay).await;
        Ok(self
            .ros_by_sub_population
            .lock()
            .get(&sub_population_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ========== GATEWAY ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    UpdateTerminationDate {
        wallet_id: WalletId,
        termination_date: Option<NaiveDate>,
        address_line1: String,
    },
    TerminateAccount {
        plan_id: String,
    },
    AddAccount {
        plan_id: String,
    },
    AdjustPlanAmount {
        claim_id: String,
        amount: Amount,
        plan_id: String,
    },
}

/// Records every call; responds 200 unless told to reject an operation or a plan
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    rejected_operations: Mutex<HashMap<&'static str, u16>>,
    rejected_plans: Mutex<HashMap<String, u16>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingGateway {
    /// Every call is recorded, then hangs for `delay` before answering
    pub fn stall(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn reject(&self, operation: &'static str, status: u16) {
        self.rejected_operations.lock().insert(operation, status);
    }

    pub fn reject_plan(&self, plan_id: &str, status: u16) {
        self.rejected_plans.lock().insert(plan_id.to_string(), status);
    }

    pub fn accept_all(&self) {
        self.rejected_operations.lock().clear();
        self.rejected_plans.lock().clear();
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn adjustments(&self) -> Vec<(Amount, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::AdjustPlanAmount { amount, plan_id, .. } => Some((amount, plan_id)),
                _ => None,
            })
            .collect()
    }

    fn respond(&self, operation: &'static str, plan_id: Option<&str>, call: GatewayCall) -> GatewayResponse {
        self.calls.lock().push(call);
        if let Some(status) = self.rejected_operations.lock().get(operation) {
            return GatewayResponse::new(*status);
        }
        if let Some(status) = plan_id.and_then(|p| self.rejected_plans.lock().get(p).copied()) {
            return GatewayResponse::new(status);
        }
        GatewayResponse::new(200)
    }
}

#[async_trait]
impl BenefitsAdminGateway for RecordingGateway {
    async fn update_employee_termination_date(
        &self,
        wallet: &ReimbursementWallet,
        termination_date: Option<NaiveDate>,
        address: &MemberAddress,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self.respond(
            "update_employee_termination_date",
            None,
            GatewayCall::UpdateTerminationDate {
                wallet_id: wallet.id,
                termination_date,
                address_line1: address.line1.clone(),
            },
        );
        stall(&self.delay).await;
        Ok(response)
    }

    async fn terminate_employee_account(
        &self,
        _wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self.respond(
            "terminate_employee_account",
            Some(plan_id),
            GatewayCall::TerminateAccount {
                plan_id: plan_id.to_string(),
            },
        );
        stall(&self.delay).await;
        Ok(response)
    }

    async fn post_add_employee_account(
        &self,
        _wallet: &ReimbursementWallet,
        plan_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self.respond(
            "post_add_employee_account",
            Some(plan_id),
            GatewayCall::AddAccount {
                plan_id: plan_id.to_string(),
            },
        );
        stall(&self.delay).await;
        Ok(response)
    }

    async fn adjust_plan_amount(
        &self,
        _wallet: &ReimbursementWallet,
        claim_id: &str,
        amount: Amount,
        plan_id: &str,
        _service_start_date: NaiveDate,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self.respond(
            "adjust_plan_amount",
            Some(plan_id),
            GatewayCall::AdjustPlanAmount {
                claim_id: claim_id.to_string(),
                amount,
                plan_id: plan_id.to_string(),
            },
        );
        stall(&self.delay).await;
        Ok(response)
    }
}

// ========== NOTIFICATIONS ==========

#[derive(Default)]
pub struct RecordingEscalations {
    raised: Mutex<Vec<(WalletId, String)>>,
}

impl RecordingEscalations {
    pub fn raised(&self) -> Vec<(WalletId, String)> {
        self.raised.lock().clone()
    }
}

#[async_trait]
impl EscalationSink for RecordingEscalations {
    async fn raise(&self, wallet: &ReimbursementWallet, message: &str) {
        self.raised.lock().push((wallet.id, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<(WalletId, RosId, RosId)>>,
}

impl RecordingNotifier {
    pub fn notified(&self) -> Vec<(WalletId, RosId, RosId)> {
        self.notified.lock().clone()
    }
}

#[async_trait]
impl PaymentOpsNotifier for RecordingNotifier {
    async fn notify_ros_change(
        &self,
        wallet: &ReimbursementWallet,
        previous_ros_id: RosId,
        latest_ros_id: RosId,
    ) {
        self.notified
            .lock()
            .push((wallet.id, previous_ros_id, latest_ros_id));
    }
}

// ========== FIXTURE ==========

/// Catalog seeded into every fixture.
///
/// | ROS | tier  | type     | categories (id: expense types, plan)            |
/// |-----|-------|----------|-------------------------------------------------|
/// | 1   | GREEN | currency | 11: fertility, A                                |
/// | 2   | GOLD  | currency | 21: fertility+preservation, B; 22: adoption, C  |
/// | 3   | GOLD  | currency | 31: fertility, A                                |
/// | 4   | GREEN | currency | 41: fertility, D                                |
/// | 5   | GOLD  | currency | 51: fertility, E                                |
/// | 6   | GOLD  | cycle    | 61: fertility, CY                               |
/// | 7   | GOLD  | currency | 71: fertility, A; 72: preservation, B           |
/// | 8   | GOLD  | currency | 81: fertility, X; 82: preservation, Y           |
/// | 9   | GOLD  | currency | other organization                              |
const CATALOG: &[(RosId, bool, &[(i64, BenefitType, &[ExpenseType], &str)])] = &[
    (1, false, &[(11, BenefitType::Currency, &[ExpenseType::Fertility], "A")]),
    (
        2,
        true,
        &[
            (
                21,
                BenefitType::Currency,
                &[ExpenseType::Fertility, ExpenseType::Preservation],
                "B",
            ),
            (22, BenefitType::Currency, &[ExpenseType::Adoption], "C"),
        ],
    ),
    (3, true, &[(31, BenefitType::Currency, &[ExpenseType::Fertility], "A")]),
    (4, false, &[(41, BenefitType::Currency, &[ExpenseType::Fertility], "D")]),
    (5, true, &[(51, BenefitType::Currency, &[ExpenseType::Fertility], "E")]),
    (6, true, &[(61, BenefitType::Cycle, &[ExpenseType::Fertility], "CY")]),
    (
        7,
        true,
        &[
            (71, BenefitType::Currency, &[ExpenseType::Fertility], "A"),
            (72, BenefitType::Currency, &[ExpenseType::Preservation], "B"),
        ],
    ),
    (
        8,
        true,
        &[
            (81, BenefitType::Currency, &[ExpenseType::Fertility], "X"),
            (82, BenefitType::Currency, &[ExpenseType::Preservation], "Y"),
        ],
    ),
    (9, true, &[(91, BenefitType::Currency, &[ExpenseType::Fertility], "Z")]),
];

pub fn fallback_address() -> MemberAddress {
    MemberAddress {
        line1: "160 Varick St".to_string(),
        line2: None,
        city: "New York".to_string(),
        state: "NY".to_string(),
        zip_code: "10013".to_string(),
        country: "US".to_string(),
    }
}

/// Short so timeout tests finish quickly; in-memory fakes answer well within it
pub const TEST_CALL_TIMEOUT: Duration = Duration::from_millis(250);

pub fn test_settings(policy: MigrationPolicy) -> ReconcilerSettings {
    ReconcilerSettings {
        external_call_timeout: TEST_CALL_TIMEOUT,
        fallback_address: fallback_address(),
        migration_policy: policy,
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryReimbursementStore>,
    pub oracle: Arc<FakeOracle>,
    pub gateway: Arc<RecordingGateway>,
    pub escalations: Arc<RecordingEscalations>,
    pub notifier: Arc<RecordingNotifier>,
    pub reconciler: Arc<WalletEligibilityReconciler>,
}

impl Fixture {
    /// Wallet 1 on `ros_id` with an active employee and an active dependent
    pub async fn new(ros_id: RosId) -> Self {
        Self::with_policy(ros_id, MigrationPolicy::default()).await
    }

    pub async fn with_policy(ros_id: RosId, policy: MigrationPolicy) -> Self {
        let store = Arc::new(InMemoryReimbursementStore::new());
        for (id, gold, categories) in CATALOG {
            let organization_id = if *id == 9 { OTHER_ORG_ID } else { ORG_ID };
            store
                .insert_ros(ReimbursementOrganizationSettings {
                    id: *id,
                    organization_id,
                    name: format!("ROS {}", id),
                    direct_payment_enabled: *gold,
                })
                .await;
            for (category_id, benefit_type, types, plan) in categories.iter() {
                store
                    .insert_category(
                        CategoryAssociation {
                            id: *category_id,
                            reimbursement_organization_settings_id: *id,
                            reimbursement_request_category_id: category_id * 10,
                            label: format!("category {}", category_id),
                            benefit_type: *benefit_type,
                            alegeus_plan_id: Some(plan.to_string()),
                        },
                        types.to_vec(),
                    )
                    .await;
            }
        }

        store
            .insert_wallet(ReimbursementWallet::new(WALLET_ID, ORG_ID, ros_id))
            .await;
        store
            .insert_wallet_user(WalletUser {
                id: EMPLOYEE_WALLET_USER_ID,
                wallet_id: WALLET_ID,
                user_id: EMPLOYEE_USER_ID,
                user_type: WalletUserType::Employee,
                status: WalletUserStatus::Active,
            })
            .await;
        store
            .insert_wallet_user(WalletUser {
                id: DEPENDENT_WALLET_USER_ID,
                wallet_id: WALLET_ID,
                user_id: DEPENDENT_USER_ID,
                user_type: WalletUserType::Dependent,
                status: WalletUserStatus::Active,
            })
            .await;

        let oracle = Arc::new(FakeOracle::default());
        let gateway = Arc::new(RecordingGateway::default());
        let escalations = Arc::new(RecordingEscalations::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let reconciler = Arc::new(WalletEligibilityReconciler::new(
            store.clone(),
            oracle.clone(),
            gateway.clone(),
            escalations.clone(),
            notifier.clone(),
            test_settings(policy),
        ));

        Self {
            store,
            oracle,
            gateway,
            escalations,
            notifier,
            reconciler,
        }
    }

    /// Employee and dependent both open-ended eligible in sub-population `sub`, which maps to `ros_ids`
    pub fn eligible_for(&self, sub: SubPopulationId, ros_ids: Vec<RosId>) {
        self.oracle.set_verification(EMPLOYEE_USER_ID, None, Some(sub));
        self.oracle.set_verification(DEPENDENT_USER_ID, None, Some(sub));
        self.oracle.set_ros_ids(sub, ros_ids);
    }

    pub async fn spend(&self, category_id: i64, amount: Amount, plan: &str) {
        self.store
            .insert_category_setting(CategorySetting::new(
                WALLET_ID,
                category_id,
                amount,
                Some(plan.to_string()),
            ))
            .await;
    }

    pub async fn wallet(&self) -> ReimbursementWallet {
        use crate::wallet::repository::ReimbursementStore;
        self.store.get_wallet(WALLET_ID).await.unwrap().unwrap()
    }
}
